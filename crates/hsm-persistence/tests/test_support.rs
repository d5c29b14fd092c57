use hsm_persistence::pg::PgPool;
use hsm_persistence::{build_pool, DbConfig};
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    let cfg = DbConfig::from_env();
    match build_pool(&cfg.url, 1, 2) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
});

pub fn with_pool<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&PgPool) -> R,
{
    TEST_POOL.as_ref().map(|p| f(p))
}

/// Truncates the tables the test suite writes to, so each run starts clean
/// without depending on test execution order.
pub fn truncate_all(pool: &PgPool) {
    use diesel::RunQueryDsl;
    let mut conn = pool.get().expect("conn");
    diesel::sql_query("TRUNCATE event_log, machine_event_archive, instance_cooldown")
        .execute(&mut conn)
        .expect("truncate");
}
