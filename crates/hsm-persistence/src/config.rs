//! Carga de configuración de conexión desde variables de entorno.
//! Usa convención `DATABASE_URL`/`REDIS_URL` y los valores por defecto de
//! archivado documentados en `constants`.

use once_cell::sync::Lazy;
use std::env;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv(); // ignora error si no existe .env
});

/// Fuerza la carga temprana de `.env` desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").expect("DATABASE_URL no definido");
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);
        Self {
            url,
            min_connections,
            max_connections,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub lock_timeout_secs: u64,
}

impl RedisConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("REDIS_URL").expect("REDIS_URL no definido");
        let lock_timeout_secs = env::var("LOCK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(hsm_core::constants::DEFAULT_LOCK_TIMEOUT_SECS);
        Self { url, lock_timeout_secs }
    }
}

/// Archival configuration, the `archival.*` key vocabulary.
#[derive(Debug, Clone)]
pub struct ArchivalConfig {
    pub enabled: bool,
    pub level: u32,
    pub threshold: usize,
    pub days_inactive: i64,
    pub restore_cooldown_hours: i64,
    /// Present but optional, since not every deployment wants a hard
    /// deletion horizon on top of archival.
    pub archive_retention_days: Option<i64>,
}

impl ArchivalConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        Self {
            enabled: env::var("ARCHIVAL_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            level: env::var("ARCHIVAL_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(hsm_core::constants::DEFAULT_ARCHIVE_LEVEL),
            threshold: env::var("ARCHIVAL_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(hsm_core::constants::DEFAULT_ARCHIVE_THRESHOLD),
            days_inactive: env::var("ARCHIVAL_DAYS_INACTIVE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(hsm_core::constants::DEFAULT_DAYS_INACTIVE),
            restore_cooldown_hours: env::var("ARCHIVAL_RESTORE_COOLDOWN_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(hsm_core::constants::DEFAULT_RESTORE_COOLDOWN_HOURS),
            archive_retention_days: env::var("ARCHIVAL_RETENTION_DAYS").ok().and_then(|v| v.parse().ok()),
        }
    }
}
