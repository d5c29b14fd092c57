//! hsm-persistence
//!
//! Implementación Postgres + Redis de los puertos de persistencia y
//! concurrencia de `hsm-core`.
//!
//! Módulos:
//! - `pg`: `PgEventLog` (log activo, append-only) y `pg::archive`
//!   (`PgArchiveService`, compresión zlib, eligibilidad/restore).
//! - `lock`: `RedisConcurrencyGate`, candado distribuido por instancia.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de `DbConfig`/`RedisConfig`/`ArchivalConfig` desde `.env`.
//! - `schema`: tablas Diesel (`event_log`, `machine_event_archive`).

pub mod config;
pub mod error;
pub mod lock;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, ArchivalConfig, DbConfig, RedisConfig};
pub use error::PersistenceError;
pub use lock::RedisConcurrencyGate;
pub use migrations::run_pending_migrations;
pub use pg::archive::PgArchiveService;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgEventLog, PgPool, PoolProvider};
