//! Implementación Postgres (Diesel) de los traits de `hsm-core`.
//!
//! Objetivo general del módulo:
//! - Proveer una capa de persistencia durable (Postgres) con paridad 1:1
//!   respecto al `InMemoryEventLog`.
//! - Mantener determinismo del motor: el replay de eventos debe reconstruir
//!   el mismo `RuntimeState`.
//! - Aislar completamente el mapeo `MachineEvent` ↔ filas de DB de
//!   `hsm-core`.
//!
//! El log activo (`event_log`) guarda `context` como diff incremental:
//! `append_batch` recalcula el contexto completo acumulado hasta ahora
//! antes de cada fila nueva y sólo persiste lo que cambió;
//! `list` devuelve esos mismos diffs tal cual (consistente con lo que
//! `hsm_core::restore` espera reconstruir vía `merge_context`).

pub mod archive;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use hsm_core::{diff_context, EventLog, EventLogError, EventSource, MachineEvent};
use log::{debug, warn};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::error::PersistenceError;
use crate::schema::event_log;

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Abstrae la obtención de una conexión, para poder testear sin acoplar a
/// un `PgPool` real.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        Ok(self.pool.get()?)
    }
}

#[derive(Queryable, Debug)]
pub struct EventRow {
    pub id: String,
    pub root_event_id: String,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    pub machine_id: String,
    pub machine_value: Value,
    pub source: String,
    pub event_type: String,
    pub payload: Option<Value>,
    pub version: i32,
    pub context: Option<Value>,
    pub meta: Option<Value>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = event_log)]
pub struct NewEventRow {
    pub id: String,
    pub root_event_id: String,
    pub sequence_number: i64,
    pub machine_id: String,
    pub machine_value: Value,
    pub source: String,
    pub event_type: String,
    pub payload: Option<Value>,
    pub version: i32,
    pub context: Option<Value>,
    pub meta: Option<Value>,
}

fn source_str(s: EventSource) -> &'static str {
    match s {
        EventSource::External => "external",
        EventSource::Internal => "internal",
    }
}

fn source_from_str(s: &str) -> EventSource {
    match s {
        "internal" => EventSource::Internal,
        _ => EventSource::External,
    }
}

pub(crate) fn row_to_event(row: EventRow) -> Option<MachineEvent> {
    let id = Ulid::from_string(&row.id).ok()?;
    let root_event_id = Ulid::from_string(&row.root_event_id).ok()?;
    let machine_value: Vec<String> = serde_json::from_value(row.machine_value).ok()?;
    let context: Option<Map<String, Value>> = match row.context {
        Some(v) => v.as_object().cloned(),
        None => None,
    };
    Some(MachineEvent {
        id,
        root_event_id,
        sequence_number: row.sequence_number as u64,
        created_at: row.created_at,
        machine_id: row.machine_id,
        machine_value,
        source: source_from_str(&row.source),
        event_type: row.event_type,
        payload: row.payload,
        version: row.version,
        context,
        meta: row.meta,
    })
}

pub(crate) fn event_to_new_row(ev: &MachineEvent, diffed_context: Option<Map<String, Value>>) -> NewEventRow {
    NewEventRow {
        id: ev.id.to_string(),
        root_event_id: ev.root_event_id.to_string(),
        sequence_number: ev.sequence_number as i64,
        machine_id: ev.machine_id.clone(),
        machine_value: serde_json::to_value(&ev.machine_value).expect("serialize machine_value"),
        source: source_str(ev.source).to_string(),
        event_type: ev.event_type.clone(),
        payload: ev.payload.clone(),
        version: ev.version,
        context: diffed_context.map(Value::Object),
        meta: ev.meta.clone(),
    }
}

/// Determina si un error es transitorio (recomendado reintentar con
/// backoff).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
                || m.contains("could not serialize access due to concurrent update")
                || m.contains("terminating connection due to administrator command")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff exponencial pequeño (hasta 3 intentos: 15ms,
/// 30ms, 45ms).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * (attempts + 1) as u64;
                warn!("retryable error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Implementación Postgres de `EventLog` (append-only).
pub struct PgEventLog<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgEventLog<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn list_rows(&self, root_event_id: Ulid) -> Result<Vec<EventRow>, PersistenceError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            let rows = event_log::table
                .filter(event_log::root_event_id.eq(root_event_id.to_string()))
                .order(event_log::sequence_number.asc())
                .load::<EventRow>(&mut conn)?;
            Ok(rows)
        })
    }

    fn accumulated_context(&self, root_event_id: Ulid) -> Result<Map<String, Value>, PersistenceError> {
        let rows = self.list_rows(root_event_id)?;
        let mut acc = Map::new();
        for row in rows {
            if let Some(Value::Object(diff)) = &row.context {
                hsm_core::merge_context(&mut acc, diff);
            }
        }
        Ok(acc)
    }
}

impl<P: ConnectionProvider> EventLog for PgEventLog<P> {
    fn append_batch(&self, root_event_id: Ulid, events: &[MachineEvent]) -> Result<(), EventLogError> {
        if events.is_empty() {
            return Ok(());
        }
        debug!("append_batch:start root_event_id={root_event_id} count={}", events.len());

        let mut running = self.accumulated_context(root_event_id).map_err(Into::<EventLogError>::into)?;
        let mut rows = Vec::with_capacity(events.len());
        for ev in events {
            let full = ev.context.clone().unwrap_or_default();
            let diff = diff_context(&running, &full);
            running = full;
            rows.push(event_to_new_row(ev, if diff.is_empty() { None } else { Some(diff) }));
        }

        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.transaction::<_, PersistenceError, _>(|tx_conn| {
                diesel::insert_into(event_log::table).values(&rows).execute(tx_conn)?;
                Ok(())
            })
        })
        .map_err(Into::into)
    }

    fn list(&self, root_event_id: Ulid) -> Result<Vec<MachineEvent>, EventLogError> {
        let rows = self.list_rows(root_event_id).map_err(Into::<EventLogError>::into)?;
        Ok(rows.into_iter().filter_map(row_to_event).collect())
    }
}

/// Builds an r2d2 Postgres pool from `database_url` and runs pending
/// migrations once against the first checked-out connection.
///
/// If `min_size > max_size` the min is clamped down to `max_size` (both
/// clamped up to at least 1) rather than rejected outright.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), clamping min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(final_min))
        .max_size(validated_max)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        crate::migrations::run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Development helper: loads `.env`, reads `DbConfig` from the environment,
/// and builds an already-migrated pool.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
