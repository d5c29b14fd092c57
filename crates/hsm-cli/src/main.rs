//! hsm-cli: thin command-line glue over `hsm-core` + `hsm-persistence`.
//!
//! Reads a machine definition (JSON) from a file path, sends one event
//! against a Postgres/Redis-backed `MachineRuntime`, and prints the
//! resulting value. No guard/action/calculator registration beyond the
//! empty default registry. Wiring real behaviors into the registry is
//! application glue, out of this crate's scope.
//!
//! Usage:
//!   hsm-cli <machine.json> <event-type> [root-event-id]
//!
//! Omitting `root-event-id` creates a new instance.

use hsm_core::{compile, BehaviorRegistry, ConcurrencyGate, EventInput, EventLog};
use hsm_persistence::pg::{PgEventLog, PoolProvider};
use hsm_persistence::{ArchivalConfig, DbConfig, PgArchiveService, RedisConcurrencyGate, RedisConfig};
use std::error::Error;
use std::sync::Arc;
use ulid::Ulid;

fn usage() -> ! {
    eprintln!("usage: hsm-cli <machine.json> <event-type> [root-event-id]");
    std::process::exit(2);
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    hsm_persistence::init_dotenv();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| usage());
    let event_type = args.next().unwrap_or_else(|| usage());
    let root_event_id = args.next().map(|s| Ulid::from_string(&s)).transpose()?;

    let config_text = std::fs::read_to_string(&config_path)?;
    let config: serde_json::Value = serde_json::from_str(&config_text)?;
    let behavior = Arc::new(BehaviorRegistry::new());
    let def = compile(&config, behavior)?;
    println!("compiled '{}' (definition_hash={})", def.id, def.definition_hash);

    let db_config = DbConfig::from_env();
    let pool = hsm_persistence::build_pool(&db_config.url, db_config.min_connections, db_config.max_connections)?;
    let archival_config = ArchivalConfig::from_env();
    let redis_config = RedisConfig::from_env();

    let log = Arc::new(PgEventLog::new(PoolProvider { pool: pool.clone() }));
    let archive = Arc::new(PgArchiveService::new(PoolProvider { pool }, archival_config));
    let gate = Arc::new(RedisConcurrencyGate::new(&redis_config.url, redis_config.lock_timeout_secs)?);

    let machine_id = def.id.clone();
    let (root_event_id, mut state, _lock) = match root_event_id {
        Some(id) => {
            let lock = gate.acquire(id)?;
            let state = hsm_core::restore(&def, id, log.as_ref(), archive.as_ref(), hsm_core::RestoreMode::ForSend)?;
            (id, state, Some(lock))
        }
        None => {
            let value = def.initial_leaves(def.root);
            (Ulid::new(), hsm_core::RuntimeState::new(value, hsm_core::MapContext::default(), def.root), None)
        }
    };

    let history_len_before = state.history.len();
    hsm_core::step(&def, &mut state, root_event_id, EventInput::external(event_type, None))?;
    log.append_batch(root_event_id, &state.history[history_len_before..])?;

    let value: Vec<String> = state.value.iter().map(|id| def.node(*id).qualified_id.clone()).collect();
    println!("{machine_id} {root_event_id} -> {value:?}");

    Ok(())
}
