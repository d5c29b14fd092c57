//! Demo binary: compiles a small order-fulfillment machine and drives one
//! instance of it through `MachineRuntime`, printing its value after each
//! event. A plain, synchronous, println-narrated walkthrough rather than a
//! CLI front-end; `hsm-cli` covers the minimal command-line entry point.
//!
//! By default everything runs against the in-memory reference backends.
//! `cargo run --features pg_demo` instead wires `hsm-persistence`'s
//! Postgres `EventLog`/`ArchiveService` and Redis `ConcurrencyGate`, reading
//! connection settings from `.env` (see `hsm_persistence::config`).

use hsm_runtime::{BehaviorRegistry, EventInput, MachineRegistry, MachineRuntime};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;

/// `order.pending --[PAY]--> order.paid --[SHIP]--> order.shipped --[DELIVER]--> order.delivered`,
/// with a `CANCEL` available from `pending`/`paid` guarded by a `cancellable`
/// validation guard that rejects once the order has shipped.
fn order_machine_config() -> serde_json::Value {
    json!({
        "id": "order",
        "initial": "pending",
        "states": {
            "pending": {
                "on": {
                    "PAY": "paid",
                    "CANCEL": { "target": "cancelled", "guards": ["cancellable"] }
                }
            },
            "paid": {
                "on": {
                    "SHIP": "shipped",
                    "CANCEL": { "target": "cancelled", "guards": ["cancellable"] }
                }
            },
            "shipped": {
                "on": { "DELIVER": "delivered" }
            },
            "delivered": {},
            "cancelled": {}
        }
    })
}

struct Cancellable;
impl hsm_core::Behavior for Cancellable {}
impl hsm_core::Guard for Cancellable {
    fn check(
        &self,
        _ctx: &dyn hsm_core::ContextView,
        _event: &EventInput,
        _owner: &hsm_core::StateNode,
        _arg: Option<&str>,
    ) -> hsm_core::GuardResult {
        hsm_core::GuardResult::pass()
    }

    fn is_validation(&self) -> bool {
        true
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut behavior = BehaviorRegistry::new();
    behavior.register_guard("cancellable", Arc::new(Cancellable));
    let behavior = Arc::new(behavior);

    let registry = Arc::new(MachineRegistry::new());
    let def = registry.compile(&order_machine_config(), behavior)?;
    println!("compiled machine '{}' (definition_hash={})", def.id, def.definition_hash);

    #[cfg(not(feature = "pg_demo"))]
    let runtime = {
        use hsm_core::{InMemoryEventLog, NoopArchiveService, NoopConcurrencyGate};
        println!("running against the in-memory reference backends (pass --features pg_demo for Postgres/Redis)");
        MachineRuntime::new(
            registry.clone(),
            Arc::new(InMemoryEventLog::new()),
            Arc::new(NoopArchiveService),
            Arc::new(NoopConcurrencyGate),
        )
    };

    #[cfg(feature = "pg_demo")]
    let runtime = {
        use hsm_persistence::pg::PoolProvider;

        hsm_persistence::init_dotenv();
        let db_config = hsm_persistence::DbConfig::from_env();
        let pool = hsm_persistence::build_pool(&db_config.url, db_config.min_connections, db_config.max_connections)?;
        let archival_config = hsm_persistence::ArchivalConfig::from_env();
        let redis_config = hsm_persistence::RedisConfig::from_env();
        println!("running against Postgres + Redis ({})", redis_config.url);
        MachineRuntime::new(
            registry.clone(),
            Arc::new(hsm_persistence::PgEventLog::new(PoolProvider { pool: pool.clone() })),
            Arc::new(hsm_persistence::PgArchiveService::new(PoolProvider { pool }, archival_config)),
            Arc::new(hsm_persistence::RedisConcurrencyGate::new(&redis_config.url, redis_config.lock_timeout_secs)?),
        )
    };

    let created = runtime.send("order", None, EventInput::external("PAY", None), false)?;
    println!("new order {} -> {:?}", created.root_event_id, created.value);

    let shipped = runtime.send("order", Some(created.root_event_id), EventInput::external("SHIP", None), false)?;
    println!("order {} -> {:?}", shipped.root_event_id, shipped.value);

    let delivered = runtime.send("order", Some(created.root_event_id), EventInput::external("DELIVER", None), false)?;
    println!("order {} -> {:?}", delivered.root_event_id, delivered.value);

    let inspected = runtime.inspect("order", created.root_event_id)?;
    println!("final inspection: {:?}", inspected.value);

    Ok(())
}
