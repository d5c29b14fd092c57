//! Root facade over `hsm-core` + `hsm-persistence`: a small library that
//! turns the storage-agnostic engine into something an application wires up
//! in a few lines: compile a definition once via `MachineRegistry`, then
//! drive instances of it through `MachineRuntime::send`.
//!
//! Neither module does any I/O of its own; `MachineRuntime` is generic only
//! over the trait objects `hsm-core` defines (`EventLog`, `ArchiveService`,
//! `ConcurrencyGate`), so the same facade runs entirely in-memory in tests
//! and `hsm-cli`'s default mode, or against Postgres + Redis when wired with
//! `hsm-persistence`'s backends (see `main.rs`, behind `--features pg_demo`).

pub mod errors;
pub mod registry;
pub mod runtime;

pub use errors::RuntimeError;
pub use registry::MachineRegistry;
pub use runtime::{MachineRuntime, SendOutcome};

// Re-export the engine crate's public surface so a caller only needs this
// one crate (plus `hsm-persistence` for a durable backend) in their own
// `Cargo.toml`.
pub use hsm_core::{
    BehaviorRegistry, CoreError, EventInput, EventSource, MachineDefinition, MapContext, NoopConcurrencyGate,
};
