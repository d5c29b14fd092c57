//! Errors a caller of `MachineRuntime::send` can observe.
//!
//! Thin wrapper over `hsm-core`'s taxonomy: the facade adds only
//! `UnknownMachine` (no such id in the registry) and flattens
//! `hsm-persistence::PersistenceError` through `hsm-core`'s own
//! `EventLogError`/`RestoreFailure` conversions, so callers match on one enum
//! regardless of which backend is wired in.

use hsm_core::{CoreError, RestoreFailure, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no machine registered under id '{0}'")]
    UnknownMachine(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Restore(#[from] RestoreFailure),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("event log backend error: {0}")]
    Log(#[from] hsm_core::EventLogError),
}
