//! Error taxonomy for the core crate.
//!
//! Policy: `ConfigError` only ever surfaces at compile time. Everything else
//! can surface while a step is in flight. Failed guards are never errors:
//! they are observable internal events; only *validation* guards get
//! aggregated into a `ValidationError` after the step's write has landed.

use std::collections::BTreeMap;
use thiserror::Error;

/// One structural complaint about a raw configuration tree, always carrying
/// the dotted path of the offending node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown key '{key}' at {path}")]
    UnknownKey { path: String, key: String },

    #[error("'states' must be a map at {path}")]
    InvalidShape { path: String },

    #[error("'@always' may only appear inside the 'on' group at {path}")]
    AlwaysOutsideOn { path: String },

    #[error("final state '{path}' may not declare 'on' or 'states'")]
    FinalHasChildrenOrTransitions { path: String },

    #[error("parallel state '{path}' may not declare 'initial'")]
    ParallelHasInitial { path: String },

    #[error("parallel state '{path}' must declare at least one region")]
    ParallelEmptyStates { path: String },

    #[error("compound state '{path}' must declare 'initial'")]
    CompoundMissingInitial { path: String },

    #[error("'initial' at {path} names unknown child '{child}'")]
    UnknownInitialChild { path: String, child: String },

    #[error("transition target '{target}' at {path} does not resolve to any state")]
    UnresolvedTarget { path: String, target: String },

    #[error("guarded-alternative list at {path} is empty")]
    EmptyGuardedList { path: String },

    #[error("guarded-alternative list at {path} has a non-terminal default (unguarded) entry")]
    NonTerminalDefault { path: String },

    #[error("event type '{event}' at {path} is neither a registered symbolic name nor a resolvable event class")]
    UnknownEventType { path: String, event: String },

    #[error("machine id must be non-empty")]
    EmptyMachineId,

    #[error("delimiter must be a single character")]
    InvalidDelimiter,

    #[error("{} configuration problems: {0:?}", .0.len())]
    Many(Vec<ConfigError>),
}

impl ConfigError {
    /// Flattens a list of errors into a single `Many`, or the sole error if
    /// there is exactly one, matching the "structured error listing the
    /// offending path" requirement without discarding context.
    pub fn from_many(mut errs: Vec<ConfigError>) -> Option<ConfigError> {
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => Some(ConfigError::Many(errs)),
        }
    }
}

/// Errors that can occur while compiling a validated config into a
/// `MachineDefinition`, or while a step is executing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("behavior '{0}' not found in registry")]
    BehaviorNotFound(String),

    #[error("behavior '{behavior}' requires context key '{key}' of kind {kind}, which is missing or mistyped")]
    MissingContext {
        behavior: String,
        key: String,
        kind: String,
    },

    #[error("no transition fired for event '{event}' from state '{state}'")]
    NoTransition { state: String, event: String },

    #[error("@always fixpoint did not converge within {0} consecutive eventless transitions")]
    AlwaysLoopBound(usize),

    #[error("lock for root event '{0}' is already held")]
    AlreadyRunning(String),

    #[error("internal: {0}")]
    Internal(String),
}

/// Aggregated failures from validation guards, keyed by the
/// event type that was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("validation failed: {0:?}")]
pub struct ValidationError(pub BTreeMap<String, String>);

impl ValidationError {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, event_type: impl Into<String>, message: impl Into<String>) {
        self.0.insert(event_type.into(), message.into());
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised by the restorer when neither the active log nor the archive holds
/// any record for a `root_event_id`, or when an archive blob is corrupt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestoreFailure {
    #[error("no active or archived events found for root event '{0}'")]
    NotFound(String),

    #[error("archive blob for root event '{0}' is corrupt: {1}")]
    CorruptArchive(String, String),

    #[error(transparent)]
    Log(#[from] EventLogError),
}

/// Opaque failure from an `EventLog`/`ArchiveService` backend. `hsm-core`
/// depends on no I/O crate, so backend-specific errors (Diesel, r2d2, Redis)
/// are flattened to a message here; `hsm-persistence::PersistenceError`
/// converts into this at the trait boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("event log backend error: {0}")]
pub struct EventLogError(pub String);

impl EventLogError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
