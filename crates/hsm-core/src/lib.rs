//! hsm-core: deterministic hierarchical state machine engine.
//!
//! Propósito:
//! - Proveer la compilación de una configuración neutral (JSON) a un árbol de
//!   estados inmutable (`MachineDefinition`) y el motor de transición que lo
//!   recorre paso a paso, generando una secuencia de eventos (Event Sourcing)
//!   reproducible, capaz de reconstruir el estado (`restore`) sin mutar el
//!   historial.
//!
//! Componentes principales:
//! - `config`: validación estructural de la configuración cruda.
//! - `compile`: compilador de dos pasadas hacia `MachineDefinition`.
//! - `model`: tipos neutrales (`StateNode`, `MachineEvent`, `RuntimeState`,
//!   `ContextView`/`ContextMut`).
//! - `behavior`: registro de guards/actions/calculators/events/results.
//! - `engine`: el algoritmo de step y el fixpoint de `@always`.
//! - `concurrency`: trait `ConcurrencyGate` (candado exclusivo por
//!   instancia); implementado sobre Redis en `hsm-persistence`.
//! - `event_log`: trait `EventLog` (in-memory + backends) y el diff/merge
//!   incremental de contexto.
//! - `restore`: reconstrucción de `RuntimeState` a partir del historial.
//! - `hashing`: canonicalización JSON y helpers de hash para fingerprints.
//! - `errors`: taxonomía de errores del motor.
//!
//! No I/O, no async, no SQL; ver `hsm-persistence` para los backends.
//!
//! Re-exports: se exponen los símbolos clave para facilitar su uso desde
//! `hsm-persistence`, `hsm-cli`, y el crate raíz.

pub mod behavior;
pub mod compile;
pub mod concurrency;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event_log;
pub mod hashing;
pub mod model;
pub mod restore;

pub use behavior::{
    Action, Behavior, BehaviorRegistry, Calculator, ContextValueKind, EventBehavior, Guard, GuardResult,
    RaiseSink, ResultBehavior,
};
pub use compile::compile;
pub use concurrency::{ConcurrencyGate, LockGuard, NoopConcurrencyGate};
pub use engine::{step, RaiseQueue};
pub use errors::{ConfigError, CoreError, EventLogError, RestoreFailure, ValidationError};
pub use event_log::{diff_context, merge_context, EventLog, InMemoryEventLog};
pub use model::context::{ContextMut, ContextValidator, ContextView, MapContext, ValidatedContext};
pub use model::event::{EventInput, EventSource, MachineEvent, RuntimeState};
pub use model::state::{MachineDefinition, StateId, StateKind, StateNode};
pub use model::transition::{BehaviorRef, TransitionDefinition, TransitionSet};
pub use restore::{restore, ArchiveService, BatchArchiveOutcome, NoopArchiveService, RestoreMode};
