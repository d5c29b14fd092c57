//! Compiled machine representation and runtime state.

pub mod context;
pub mod event;
pub mod state;
pub mod transition;

pub use context::{ContextMut, ContextValidator, ContextView, MapContext, ValidatedContext};
pub use event::{EventInput, EventSource, MachineEvent, RuntimeState};
pub use state::{MachineDefinition, StateId, StateKind, StateNode};
pub use transition::{BehaviorRef, TransitionDefinition, TransitionSet};
