//! `MachineEvent`, `EventInput`, and `RuntimeState`.

use super::context::{ContextMut, MapContext};
use super::state::StateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Where an event originated: an external caller's `send`, or an internal
/// event emitted by the engine/actions during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    External,
    Internal,
}

/// A normalized event handed to the transition engine.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub event_type: String,
    pub payload: Option<Value>,
    pub source: EventSource,
    /// Whether a caller-side runtime error aborting this step should also
    /// discard whatever prefix of `history` the step managed to record
    /// before failing. Defaults to `true`; internal events raised during a
    /// step inherit it from the event that triggered them.
    pub transactional: bool,
}

impl EventInput {
    pub fn external(event_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            source: EventSource::External,
            transactional: true,
        }
    }

    pub fn internal(event_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            source: EventSource::Internal,
            transactional: true,
        }
    }

    /// Opts this event (and, transitively, whatever it raises) out of
    /// rollback-on-error: a runtime error during the step still keeps
    /// whatever history was recorded up to the failure.
    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }
}

/// One durable record per step, the durable unit of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineEvent {
    pub id: Ulid,
    pub root_event_id: Ulid,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub machine_id: String,
    pub machine_value: Vec<String>,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Option<Value>,
    pub version: i32,
    /// Incremental diff relative to the previous record's effective context;
    /// the first record of an instance stores the full context.
    pub context: Option<Map<String, Value>>,
    pub meta: Option<Value>,
}

impl MachineEvent {
    pub fn new(
        root_event_id: Ulid,
        sequence_number: u64,
        machine_id: impl Into<String>,
        machine_value: Vec<String>,
        source: EventSource,
        event_type: impl Into<String>,
        payload: Option<Value>,
        context: Option<Map<String, Value>>,
        meta: Option<Value>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            root_event_id,
            sequence_number,
            created_at: Utc::now(),
            machine_id: machine_id.into(),
            machine_value,
            source,
            event_type: event_type.into(),
            payload,
            version: 1,
            context,
            meta,
        }
    }
}

/// Live, in-process machine state.
///
/// Generic over the context implementation so both the untyped `MapContext`
/// and a typed `ValidatedContext<V>` can drive the same engine: validation is
/// a pluggable strategy, not a language feature.
#[derive(Debug, Clone)]
pub struct RuntimeState<C: ContextMut = MapContext> {
    /// Active leaf state ids: length 1 for non-parallel, N for a parallel
    /// machine with N active regions.
    pub value: Vec<StateId>,
    pub context: C,
    /// Representative pointer: for parallel, the common parallel ancestor.
    pub current_state_definition: StateId,
    pub current_event_behavior: Option<EventInput>,
    pub history: Vec<MachineEvent>,
}

impl<C: ContextMut> RuntimeState<C> {
    pub fn new(value: Vec<StateId>, context: C, current_state_definition: StateId) -> Self {
        Self {
            value,
            context,
            current_state_definition,
            current_event_behavior: None,
            history: Vec::new(),
        }
    }
}
