//! `BehaviorRegistry`: a closed trait set for dynamic dispatch of
//! behaviors: `Guard`, `Action`, `Calculator`, `EventBehavior`,
//! `ResultBehavior`, each registered under a symbolic name.

use crate::errors::CoreError;
use crate::model::context::{ContextMut, ContextView};
use crate::model::event::EventInput;
use crate::model::state::StateNode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Declared kind of a required-context value, used only for the
/// `MissingContext` pre-invocation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextValueKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl ContextValueKind {
    pub fn matches(&self, v: &Value) -> bool {
        match self {
            ContextValueKind::String => v.is_string(),
            ContextValueKind::Number => v.is_number(),
            ContextValueKind::Bool => v.is_boolean(),
            ContextValueKind::Object => v.is_object(),
            ContextValueKind::Array => v.is_array(),
            ContextValueKind::Any => true,
        }
    }
}

impl std::fmt::Display for ContextValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextValueKind::String => "string",
            ContextValueKind::Number => "number",
            ContextValueKind::Bool => "bool",
            ContextValueKind::Object => "object",
            ContextValueKind::Array => "array",
            ContextValueKind::Any => "any",
        };
        write!(f, "{s}")
    }
}

/// Shared surface for all behavior kinds: each may declare context keys it
/// needs present before it is invoked.
pub trait Behavior: Send + Sync {
    fn required_context(&self) -> &[(&'static str, ContextValueKind)] {
        &[]
    }
}

/// Checks required context for a behavior against `ctx`, raising
/// `CoreError::MissingContext` as a fatal error on the first gap, before
/// invocation.
pub fn check_required_context(
    behavior_name: &str,
    required: &[(&'static str, ContextValueKind)],
    ctx: &dyn ContextView,
) -> Result<(), CoreError> {
    for (key, kind) in required {
        match ctx.get(key) {
            Some(v) if kind.matches(v) => {}
            _ => {
                return Err(CoreError::MissingContext {
                    behavior: behavior_name.to_string(),
                    key: (*key).to_string(),
                    kind: kind.to_string(),
                })
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GuardResult {
    pub passed: bool,
    /// Carried into the `<machine>.guard.<name>.fail` event payload on
    /// failure.
    pub message: Option<String>,
}

impl GuardResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// A guard evaluated in order within a guarded-alternatives list.
///
/// `is_validation()` marks a validation guard: one whose failure should be
/// surfaced to the caller as a `ValidationError` after the step's write
/// lands.
pub trait Guard: Behavior {
    fn check(
        &self,
        ctx: &dyn ContextView,
        event: &EventInput,
        state: &StateNode,
        arg: Option<&str>,
    ) -> GuardResult;

    fn is_validation(&self) -> bool {
        false
    }
}

/// FIFO sink actions use to queue `raise(event)` calls.
pub trait RaiseSink {
    fn raise(&mut self, event: EventInput);
}

pub trait Action: Behavior {
    fn execute(
        &self,
        ctx: &mut dyn ContextMut,
        event: &EventInput,
        state: &StateNode,
        arg: Option<&str>,
        raise: &mut dyn RaiseSink,
    );
}

/// Calculators run before guards in a candidate's evaluation, applying
/// side-effect context updates ahead of guard evaluation.
pub trait Calculator: Behavior {
    fn calculate(&self, ctx: &mut dyn ContextMut, event: &EventInput, state: &StateNode, arg: Option<&str>);
}

/// A registered event class: validates a raw payload before the engine
/// accepts the event.
pub trait EventBehavior: Send + Sync {
    fn validate_payload(&self, payload: &Value) -> Result<(), String>;
}

/// Valid only on FINAL states.
pub trait ResultBehavior: Send + Sync {
    fn compute(&self, ctx: &dyn ContextView) -> Value;
}

/// Maps symbolic names to behavior implementations. Constructed once per
/// `MachineDefinition` and shared across every instance of that machine:
/// construct-once, immutable, shareable.
#[derive(Default)]
pub struct BehaviorRegistry {
    guards: HashMap<String, Arc<dyn Guard>>,
    actions: HashMap<String, Arc<dyn Action>>,
    calculators: HashMap<String, Arc<dyn Calculator>>,
    events: HashMap<String, Arc<dyn EventBehavior>>,
    results: HashMap<String, Arc<dyn ResultBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_guard(&mut self, name: impl Into<String>, g: Arc<dyn Guard>) -> &mut Self {
        self.guards.insert(name.into(), g);
        self
    }

    pub fn register_action(&mut self, name: impl Into<String>, a: Arc<dyn Action>) -> &mut Self {
        self.actions.insert(name.into(), a);
        self
    }

    pub fn register_calculator(&mut self, name: impl Into<String>, c: Arc<dyn Calculator>) -> &mut Self {
        self.calculators.insert(name.into(), c);
        self
    }

    pub fn register_event(&mut self, name: impl Into<String>, e: Arc<dyn EventBehavior>) -> &mut Self {
        self.events.insert(name.into(), e);
        self
    }

    pub fn register_result(&mut self, name: impl Into<String>, r: Arc<dyn ResultBehavior>) -> &mut Self {
        self.results.insert(name.into(), r);
        self
    }

    pub fn guard(&self, name: &str) -> Result<Arc<dyn Guard>, CoreError> {
        self.guards
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::BehaviorNotFound(name.to_string()))
    }

    pub fn action(&self, name: &str) -> Result<Arc<dyn Action>, CoreError> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::BehaviorNotFound(name.to_string()))
    }

    pub fn calculator(&self, name: &str) -> Result<Arc<dyn Calculator>, CoreError> {
        self.calculators
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::BehaviorNotFound(name.to_string()))
    }

    pub fn event(&self, name: &str) -> Option<Arc<dyn EventBehavior>> {
        self.events.get(name).cloned()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    pub fn result(&self, name: &str) -> Result<Arc<dyn ResultBehavior>, CoreError> {
        self.results
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::BehaviorNotFound(name.to_string()))
    }
}
