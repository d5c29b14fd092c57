//! Duck-typed context container.
//!
//! The untyped form is a plain JSON map under key `"data"`; the typed form
//! layers a pluggable `ContextValidator` on top of the same storage. Both
//! expose the single `get/set/has/remove/as_map/validate` surface: validation
//! is a pluggable strategy, not a language feature.

use crate::errors::ValidationError;
use serde_json::{Map, Value};

pub trait ContextView {
    fn get(&self, key: &str) -> Option<&Value>;
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
    fn as_map(&self) -> &Map<String, Value>;
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

pub trait ContextMut: ContextView {
    fn set(&mut self, key: &str, value: Value);
    fn remove(&mut self, key: &str) -> Option<Value>;
}

/// Untyped context: a bare `serde_json::Map` stored, per spec's literal
/// wording, "under key `data`" when serialized as a whole (see
/// `MapContext::as_wire_value`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapContext {
    data: Map<String, Value>,
}

impl MapContext {
    pub fn new() -> Self {
        Self { data: Map::new() }
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// The wire shape persisted by the event log: `{"data": {...}}`.
    pub fn as_wire_value(&self) -> Value {
        Value::Object(Map::from_iter([("data".to_string(), Value::Object(self.data.clone()))]))
    }

    pub fn from_wire_value(v: &Value) -> Self {
        let inner = v
            .as_object()
            .and_then(|m| m.get("data"))
            .and_then(|d| d.as_object())
            .cloned()
            .unwrap_or_default();
        Self { data: inner }
    }
}

impl ContextView for MapContext {
    fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
    fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }
}

impl ContextMut for MapContext {
    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }
    fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }
}

/// A pluggable validation strategy for typed contexts.
pub trait ContextValidator: std::fmt::Debug {
    fn validate(&self, data: &Map<String, Value>) -> Result<(), ValidationError>;
}

/// Typed context: same storage as `MapContext`, plus a validator invoked by
/// `validate()`. Run by the engine after every calculator/action that
/// mutates context.
#[derive(Debug, Clone)]
pub struct ValidatedContext<V: ContextValidator + Clone> {
    inner: MapContext,
    validator: V,
}

impl<V: ContextValidator + Clone> ValidatedContext<V> {
    pub fn new(validator: V) -> Self {
        Self {
            inner: MapContext::new(),
            validator,
        }
    }

    pub fn from_map(data: Map<String, Value>, validator: V) -> Self {
        Self {
            inner: MapContext::from_map(data),
            validator,
        }
    }
}

impl<V: ContextValidator + Clone> ContextView for ValidatedContext<V> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }
    fn as_map(&self) -> &Map<String, Value> {
        self.inner.as_map()
    }
    fn validate(&self) -> Result<(), ValidationError> {
        self.validator.validate(self.inner.as_map())
    }
}

impl<V: ContextValidator + Clone> ContextMut for ValidatedContext<V> {
    fn set(&mut self, key: &str, value: Value) {
        self.inner.set(key, value);
    }
    fn remove(&mut self, key: &str) -> Option<Value> {
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Behavior, BehaviorRegistry, Calculator};
    use crate::compile::compile;
    use crate::engine::step;
    use crate::model::event::{EventInput, RuntimeState};
    use serde_json::json;
    use std::sync::Arc;
    use ulid::Ulid;

    /// Requires `count` present as a non-negative number.
    #[derive(Debug, Clone)]
    struct CountNonNegative;

    impl ContextValidator for CountNonNegative {
        fn validate(&self, data: &Map<String, Value>) -> Result<(), ValidationError> {
            match data.get("count").and_then(Value::as_i64) {
                Some(n) if n >= 0 => Ok(()),
                _ => {
                    let mut err = ValidationError::new();
                    err.insert("INC", "count must be a non-negative number");
                    Err(err)
                }
            }
        }
    }

    struct Increment;
    impl Behavior for Increment {}
    impl Calculator for Increment {
        fn calculate(
            &self,
            ctx: &mut dyn ContextMut,
            _event: &EventInput,
            _state: &crate::model::state::StateNode,
            _arg: Option<&str>,
        ) {
            let current = ctx.get("count").and_then(Value::as_i64).unwrap_or(0);
            ctx.set("count", json!(current + 1));
        }
    }

    #[test]
    fn validated_context_round_trip() {
        let valid = ValidatedContext::from_map(Map::from_iter([("count".to_string(), json!(0))]), CountNonNegative);
        assert!(valid.validate().is_ok());

        let invalid = ValidatedContext::from_map(Map::from_iter([("count".to_string(), json!(-1))]), CountNonNegative);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn validated_context_drives_the_engine_through_step() {
        let mut registry = BehaviorRegistry::new();
        registry.register_calculator("increment", Arc::new(Increment));
        let config = json!({
            "id": "counter",
            "initial": "idle",
            "states": {
                "idle": { "on": { "INC": { "target": "idle", "calculators": ["increment"] } } }
            }
        });
        let def = compile(&config, Arc::new(registry)).expect("compiles");

        let context = ValidatedContext::from_map(Map::from_iter([("count".to_string(), json!(0))]), CountNonNegative);
        let mut state: RuntimeState<ValidatedContext<CountNonNegative>> =
            RuntimeState::new(vec![def.root], context, def.root);

        let root = Ulid::new();
        step(&def, &mut state, root, EventInput::external("INC", None)).expect("step succeeds");
        step(&def, &mut state, root, EventInput::external("INC", None)).expect("step succeeds");

        assert_eq!(state.context.get("count"), Some(&json!(2)));
        assert!(state.context.validate().is_ok());
    }
}
