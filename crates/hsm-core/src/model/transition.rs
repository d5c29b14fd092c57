//! `TransitionDefinition` and the behavior-reference mini-language.

use super::state::StateId;
use serde::{Deserialize, Serialize};

/// A resolved reference to a guard/action/calculator/event/result, carrying
/// the optional `name:arg` suffix parsed once at compile time. The
/// parameter becomes a constructor argument rather than runtime reflection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct BehaviorRef {
    pub name: String,
    pub arg: Option<String>,
}

impl BehaviorRef {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((name, arg)) => BehaviorRef {
                name: name.to_string(),
                arg: Some(arg.to_string()),
            },
            None => BehaviorRef {
                name: raw.to_string(),
                arg: None,
            },
        }
    }
}

impl std::fmt::Display for BehaviorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arg {
            Some(a) => write!(f, "{}:{}", self.name, a),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A single resolved transition: an optional target plus the ordered
/// calculators/guards/actions that run around it.
///
/// `target == None` models an internal/self transition:
/// actions still run, but no state change occurs.
#[derive(Debug, Clone)]
pub struct TransitionDefinition {
    pub target: Option<StateId>,
    pub guards: Vec<BehaviorRef>,
    pub calculators: Vec<BehaviorRef>,
    pub actions: Vec<BehaviorRef>,
}

impl TransitionDefinition {
    pub fn is_guarded(&self) -> bool {
        !self.guards.is_empty()
    }
}

/// A state's `transitions` map value: either a single unconditional
/// transition, or an ordered list of guarded alternatives where only the
/// last entry may omit guards.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum TransitionSet {
    Single(TransitionDefinition),
    Guarded(Vec<TransitionDefinition>),
}

impl TransitionSet {
    /// Candidates in evaluation order.
    pub fn candidates(&self) -> &[TransitionDefinition] {
        match self {
            TransitionSet::Single(t) => std::slice::from_ref(t),
            TransitionSet::Guarded(v) => v,
        }
    }
}
