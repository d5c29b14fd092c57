//! `ConfigValidator`: a pure function over the raw configuration
//! map. Errors accumulate into `ConfigError::Many` instead of aborting at
//! the first offense.

use crate::behavior::BehaviorRegistry;
use crate::constants::ALWAYS_EVENT;
use crate::errors::ConfigError;
use serde_json::Value;

const ROOT_ONLY_KEYS: &[&str] = &["id", "delimiter", "version", "should_persist", "scenarios_enabled"];
const STATE_KEYS: &[&str] = &[
    "type", "initial", "states", "on", "entry", "exit", "onDone", "result", "meta",
];
const TRANSITION_KEYS: &[&str] = &["target", "guards", "calculators", "actions"];

/// Validates `config` and returns `Ok(())` or an accumulated
/// `ConfigError::Many`.
pub fn validate(config: &Value, registry: &BehaviorRegistry) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    let obj = match config.as_object() {
        Some(o) => o,
        None => {
            return Err(ConfigError::InvalidShape {
                path: "<root>".to_string(),
            })
        }
    };

    for key in obj.keys() {
        if !ROOT_ONLY_KEYS.contains(&key.as_str()) && !STATE_KEYS.contains(&key.as_str()) {
            errors.push(ConfigError::UnknownKey {
                path: "<root>".to_string(),
                key: key.clone(),
            });
        }
    }

    if let Some(id) = obj.get("id") {
        if id.as_str().map(|s| s.is_empty()).unwrap_or(true) {
            errors.push(ConfigError::EmptyMachineId);
        }
    }

    if let Some(d) = obj.get("delimiter") {
        if d.as_str().map(|s| s.chars().count() != 1).unwrap_or(true) {
            errors.push(ConfigError::InvalidDelimiter);
        }
    }

    validate_state("<root>", config, registry, &mut errors, true);

    match ConfigError::from_many(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn validate_state(
    path: &str,
    state: &Value,
    registry: &BehaviorRegistry,
    errors: &mut Vec<ConfigError>,
    is_root: bool,
) {
    let obj = match state.as_object() {
        Some(o) => o,
        None => {
            errors.push(ConfigError::InvalidShape {
                path: path.to_string(),
            });
            return;
        }
    };

    for key in obj.keys() {
        let allowed = STATE_KEYS.contains(&key.as_str()) || (is_root && ROOT_ONLY_KEYS.contains(&key.as_str()));
        if !allowed {
            errors.push(ConfigError::UnknownKey {
                path: path.to_string(),
                key: key.clone(),
            });
        }
    }

    if obj.contains_key(ALWAYS_EVENT) {
        errors.push(ConfigError::AlwaysOutsideOn {
            path: path.to_string(),
        });
    }

    let kind = infer_kind(obj, is_root);

    match kind {
        "final" => {
            if obj.contains_key("on") || obj.contains_key("states") {
                errors.push(ConfigError::FinalHasChildrenOrTransitions {
                    path: path.to_string(),
                });
            }
        }
        "parallel" => {
            if obj.contains_key("initial") {
                errors.push(ConfigError::ParallelHasInitial {
                    path: path.to_string(),
                });
            }
            match obj.get("states").and_then(|s| s.as_object()) {
                Some(m) if !m.is_empty() => {
                    for (ckey, cval) in m {
                        validate_state(&format!("{path}.states.{ckey}"), cval, registry, errors, false);
                    }
                }
                _ => errors.push(ConfigError::ParallelEmptyStates {
                    path: path.to_string(),
                }),
            }
        }
        "compound" => {
            if !obj.contains_key("initial") {
                errors.push(ConfigError::CompoundMissingInitial {
                    path: path.to_string(),
                });
            }
            if let Some(m) = obj.get("states").and_then(|s| s.as_object()) {
                if let Some(initial) = obj.get("initial").and_then(|v| v.as_str()) {
                    if !m.contains_key(initial) {
                        errors.push(ConfigError::UnknownInitialChild {
                            path: path.to_string(),
                            child: initial.to_string(),
                        });
                    }
                }
                for (ckey, cval) in m {
                    validate_state(&format!("{path}.states.{ckey}"), cval, registry, errors, false);
                }
            } else if obj.contains_key("states") {
                errors.push(ConfigError::InvalidShape {
                    path: format!("{path}.states"),
                });
            }
        }
        _ => {}
    }

    if let Some(on) = obj.get("on").and_then(|v| v.as_object()) {
        for (event_type, tval) in on {
            validate_transition_entry(&format!("{path}.on.{event_type}"), tval, registry, errors);
        }
    }

    if let Some(on_done) = obj.get("onDone") {
        validate_transition_shape(&format!("{path}.onDone"), on_done, errors);
    }
}

fn infer_kind<'a>(obj: &'a serde_json::Map<String, Value>, is_root: bool) -> &'a str {
    if let Some(t) = obj.get("type").and_then(|v| v.as_str()) {
        return t;
    }
    if obj.contains_key("states") || is_root {
        "compound"
    } else {
        "atomic"
    }
}

fn validate_transition_entry(
    path: &str,
    tval: &Value,
    registry: &BehaviorRegistry,
    errors: &mut Vec<ConfigError>,
) {
    match tval {
        Value::Array(list) => {
            if list.is_empty() {
                errors.push(ConfigError::EmptyGuardedList {
                    path: path.to_string(),
                });
                return;
            }
            for (i, entry) in list.iter().enumerate() {
                let has_guards = entry
                    .as_object()
                    .and_then(|o| o.get("guards"))
                    .and_then(|g| g.as_array())
                    .map(|a| !a.is_empty())
                    .unwrap_or(false);
                if !has_guards && i != list.len() - 1 {
                    errors.push(ConfigError::NonTerminalDefault {
                        path: path.to_string(),
                    });
                }
                validate_transition_shape(&format!("{path}[{i}]"), entry, errors);
            }
        }
        _ => validate_transition_shape(path, tval, errors),
    }
    let _ = registry; // event-type symbolic-vs-class-name acceptance is checked at compile time.
}

fn validate_transition_shape(path: &str, tval: &Value, errors: &mut Vec<ConfigError>) {
    match tval {
        Value::String(_) | Value::Null => {}
        Value::Object(o) => {
            for key in o.keys() {
                if !TRANSITION_KEYS.contains(&key.as_str()) {
                    errors.push(ConfigError::UnknownKey {
                        path: path.to_string(),
                        key: key.clone(),
                    });
                }
            }
        }
        _ => errors.push(ConfigError::InvalidShape {
            path: path.to_string(),
        }),
    }
}
