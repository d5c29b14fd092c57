//! Two-pass compiler: pass 1 walks the config and records
//! `StateNode`s by qualified path; pass 2 resolves transition targets
//! against the id map so forward references to not-yet-visited siblings
//! succeed. The compiler is the only place that consults the raw config;
//! everything downstream operates on the compiled tree.

use crate::behavior::BehaviorRegistry;
use crate::config::validate;
use crate::constants::{ALWAYS_EVENT, ENGINE_VERSION};
use crate::errors::ConfigError;
use crate::hashing::hash_value;
use crate::model::state::{MachineDefinition, StateId, StateKind, StateNode};
use crate::model::transition::{BehaviorRef, TransitionDefinition, TransitionSet};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub fn compile(config: &Value, behavior: Arc<BehaviorRegistry>) -> Result<MachineDefinition, ConfigError> {
    validate(config, &behavior)?;

    let id = config
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("machine")
        .to_string();
    let delimiter = config
        .get("delimiter")
        .and_then(|v| v.as_str())
        .and_then(|s| s.chars().next())
        .unwrap_or('.');
    let version = config.get("version").and_then(|v| v.as_str()).map(String::from);
    let should_persist = config
        .get("should_persist")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let scenarios_enabled = config
        .get("scenarios_enabled")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut nodes: Vec<StateNode> = Vec::new();
    let mut raw_configs: Vec<Value> = Vec::new();
    let mut id_map: HashMap<String, StateId> = HashMap::new();

    let root = build_node(
        config,
        None,
        &id,
        &mut nodes,
        &mut raw_configs,
        &mut id_map,
        true,
    );

    let mut errors = Vec::new();
    for i in 0..nodes.len() {
        resolve_transitions(i, &raw_configs[i], &id_map, &mut nodes, &mut errors);
    }
    if let Some(e) = ConfigError::from_many(errors) {
        return Err(e);
    }

    for i in 0..nodes.len() {
        let types: Vec<String> = nodes[i].transitions.keys().cloned().collect();
        nodes[i].unique_event_types = types;
    }

    let shape = json!({
        "engine_version": ENGINE_VERSION,
        "id": id,
        "delimiter": delimiter.to_string(),
        "tree": nodes.iter().map(describe_node).collect::<Vec<_>>(),
    });
    let definition_hash = hash_value(&shape);

    Ok(MachineDefinition {
        id,
        delimiter,
        version,
        root,
        nodes,
        id_map,
        behavior,
        should_persist,
        scenarios_enabled,
        definition_hash,
    })
}

fn describe_node(n: &StateNode) -> Value {
    json!({
        "id": n.qualified_id,
        "kind": format!("{:?}", n.kind),
        "entry": n.entry_actions.iter().map(|b| b.to_string()).collect::<Vec<_>>(),
        "exit": n.exit_actions.iter().map(|b| b.to_string()).collect::<Vec<_>>(),
        "events": { let mut v: Vec<String> = n.transitions.keys().cloned().collect(); v.sort(); v },
    })
}

fn coerce_actions(v: Option<&Value>) -> Vec<BehaviorRef> {
    match v {
        None => vec![],
        Some(Value::String(s)) => vec![BehaviorRef::parse(s)],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|x| x.as_str())
            .map(BehaviorRef::parse)
            .collect(),
        Some(_) => vec![],
    }
}

fn build_node(
    cfg: &Value,
    parent: Option<StateId>,
    qualified_id: &str,
    nodes: &mut Vec<StateNode>,
    raw_configs: &mut Vec<Value>,
    id_map: &mut HashMap<String, StateId>,
    is_root: bool,
) -> StateId {
    let obj = cfg.as_object();
    let kind = infer_kind(obj, is_root);

    let my_id = StateId(nodes.len());
    nodes.push(StateNode {
        id: my_id,
        qualified_id: qualified_id.to_string(),
        kind,
        parent,
        children: IndexMap::new(),
        initial_child_key: obj
            .and_then(|o| o.get("initial"))
            .and_then(|v| v.as_str())
            .map(String::from),
        entry_actions: coerce_actions(obj.and_then(|o| o.get("entry"))),
        exit_actions: coerce_actions(obj.and_then(|o| o.get("exit"))),
        transitions: HashMap::new(),
        on_done: None,
        result: obj
            .and_then(|o| o.get("result"))
            .and_then(|v| v.as_str())
            .map(BehaviorRef::parse),
        meta: obj.and_then(|o| o.get("meta")).cloned().unwrap_or(Value::Null),
        unique_event_types: Vec::new(),
    });
    raw_configs.push(cfg.clone());
    id_map.insert(qualified_id.to_string(), my_id);

    let delim = ".";
    if let Some(states) = obj.and_then(|o| o.get("states")).and_then(|s| s.as_object()) {
        let mut children = IndexMap::new();
        for (key, child_cfg) in states {
            let child_qualified = format!("{qualified_id}{delim}{key}");
            let child_id = build_node(child_cfg, Some(my_id), &child_qualified, nodes, raw_configs, id_map, false);
            children.insert(key.clone(), child_id);
        }
        nodes[my_id.0].children = children;
    }

    my_id
}

fn infer_kind(obj: Option<&serde_json::Map<String, Value>>, is_root: bool) -> StateKind {
    if let Some(t) = obj.and_then(|o| o.get("type")).and_then(|v| v.as_str()) {
        return match t {
            "parallel" => StateKind::Parallel,
            "final" => StateKind::Final,
            "atomic" => StateKind::Atomic,
            _ => StateKind::Compound,
        };
    }
    let has_states = obj
        .and_then(|o| o.get("states"))
        .and_then(|s| s.as_object())
        .map(|m| !m.is_empty())
        .unwrap_or(false);
    if has_states || is_root {
        StateKind::Compound
    } else {
        StateKind::Atomic
    }
}

fn resolve_target(raw: &str, from_path: &str, id_map: &HashMap<String, StateId>) -> Result<StateId, ConfigError> {
    // Accept either a fully qualified id already present in the map, or a
    // sibling-relative name resolved against the transition's own state
    // path (walking up from the deepest prefix that resolves).
    if let Some(&id) = id_map.get(raw) {
        return Ok(id);
    }
    let mut prefix = from_path.to_string();
    while let Some(pos) = prefix.rfind('.') {
        prefix.truncate(pos);
        let candidate = format!("{prefix}.{raw}");
        if let Some(&id) = id_map.get(&candidate) {
            return Ok(id);
        }
    }
    Err(ConfigError::UnresolvedTarget {
        path: from_path.to_string(),
        target: raw.to_string(),
    })
}

fn build_transition(
    entry: &Value,
    from_path: &str,
    id_map: &HashMap<String, StateId>,
    errors: &mut Vec<ConfigError>,
) -> Option<TransitionDefinition> {
    let target_raw = match entry {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Object(o) => o.get("target").and_then(|v| v.as_str()).map(String::from),
        _ => None,
    };
    let target = match target_raw {
        Some(raw) => match resolve_target(&raw, from_path, id_map) {
            Ok(id) => Some(id),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        None => None,
    };
    let obj = entry.as_object();
    let guards = obj
        .and_then(|o| o.get("guards"))
        .map(|v| coerce_actions(Some(v)))
        .unwrap_or_default();
    let calculators = obj
        .and_then(|o| o.get("calculators"))
        .map(|v| coerce_actions(Some(v)))
        .unwrap_or_default();
    let actions = obj
        .and_then(|o| o.get("actions"))
        .map(|v| coerce_actions(Some(v)))
        .unwrap_or_default();
    Some(TransitionDefinition {
        target,
        guards,
        calculators,
        actions,
    })
}

fn resolve_transitions(
    idx: usize,
    cfg: &Value,
    id_map: &HashMap<String, StateId>,
    nodes: &mut [StateNode],
    errors: &mut Vec<ConfigError>,
) {
    let qualified = nodes[idx].qualified_id.clone();
    let obj = cfg.as_object();

    if let Some(on) = obj.and_then(|o| o.get("on")).and_then(|v| v.as_object()) {
        let mut transitions = HashMap::new();
        for (event_type, tval) in on {
            let path = format!("{qualified}.on.{event_type}");
            let set = match tval {
                Value::Array(list) => {
                    let defs: Vec<TransitionDefinition> = list
                        .iter()
                        .filter_map(|e| build_transition(e, &path, id_map, errors))
                        .collect();
                    TransitionSet::Guarded(defs)
                }
                other => match build_transition(other, &path, id_map, errors) {
                    Some(t) => TransitionSet::Single(t),
                    None => continue,
                },
            };
            transitions.insert(event_type.clone(), set);
        }
        nodes[idx].transitions = transitions;
    }

    if let Some(on_done) = obj.and_then(|o| o.get("onDone")) {
        let path = format!("{qualified}.onDone");
        nodes[idx].on_done = build_transition(on_done, &path, id_map, errors);
    }

    let _ = ALWAYS_EVENT;
}
