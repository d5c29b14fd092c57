//! `EventLog`: append-only storage for `MachineEvent`s,
//! plus the incremental context diff/merge helpers the persistence layer
//! uses when encoding/decoding records.
//!
//! Writes are performed as a batch at the end of each send, and the backend
//! is a fallible, upsert-by-`id` store rather than an infallible in-memory
//! `Vec` push.

use crate::errors::EventLogError;
use crate::model::event::MachineEvent;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use ulid::Ulid;

pub trait EventLog: Send + Sync {
    fn append_batch(&self, root_event_id: Ulid, events: &[MachineEvent]) -> Result<(), EventLogError>;

    /// Events for `root_event_id` in ascending `sequence_number` order.
    fn list(&self, root_event_id: Ulid) -> Result<Vec<MachineEvent>, EventLogError>;
}

/// Reference/testing implementation; the in-memory parity target for
/// `PgEventLog`.
#[derive(Default)]
pub struct InMemoryEventLog {
    inner: Mutex<HashMap<Ulid, Vec<MachineEvent>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for InMemoryEventLog {
    fn append_batch(&self, root_event_id: Ulid, events: &[MachineEvent]) -> Result<(), EventLogError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| EventLogError::new("in-memory event log lock poisoned"))?;
        guard.entry(root_event_id).or_default().extend_from_slice(events);
        Ok(())
    }

    fn list(&self, root_event_id: Ulid) -> Result<Vec<MachineEvent>, EventLogError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| EventLogError::new("in-memory event log lock poisoned"))?;
        Ok(guard.get(&root_event_id).cloned().unwrap_or_default())
    }
}

/// Keys present in `next` but absent or changed relative to `prev`, recursive
/// diff. Values that differ recurse when both sides are objects; otherwise
/// `next`'s value wins outright.
pub fn diff_context(prev: &Map<String, Value>, next: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, next_val) in next {
        match prev.get(key) {
            Some(prev_val) if prev_val == next_val => continue,
            Some(Value::Object(prev_obj)) => {
                if let Value::Object(next_obj) = next_val {
                    let nested = diff_context(prev_obj, next_obj);
                    if !nested.is_empty() {
                        out.insert(key.clone(), Value::Object(nested));
                    }
                } else {
                    out.insert(key.clone(), next_val.clone());
                }
            }
            _ => {
                out.insert(key.clone(), next_val.clone());
            }
        }
    }
    out
}

/// Applies a recursive merge of a diff on top of a base context, in
/// `sequence_number` order as records are replayed.
pub fn merge_context(base: &mut Map<String, Value>, diff: &Map<String, Value>) {
    for (key, diff_val) in diff {
        match (base.get_mut(key), diff_val) {
            (Some(Value::Object(base_obj)), Value::Object(diff_obj)) => {
                merge_context(base_obj, diff_obj);
            }
            _ => {
                base.insert(key.clone(), diff_val.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_only_captures_changed_and_new_keys() {
        let prev = json!({"a": 1, "b": {"x": 1, "y": 2}}).as_object().unwrap().clone();
        let next = json!({"a": 1, "b": {"x": 1, "y": 3}, "c": 4}).as_object().unwrap().clone();
        let diff = diff_context(&prev, &next);
        assert_eq!(diff, json!({"b": {"y": 3}, "c": 4}).as_object().unwrap().clone());
    }

    #[test]
    fn merge_reconstructs_next_from_prev_and_diff() {
        let mut base = json!({"a": 1, "b": {"x": 1, "y": 2}}).as_object().unwrap().clone();
        let diff = json!({"b": {"y": 3}, "c": 4}).as_object().unwrap().clone();
        merge_context(&mut base, &diff);
        assert_eq!(base, json!({"a": 1, "b": {"x": 1, "y": 3}, "c": 4}).as_object().unwrap().clone());
    }

    #[test]
    fn in_memory_log_appends_and_lists_in_order() {
        use crate::model::event::{EventSource, MachineEvent};

        let log = InMemoryEventLog::new();
        let root = Ulid::new();
        let e1 = MachineEvent::new(root, 1, "m", vec!["m.a".into()], EventSource::External, "m.machine.start", None, None, None);
        let e2 = MachineEvent::new(root, 2, "m", vec!["m.a".into()], EventSource::External, "go", None, None, None);
        log.append_batch(root, &[e1, e2]).unwrap();
        let got = log.list(root).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].sequence_number, 1);
        assert_eq!(got[1].sequence_number, 2);
    }
}
