//! `Restorer`: rebuilds `RuntimeState` from a `MachineEvent`
//! history, falling back to the archive when the active log is empty.

use crate::errors::{EventLogError, RestoreFailure};
use crate::event_log::{merge_context, EventLog};
use crate::model::context::MapContext;
use crate::model::event::{EventInput, RuntimeState};
use crate::model::state::{MachineDefinition, StateId};
use serde_json::Map;
use ulid::Ulid;

/// Eligibility, archive, restore, and cleanup operations a backend must
/// provide. Implemented against Postgres by
/// `hsm-persistence::PgArchiveService`; `hsm-core` only needs the contract
/// to drive `restore()` below.
pub trait ArchiveService: Send + Sync {
    fn is_eligible(&self, root_event_id: Ulid) -> Result<bool, EventLogError>;

    /// Root event ids eligible for archival, oldest first, capped at `limit`.
    fn eligible_instances(&self, limit: usize) -> Result<Vec<Ulid>, EventLogError>;

    /// Archives `root_event_id`'s active records and deletes them from the
    /// active log, in one transaction. Returns `false` when archival is
    /// disabled, the instance is already archived, or it has no events.
    fn archive(&self, root_event_id: Ulid) -> Result<bool, EventLogError>;

    /// Read-only lookup: does not remove the archived blob.
    fn restore(&self, root_event_id: Ulid) -> Result<Option<Vec<crate::model::event::MachineEvent>>, EventLogError>;

    /// Rehydrates into the active log and removes the archive blob, for the
    /// mid-`send` case where the instance is about to keep running.
    fn restore_and_delete(
        &self,
        root_event_id: Ulid,
    ) -> Result<Option<Vec<crate::model::event::MachineEvent>>, EventLogError>;

    /// Archives every id `eligible_instances(limit)` returns, honouring the
    /// same cooldown, and tallies the outcome under the three keys spec
    /// §4.7 names.
    fn batch_archive(&self, limit: usize) -> Result<BatchArchiveOutcome, EventLogError>;

    fn cleanup(&self, older_than_days: i64) -> Result<usize, EventLogError>;
}

/// Tally returned by `ArchiveService::batch_archive`: `archived` succeeded,
/// `skipped` were already archived/disabled/empty (not failures), `failed`
/// errored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchArchiveOutcome {
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Whether a restore is for a read-only inspection or because the caller is
/// about to `send` another event against the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    ReadOnly,
    ForSend,
}

/// Rebuilds `context`, `current_state_definition`, `current_event_behavior`,
/// and `value` from `root_event_id`'s event history.
///
/// Queries the active log first; on an empty result, falls back to the
/// archive, using `restore_and_delete` semantics for `RestoreMode::ForSend`
/// (rehydrated instances resume in the active log) and read-only `restore`
/// otherwise.
pub fn restore(
    def: &MachineDefinition,
    root_event_id: Ulid,
    log: &dyn EventLog,
    archive: &dyn ArchiveService,
    mode: RestoreMode,
) -> Result<RuntimeState<MapContext>, RestoreFailure> {
    let mut events = log.list(root_event_id)?;

    if events.is_empty() {
        let archived = match mode {
            RestoreMode::ForSend => archive.restore_and_delete(root_event_id)?,
            RestoreMode::ReadOnly => archive.restore(root_event_id)?,
        };
        events = archived.ok_or_else(|| RestoreFailure::NotFound(root_event_id.to_string()))?;
    }

    if events.is_empty() {
        return Err(RestoreFailure::NotFound(root_event_id.to_string()));
    }

    let mut context = Map::new();
    for ev in &events {
        if let Some(diff) = &ev.context {
            merge_context(&mut context, diff);
        }
    }

    let last = events.last().expect("checked non-empty above");
    let value: Vec<StateId> = last
        .machine_value
        .iter()
        .filter_map(|qualified| def.by_qualified_id(qualified))
        .collect();
    if value.is_empty() || value.len() != last.machine_value.len() {
        return Err(RestoreFailure::CorruptArchive(
            root_event_id.to_string(),
            format!("machine_value {:?} does not resolve against the compiled definition", last.machine_value),
        ));
    }

    let current_state_definition = if value.len() == 1 {
        value[0]
    } else {
        value
            .iter()
            .copied()
            .reduce(|a, b| def.nearest_common_ancestor(a, b))
            .unwrap_or(def.root)
    };

    let current_event_behavior = Some(EventInput {
        event_type: last.event_type.clone(),
        payload: last.payload.clone(),
        source: last.source,
        transactional: true,
    });

    Ok(RuntimeState {
        value,
        context: MapContext::from_map(context),
        current_state_definition,
        current_event_behavior,
        history: events,
    })
}

/// No-op archive backend: always ineligible, nothing to restore. Mirrors
/// `NoopConcurrencyGate`'s role as the non-durable parity stand-in for
/// callers that only wire an `EventLog` (in-memory tests, `hsm-cli`'s
/// default mode without Postgres configured).
pub struct NoopArchiveService;

impl ArchiveService for NoopArchiveService {
    fn is_eligible(&self, _root_event_id: Ulid) -> Result<bool, EventLogError> {
        Ok(false)
    }
    fn eligible_instances(&self, _limit: usize) -> Result<Vec<Ulid>, EventLogError> {
        Ok(Vec::new())
    }
    fn archive(&self, _root_event_id: Ulid) -> Result<bool, EventLogError> {
        Ok(false)
    }
    fn restore(&self, _root_event_id: Ulid) -> Result<Option<Vec<crate::model::event::MachineEvent>>, EventLogError> {
        Ok(None)
    }
    fn restore_and_delete(
        &self,
        _root_event_id: Ulid,
    ) -> Result<Option<Vec<crate::model::event::MachineEvent>>, EventLogError> {
        Ok(None)
    }
    fn batch_archive(&self, _limit: usize) -> Result<BatchArchiveOutcome, EventLogError> {
        Ok(BatchArchiveOutcome::default())
    }
    fn cleanup(&self, _older_than_days: i64) -> Result<usize, EventLogError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorRegistry;
    use crate::compile::compile;
    use crate::event_log::InMemoryEventLog;
    use crate::model::event::{EventSource, MachineEvent};
    use serde_json::json;
    use std::sync::Arc;

    struct NoArchive;
    impl ArchiveService for NoArchive {
        fn is_eligible(&self, _: Ulid) -> Result<bool, EventLogError> {
            Ok(false)
        }
        fn eligible_instances(&self, _: usize) -> Result<Vec<Ulid>, EventLogError> {
            Ok(vec![])
        }
        fn archive(&self, _: Ulid) -> Result<bool, EventLogError> {
            Ok(false)
        }
        fn restore(&self, _: Ulid) -> Result<Option<Vec<MachineEvent>>, EventLogError> {
            Ok(None)
        }
        fn restore_and_delete(&self, _: Ulid) -> Result<Option<Vec<MachineEvent>>, EventLogError> {
            Ok(None)
        }
        fn batch_archive(&self, _: usize) -> Result<BatchArchiveOutcome, EventLogError> {
            Ok(BatchArchiveOutcome::default())
        }
        fn cleanup(&self, _: i64) -> Result<usize, EventLogError> {
            Ok(0)
        }
    }

    fn toggle_def() -> MachineDefinition {
        let cfg = json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": {"on": {"FLIP": "on"}},
                "on": {"on": {"FLIP": "off"}}
            }
        });
        compile(&cfg, Arc::new(BehaviorRegistry::new())).unwrap()
    }

    #[test]
    fn restore_rebuilds_value_and_context_from_log() {
        let def = toggle_def();
        let log = InMemoryEventLog::new();
        let root = Ulid::new();
        let off = def.by_qualified_id("toggle.off").unwrap();
        let on = def.by_qualified_id("toggle.on").unwrap();

        let e1 = MachineEvent::new(
            root, 1, "toggle", vec![def.node(off).qualified_id.clone()],
            EventSource::External, "toggle.machine.start", None,
            Some(json!({"count": 0}).as_object().unwrap().clone()), None,
        );
        let e2 = MachineEvent::new(
            root, 2, "toggle", vec![def.node(on).qualified_id.clone()],
            EventSource::External, "FLIP", None,
            Some(json!({"count": 1}).as_object().unwrap().clone()), None,
        );
        log.append_batch(root, &[e1, e2]).unwrap();

        let state = restore(&def, root, &log, &NoArchive, RestoreMode::ReadOnly).unwrap();
        assert_eq!(state.value, vec![on]);
        assert_eq!(state.context.as_map().get("count").unwrap(), &json!(1));
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn restore_fails_not_found_when_no_log_or_archive_entry() {
        let def = toggle_def();
        let log = InMemoryEventLog::new();
        let err = restore(&def, Ulid::new(), &log, &NoArchive, RestoreMode::ReadOnly).unwrap_err();
        assert!(matches!(err, RestoreFailure::NotFound(_)));
    }
}
