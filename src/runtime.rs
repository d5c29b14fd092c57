//! `MachineRuntime`: the facade that drives the control flow:
//! `acquire lock(rootId) → step → persist → [validation surfacing] → release`.
//!
//! Adds the exclusive-lock bracket `hsm-persistence::RedisConcurrencyGate`
//! needs around that flow, and keeps persistence, archival, and locking
//! backend-agnostic through `hsm-core`'s `EventLog`/`ArchiveService`/
//! `ConcurrencyGate` traits rather than hard-wiring a specific driver into
//! the orchestrator.

use crate::errors::RuntimeError;
use crate::registry::MachineRegistry;
use hsm_core::{
    engine, restore, ArchiveService, ConcurrencyGate, EventInput, EventLogError, MachineDefinition, MapContext,
    RestoreMode, RuntimeState, ValidationError,
};
use std::sync::Arc;
use ulid::Ulid;

/// What a `send` produced: the instance id (freshly minted for a new
/// instance), its value as dotted qualified ids, and whether the event
/// actually moved anything. `NoTransition` is raised only when the caller
/// opts in via `require_transition`; by default an unhandled event is
/// silently a no-op.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub root_event_id: Ulid,
    pub value: Vec<String>,
    pub transitioned: bool,
}

pub struct MachineRuntime {
    registry: Arc<MachineRegistry>,
    log: Arc<dyn hsm_core::EventLog>,
    archive: Arc<dyn ArchiveService>,
    gate: Arc<dyn ConcurrencyGate>,
}

impl MachineRuntime {
    pub fn new(
        registry: Arc<MachineRegistry>,
        log: Arc<dyn hsm_core::EventLog>,
        archive: Arc<dyn ArchiveService>,
        gate: Arc<dyn ConcurrencyGate>,
    ) -> Self {
        Self { registry, log, archive, gate }
    }

    /// Applies `event` to an instance of `machine_id`, persists the new
    /// history, and surfaces any validation-guard failures that occurred,
    /// after, not instead of, the write.
    ///
    /// `root_event_id == None` creates a brand-new instance: a fresh id is
    /// minted and no lock is taken, since nothing else can yet know about it.
    /// `Some` restores the existing instance under the gate's exclusive lock
    /// first.
    ///
    /// `require_transition` maps to the opt-in `NoTransition`: the
    /// engine itself never raises it (an unhandled event silently leaves
    /// `value` unchanged), so the facade detects the no-op case by comparing
    /// `value` before and after and raises it only when the caller asked.
    pub fn send(
        &self,
        machine_id: &str,
        root_event_id: Option<Ulid>,
        event: EventInput,
        require_transition: bool,
    ) -> Result<SendOutcome, RuntimeError> {
        let def = self.machine(machine_id)?;

        let (root_event_id, mut state, _lock) = match root_event_id {
            Some(id) => {
                let lock = self.gate.acquire(id).map_err(RuntimeError::Core)?;
                let state = restore(&def, id, self.log.as_ref(), self.archive.as_ref(), RestoreMode::ForSend)
                    .map_err(RuntimeError::Restore)?;
                (id, state, Some(lock))
            }
            None => (Ulid::new(), fresh_state(&def), None),
        };

        let history_len_before = state.history.len();
        let value_before = state.value.clone();
        let transactional = event.transactional;

        match engine::step(&def, &mut state, root_event_id, event) {
            Ok(()) => {
                self.persist_and_check_validation(&def, root_event_id, &state, history_len_before)?;
            }
            Err(core_err) => {
                if !transactional && state.history.len() > history_len_before {
                    // Non-transactional: flush whatever the step recorded
                    // before failing, best-effort, and still surface the
                    // error that aborted it.
                    let _ = self.log.append_batch(root_event_id, &state.history[history_len_before..]);
                }
                return Err(RuntimeError::Core(core_err));
            }
        }

        let transitioned = state.value != value_before;
        if require_transition && !transitioned {
            return Err(RuntimeError::Core(hsm_core::CoreError::NoTransition {
                state: def.node(def.root).qualified_id.clone(),
                event: String::new(),
            }));
        }

        Ok(SendOutcome {
            root_event_id,
            value: qualified_value(&def, &state),
            transitioned,
        })
    }

    /// Read-only reconstruction of an instance's current value, without
    /// taking the lock or touching the active log (`RestoreMode::ReadOnly`).
    pub fn inspect(&self, machine_id: &str, root_event_id: Ulid) -> Result<SendOutcome, RuntimeError> {
        let def = self.machine(machine_id)?;
        let state = restore(&def, root_event_id, self.log.as_ref(), self.archive.as_ref(), RestoreMode::ReadOnly)
            .map_err(RuntimeError::Restore)?;
        Ok(SendOutcome {
            root_event_id,
            value: qualified_value(&def, &state),
            transitioned: false,
        })
    }

    fn machine(&self, machine_id: &str) -> Result<Arc<MachineDefinition>, RuntimeError> {
        self.registry.get(machine_id).ok_or_else(|| RuntimeError::UnknownMachine(machine_id.to_string()))
    }

    /// Writes the newly recorded suffix of `state.history` and, once the
    /// write has landed, scans exactly that suffix for failed validation
    /// guards: surfacing must happen after persistence, never instead of it.
    fn persist_and_check_validation(
        &self,
        def: &MachineDefinition,
        root_event_id: Ulid,
        state: &RuntimeState<MapContext>,
        history_len_before: usize,
    ) -> Result<(), RuntimeError> {
        let new_events = &state.history[history_len_before..];
        self.log.append_batch(root_event_id, new_events).map_err(RuntimeError::Log)?;

        let mut failures = ValidationError::new();
        let guard_fail_prefix = format!("{}.guard.", def.id);
        for ev in new_events {
            let Some(rest) = ev.event_type.strip_prefix(&guard_fail_prefix) else { continue };
            let Some(guard_name) = rest.strip_suffix(".fail") else { continue };
            let Ok(guard) = def.behavior.guard(guard_name) else { continue };
            if !guard.is_validation() {
                continue;
            }
            let Some(payload) = &ev.payload else { continue };
            if let Some(obj) = payload.as_object() {
                for (event_type, message) in obj {
                    failures.insert(event_type.clone(), message.as_str().unwrap_or_default());
                }
            }
        }
        if !failures.is_empty() {
            return Err(RuntimeError::Validation(failures));
        }
        Ok(())
    }
}

fn fresh_state(def: &MachineDefinition) -> RuntimeState<MapContext> {
    let value = def.initial_leaves(def.root);
    RuntimeState::new(value, MapContext::default(), def.root)
}

fn qualified_value(def: &MachineDefinition, state: &RuntimeState<MapContext>) -> Vec<String> {
    state.value.iter().map(|id| def.node(*id).qualified_id.clone()).collect()
}

impl From<EventLogError> for RuntimeError {
    fn from(e: EventLogError) -> Self {
        RuntimeError::Log(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsm_core::{Behavior, BehaviorRegistry, ContextView, Guard, GuardResult, InMemoryEventLog, NoopArchiveService, NoopConcurrencyGate};
    use serde_json::json;

    fn toggle_runtime() -> (MachineRuntime, String) {
        let registry = Arc::new(MachineRegistry::new());
        let behavior = Arc::new(BehaviorRegistry::default());
        let config = json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": { "on": { "FLIP": "on" } },
                "on": { "on": { "FLIP": "off" } }
            }
        });
        registry.compile(&config, behavior).expect("compiles");
        let runtime = MachineRuntime::new(
            registry,
            Arc::new(InMemoryEventLog::new()),
            Arc::new(NoopArchiveService),
            Arc::new(NoopConcurrencyGate),
        );
        (runtime, "toggle".to_string())
    }

    #[test]
    fn new_instance_then_send_flips_the_toggle() {
        let (runtime, machine_id) = toggle_runtime();
        let started = runtime.send(&machine_id, None, EventInput::external("FLIP", None), false).expect("create+send");
        assert_eq!(started.value, vec!["toggle.on".to_string()]);
        assert!(started.transitioned);

        let flipped = runtime
            .send(&machine_id, Some(started.root_event_id), EventInput::external("FLIP", None), false)
            .expect("send");
        assert_eq!(flipped.value, vec!["toggle.off".to_string()]);
    }

    #[test]
    fn send_against_unknown_machine_errors() {
        let (runtime, _machine_id) = toggle_runtime();
        let err = runtime.send("nope", None, EventInput::external("FLIP", None), false);
        assert!(matches!(err, Err(RuntimeError::UnknownMachine(_))));
    }

    #[test]
    fn unhandled_event_is_silent_unless_transition_required() {
        let (runtime, machine_id) = toggle_runtime();
        let started = runtime.send(&machine_id, None, EventInput::external("NOOP", None), false).expect("create");
        assert!(!started.transitioned);

        let silent = runtime
            .send(&machine_id, Some(started.root_event_id), EventInput::external("NOOP", None), false)
            .expect("silent no-op");
        assert!(!silent.transitioned);

        let loud = runtime.send(&machine_id, Some(started.root_event_id), EventInput::external("NOOP", None), true);
        assert!(matches!(loud, Err(RuntimeError::Core(hsm_core::CoreError::NoTransition { .. }))));
    }

    struct RejectEverything;
    impl Behavior for RejectEverything {}
    impl Guard for RejectEverything {
        fn check(&self, _ctx: &dyn ContextView, _event: &EventInput, _owner: &hsm_core::StateNode, _arg: Option<&str>) -> GuardResult {
            GuardResult::fail("not allowed")
        }
        fn is_validation(&self) -> bool {
            true
        }
    }

    #[test]
    fn validation_guard_failure_surfaces_after_persisting() {
        let registry = Arc::new(MachineRegistry::new());
        let mut behavior = BehaviorRegistry::default();
        behavior.register_guard("reject", Arc::new(RejectEverything));
        let config = json!({
            "id": "gated",
            "initial": "idle",
            "states": {
                "idle": { "on": { "SUBMIT": { "target": "done", "guards": ["reject"] } } },
                "done": {}
            }
        });
        registry.compile(&config, Arc::new(behavior)).expect("compiles");
        let log = Arc::new(InMemoryEventLog::new());
        let runtime = MachineRuntime::new(registry, log.clone(), Arc::new(NoopArchiveService), Arc::new(NoopConcurrencyGate));

        let result = runtime.send("gated", None, EventInput::external("SUBMIT", None), false);
        assert!(matches!(result, Err(RuntimeError::Validation(_))));
    }
}
