//! `TransitionEngine`: the step algorithm that consumes an
//! event plus the current state and produces a new state.

mod step;

pub use step::{step, RaiseQueue};

#[cfg(test)]
mod tests {
    use crate::behavior::{Action, Behavior, BehaviorRegistry, ContextValueKind, Guard, GuardResult, RaiseSink};
    use crate::compile::compile;
    use crate::engine::step;
    use crate::model::context::{ContextMut, ContextView, MapContext};
    use crate::model::event::{EventInput, RuntimeState};
    use crate::model::state::MachineDefinition;
    use serde_json::json;
    use std::sync::Arc;
    use ulid::Ulid;

    fn fresh_state(def: &MachineDefinition) -> RuntimeState<MapContext> {
        let value = def.initial_leaves(def.root);
        let current_state_definition = if value.len() == 1 {
            value[0]
        } else {
            def.nearest_parallel_ancestor(value[0]).unwrap_or(def.root)
        };
        RuntimeState::new(value, MapContext::new(), current_state_definition)
    }

    fn values(def: &MachineDefinition, state: &RuntimeState<MapContext>) -> Vec<String> {
        let mut v: Vec<String> = state.value.iter().map(|&s| def.node(s).qualified_id.clone()).collect();
        v.sort();
        v
    }

    /// S1: a plain two-state toggle transitions on a single event.
    #[test]
    fn basic_transition_moves_to_target_state() {
        let cfg = json!({
            "id": "toggle",
            "initial": "off",
            "states": {
                "off": {"on": {"FLIP": "on"}},
                "on": {"on": {"FLIP": "off"}}
            }
        });
        let def = compile(&cfg, Arc::new(BehaviorRegistry::new())).unwrap();
        let mut state = fresh_state(&def);
        let root = Ulid::new();

        step(&def, &mut state, root, EventInput::external("FLIP", None)).unwrap();
        assert_eq!(values(&def, &state), vec!["toggle.on"]);

        step(&def, &mut state, root, EventInput::external("FLIP", None)).unwrap();
        assert_eq!(values(&def, &state), vec!["toggle.off"]);
    }

    /// S2/S3: a parallel machine enters one leaf per region, and an event
    /// handled in one region leaves the other untouched.
    #[test]
    fn parallel_regions_initialize_and_transition_independently() {
        let cfg = json!({
            "id": "dashboard",
            "type": "parallel",
            "states": {
                "network": {
                    "initial": "offline",
                    "states": {
                        "offline": {"on": {"CONNECT": "online"}},
                        "online": {}
                    }
                },
                "session": {
                    "initial": "guest",
                    "states": {
                        "guest": {"on": {"LOGIN": "member"}},
                        "member": {}
                    }
                }
            }
        });
        let def = compile(&cfg, Arc::new(BehaviorRegistry::new())).unwrap();
        let mut state = fresh_state(&def);
        assert_eq!(values(&def, &state), vec!["dashboard.network.offline", "dashboard.session.guest"]);

        let root = Ulid::new();
        step(&def, &mut state, root, EventInput::external("CONNECT", None)).unwrap();
        assert_eq!(values(&def, &state), vec!["dashboard.network.online", "dashboard.session.guest"]);
    }

    #[derive(Debug)]
    struct SetFlag;
    impl Behavior for SetFlag {}
    impl Action for SetFlag {
        fn execute(
            &self,
            ctx: &mut dyn ContextMut,
            _event: &EventInput,
            _state: &crate::model::state::StateNode,
            _arg: Option<&str>,
            _raise: &mut dyn RaiseSink,
        ) {
            ctx.set("reached_done", json!(true));
        }
    }

    /// S4: reaching FINAL in both regions of a parallel state fires its
    /// `onDone` cascade into the sibling target.
    #[test]
    fn on_done_fires_once_all_regions_reach_final() {
        let cfg = json!({
            "id": "job",
            "initial": "running",
            "states": {
                "running": {
                    "type": "parallel",
                    "onDone": {"target": "done", "actions": "mark"},
                    "states": {
                        "fetch": {
                            "initial": "working",
                            "states": {
                                "working": {"on": {"FETCHED": "done"}},
                                "done": {"type": "final"}
                            }
                        },
                        "index": {
                            "initial": "working",
                            "states": {
                                "working": {"on": {"INDEXED": "done"}},
                                "done": {"type": "final"}
                            }
                        }
                    }
                },
                "done": {"type": "final"}
            }
        });
        let mut registry = BehaviorRegistry::new();
        registry.register_action("mark", Arc::new(SetFlag));
        let def = compile(&cfg, Arc::new(registry)).unwrap();
        let mut state = fresh_state(&def);
        let root = Ulid::new();

        step(&def, &mut state, root, EventInput::external("FETCHED", None)).unwrap();
        assert_eq!(values(&def, &state), vec!["job.running.fetch.done", "job.running.index.working"]);

        step(&def, &mut state, root, EventInput::external("INDEXED", None)).unwrap();
        assert_eq!(values(&def, &state), vec!["job.done"]);
        assert_eq!(state.context.get("reached_done"), Some(&json!(true)));
    }

    #[derive(Debug)]
    struct AlwaysHigh;
    impl Behavior for AlwaysHigh {
        fn required_context(&self) -> &[(&'static str, ContextValueKind)] {
            &[("score", ContextValueKind::Number)]
        }
    }
    impl Guard for AlwaysHigh {
        fn check(
            &self,
            ctx: &dyn ContextView,
            _event: &EventInput,
            _state: &crate::model::state::StateNode,
            _arg: Option<&str>,
        ) -> GuardResult {
            match ctx.get("score").and_then(|v| v.as_i64()) {
                Some(v) if v >= 10 => GuardResult::pass(),
                _ => GuardResult::fail("score below threshold"),
            }
        }
    }

    /// `@always` fires eventlessly as soon as a guard starts passing, with no
    /// dedicated event needed to trigger the check.
    #[test]
    fn always_transition_fires_once_context_satisfies_guard() {
        let cfg = json!({
            "id": "meter",
            "initial": "low",
            "states": {
                "low": {"on": {"@always": [{"target": "high", "guards": "ready"}]}},
                "high": {}
            }
        });
        let mut registry = BehaviorRegistry::new();
        registry.register_guard("ready", Arc::new(AlwaysHigh));
        let def = compile(&cfg, Arc::new(registry)).unwrap();
        let mut state = fresh_state(&def);
        state.context.set("score", json!(15));
        let root = Ulid::new();

        step(&def, &mut state, root, EventInput::external("TICK", None)).unwrap();
        assert_eq!(values(&def, &state), vec!["meter.high"]);
    }
}
