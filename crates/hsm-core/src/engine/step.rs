//! The 11-point step algorithm, plus the `@always` fixpoint and
//! `onDone` cascade it depends on.

use crate::behavior::{check_required_context, GuardResult, RaiseSink};
use crate::constants::{ALWAYS_EVENT, ALWAYS_LOOP_BOUND};
use crate::errors::CoreError;
use crate::model::context::ContextMut;
use crate::model::event::{EventInput, EventSource, MachineEvent, RuntimeState};
use crate::model::state::{MachineDefinition, StateId, StateKind};
use crate::model::transition::TransitionDefinition;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use ulid::Ulid;

/// FIFO sink for `raise(event)` calls made by actions during a step.
#[derive(Default)]
pub struct RaiseQueue(VecDeque<EventInput>);

impl RaiseSink for RaiseQueue {
    fn raise(&mut self, event: EventInput) {
        self.0.push_back(event);
    }
}

/// Runs one external `send(event)` against `state`, mutating it in place.
/// Never returns `ValidationError`: that surfaces only after persistence,
/// failed guards are recorded as internal events here.
pub fn step<C: ContextMut + Clone>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    event: EventInput,
) -> Result<(), CoreError> {
    if state.history.is_empty() {
        emit(
            def,
            state,
            root_event_id,
            EventSource::External,
            &format!("{}.machine.start", def.id),
            None,
        );
    }

    let event = normalize_event(def, event)?;

    emit(
        def,
        state,
        root_event_id,
        event.source,
        &event.event_type,
        event.payload.clone(),
    );
    state.current_event_behavior = Some(event.clone());

    let mut queue = RaiseQueue::default();
    process_event(def, state, root_event_id, &event, &mut queue)?;
    run_always_fixpoint(def, state, root_event_id, &mut queue)?;

    while let Some(raised) = queue.0.pop_front() {
        let internal = EventInput {
            source: EventSource::Internal,
            ..raised
        };
        emit(
            def,
            state,
            root_event_id,
            EventSource::Internal,
            &internal.event_type,
            internal.payload.clone(),
        );
        process_event(def, state, root_event_id, &internal, &mut queue)?;
        run_always_fixpoint(def, state, root_event_id, &mut queue)?;
    }

    update_current_state_definition(def, state);
    Ok(())
}

fn normalize_event(def: &MachineDefinition, ev: EventInput) -> Result<EventInput, CoreError> {
    if let Some(behavior) = def.behavior.event(&ev.event_type) {
        let payload = ev.payload.clone().unwrap_or(Value::Null);
        behavior
            .validate_payload(&payload)
            .map_err(CoreError::Internal)?;
    }
    Ok(ev)
}

fn update_current_state_definition<C: ContextMut>(def: &MachineDefinition, state: &mut RuntimeState<C>) {
    state.current_state_definition = if state.value.len() == 1 {
        state.value[0]
    } else {
        state
            .value
            .first()
            .map(|&l| def.nearest_parallel_ancestor(l).unwrap_or(def.root))
            .unwrap_or(def.root)
    };
}

fn short(def: &MachineDefinition, id: StateId) -> String {
    let qualified = &def.node(id).qualified_id;
    let prefix = format!("{}{}", def.id, def.delimiter);
    qualified.strip_prefix(&prefix).unwrap_or(qualified).to_string()
}

fn emit<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    source: EventSource,
    event_type: &str,
    payload: Option<Value>,
) {
    let seq = state.history.last().map(|e| e.sequence_number + 1).unwrap_or(1);
    let machine_value: Vec<String> = state.value.iter().map(|&s| def.node(s).qualified_id.clone()).collect();
    let meta = {
        let m = &def.node(state.current_state_definition).meta;
        if m.is_null() { None } else { Some(m.clone()) }
    };
    let ev = MachineEvent::new(
        root_event_id,
        seq,
        def.id.clone(),
        machine_value,
        source,
        event_type.to_string(),
        payload,
        Some(state.context.as_map().clone()),
        meta,
    );
    state.history.push(ev);
}

fn run_guard<C: ContextMut>(
    def: &MachineDefinition,
    state: &RuntimeState<C>,
    event: &EventInput,
    owner: StateId,
    guard_ref: &crate::model::transition::BehaviorRef,
) -> Result<GuardResult, CoreError> {
    let guard = def.behavior.guard(&guard_ref.name)?;
    check_required_context(&guard_ref.name, guard.required_context(), &state.context)?;
    Ok(guard.check(&state.context, event, def.node(owner), guard_ref.arg.as_deref()))
}

fn run_calculators<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    event: &EventInput,
    owner: StateId,
    refs: &[crate::model::transition::BehaviorRef],
) -> Result<(), CoreError> {
    for r in refs {
        let calc = def.behavior.calculator(&r.name)?;
        check_required_context(&r.name, calc.required_context(), &state.context)?;
        calc.calculate(&mut state.context, event, def.node(owner), r.arg.as_deref());
    }
    Ok(())
}

fn run_actions<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    event: &EventInput,
    owner: StateId,
    refs: &[crate::model::transition::BehaviorRef],
    queue: &mut RaiseQueue,
) -> Result<(), CoreError> {
    for r in refs {
        let action = def.behavior.action(&r.name)?;
        check_required_context(&r.name, action.required_context(), &state.context)?;
        emit(
            def,
            state,
            root_event_id,
            EventSource::Internal,
            &format!("{}.action.{}.start", def.id, r.name),
            None,
        );
        action.execute(&mut state.context, event, def.node(owner), r.arg.as_deref(), queue);
        emit(
            def,
            state,
            root_event_id,
            EventSource::Internal,
            &format!("{}.action.{}.finish", def.id, r.name),
            None,
        );
    }
    Ok(())
}

/// Resolves the guarded alternatives for `owner`'s handler of `event.event_type`
///. Returns the first fully-satisfied candidate, emitting
/// `guard.pass`/`guard.fail` events along the way.
fn resolve_candidate<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    owner: StateId,
    event: &EventInput,
    event_key: &str,
) -> Result<Option<TransitionDefinition>, CoreError> {
    let set = def.node(owner).transitions.get(event_key).cloned();
    let set = match set {
        Some(s) => s,
        None => return Ok(None),
    };
    for candidate in set.candidates().to_vec() {
        run_calculators(def, state, event, owner, &candidate.calculators)?;

        let mut all_pass = true;
        for g in &candidate.guards {
            let result = run_guard(def, state, event, owner, g)?;
            if result.passed {
                emit(
                    def,
                    state,
                    root_event_id,
                    EventSource::Internal,
                    &format!("{}.guard.{}.pass", def.id, g.name),
                    None,
                );
            } else {
                all_pass = false;
                emit(
                    def,
                    state,
                    root_event_id,
                    EventSource::Internal,
                    &format!("{}.guard.{}.fail", def.id, g.name),
                    Some(json!({ event.event_type.clone(): result.message.clone().unwrap_or_default() })),
                );
            }
        }
        if all_pass {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn find_owner(def: &MachineDefinition, leaf: StateId, event_key: &str) -> Option<StateId> {
    def.ancestors_inclusive(leaf)
        .into_iter()
        .find(|&a| def.node(a).transitions.contains_key(event_key))
}

/// Fires `td` on behalf of the leaves in `group` (all sharing ancestor
/// `owner`), running exit, then transition, then entry actions in that
/// order, and returns the resulting active leaves.
fn fire_transition<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    group: &[StateId],
    owner: StateId,
    event: &EventInput,
    td: &TransitionDefinition,
    queue: &mut RaiseQueue,
) -> Result<Vec<StateId>, CoreError> {
    let target = match td.target {
        None => {
            run_actions(def, state, root_event_id, event, owner, &td.actions, queue)?;
            return Ok(group.to_vec());
        }
        Some(t) => t,
    };

    let lca = def.nearest_common_ancestor(owner, target);

    // a. exit actions, leaf first.
    for &leaf in group {
        let down = def.ancestors_inclusive(leaf);
        let lca_pos = down.iter().position(|&s| s == lca).unwrap_or(down.len());
        for &s in &down[..lca_pos] {
            emit(
                def,
                state,
                root_event_id,
                EventSource::Internal,
                &format!("{}.state.{}.exit", def.id, short(def, s)),
                None,
            );
            let exit_actions = def.node(s).exit_actions.clone();
            run_actions(def, state, root_event_id, event, s, &exit_actions, queue)?;
        }
    }

    // b. transition actions.
    let from_label = group
        .first()
        .map(|&l| short(def, l))
        .unwrap_or_else(|| short(def, owner));
    emit(
        def,
        state,
        root_event_id,
        EventSource::Internal,
        &format!(
            "{}.transition.{}.{}.{}",
            def.id,
            from_label,
            event.event_type,
            short(def, target)
        ),
        None,
    );
    run_actions(def, state, root_event_id, event, owner, &td.actions, queue)?;

    // c. entry actions, outermost first.
    let mut up = def.ancestors_inclusive(target);
    up.reverse(); // root .. target
    let lca_pos = up.iter().position(|&s| s == lca).unwrap_or(0);
    let mut entry_set: Vec<StateId> = up[lca_pos + 1..].to_vec();
    descend_entry(def, target, &mut entry_set);

    for &s in &entry_set {
        emit(
            def,
            state,
            root_event_id,
            EventSource::Internal,
            &format!("{}.state.{}.enter", def.id, short(def, s)),
            None,
        );
        let entry_actions = def.node(s).entry_actions.clone();
        run_actions(def, state, root_event_id, event, s, &entry_actions, queue)?;
    }

    // d. compound/parallel descent already folded into entry_set via
    // `descend_entry`; the resulting active leaves are its tail.
    Ok(def.initial_leaves(target))
}

fn descend_entry(def: &MachineDefinition, from: StateId, out: &mut Vec<StateId>) {
    let node = def.node(from);
    match node.kind {
        StateKind::Atomic | StateKind::Final => {}
        StateKind::Compound => {
            if let Some(key) = &node.initial_child_key {
                if let Some(&child) = node.children.get(key) {
                    out.push(child);
                    descend_entry(def, child, out);
                }
            }
        }
        StateKind::Parallel => {
            for &child in node.children.values() {
                out.push(child);
                descend_entry(def, child, out);
            }
        }
    }
}

/// Processes one event (external or internal, or `@always`) against every
/// currently active leaf, independently per parallel region.
fn process_event<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    event: &EventInput,
    queue: &mut RaiseQueue,
) -> Result<bool, CoreError> {
    process_event_key(def, state, root_event_id, event, &event.event_type, queue)
}

fn process_event_key<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    event: &EventInput,
    event_key: &str,
    queue: &mut RaiseQueue,
) -> Result<bool, CoreError> {
    let snapshot = state.value.clone();
    let mut consumed: HashSet<StateId> = HashSet::new();
    let mut new_value: Vec<StateId> = Vec::new();
    let mut any_fired = false;

    for &leaf in &snapshot {
        if consumed.contains(&leaf) {
            continue;
        }
        match find_owner(def, leaf, event_key) {
            None => {
                new_value.push(leaf);
                consumed.insert(leaf);
            }
            Some(owner) => {
                let group: Vec<StateId> = snapshot
                    .iter()
                    .copied()
                    .filter(|&l| def.ancestors_inclusive(l).contains(&owner))
                    .collect();
                for &g in &group {
                    consumed.insert(g);
                }
                match resolve_candidate(def, state, root_event_id, owner, event, event_key)? {
                    None => new_value.extend(group),
                    Some(td) => {
                        any_fired = true;
                        let produced = fire_transition(def, state, root_event_id, &group, owner, event, &td, queue)?;
                        new_value.extend(produced);
                        state.value = new_value.clone();
                        check_on_done_cascade(def, state, root_event_id, event, queue)?;
                        new_value = state.value.clone();
                    }
                }
            }
        }
    }
    state.value = new_value;
    Ok(any_fired)
}

/// `onDone` cascade: fires once per settled ancestor
/// whose children have all reached FINAL leaves, repeating bottom-up until
/// none remain.
fn check_on_done_cascade<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    event: &EventInput,
    queue: &mut RaiseQueue,
) -> Result<(), CoreError> {
    for _ in 0..ALWAYS_LOOP_BOUND {
        let owner = match find_done_ancestor(def, &state.value) {
            Some(o) => o,
            None => return Ok(()),
        };
        let td = def.node(owner).on_done.clone().expect("checked by find_done_ancestor");
        let group: Vec<StateId> = state
            .value
            .iter()
            .copied()
            .filter(|&l| def.ancestors_inclusive(l).contains(&owner))
            .collect();
        let rest: Vec<StateId> = state.value.iter().copied().filter(|l| !group.contains(l)).collect();
        let produced = fire_transition(def, state, root_event_id, &group, owner, event, &td, queue)?;
        let mut next = rest;
        next.extend(produced);
        state.value = next;
    }
    Err(CoreError::AlwaysLoopBound(ALWAYS_LOOP_BOUND))
}

fn find_done_ancestor(def: &MachineDefinition, value: &[StateId]) -> Option<StateId> {
    for &leaf in value {
        if def.node(leaf).kind == StateKind::Final {
            if let Some(parent) = def.node(leaf).parent {
                if def.node(parent).kind == StateKind::Compound && def.node(parent).on_done.is_some() {
                    return Some(parent);
                }
            }
        }
    }
    let mut seen: HashSet<StateId> = HashSet::new();
    for &leaf in value {
        if let Some(par) = def.nearest_parallel_ancestor(leaf) {
            if seen.insert(par) && def.node(par).on_done.is_some() && def.all_regions_final(par, value) {
                return Some(par);
            }
        }
    }
    None
}

/// `@always` fixpoint: re-checks eventless transitions from every active
/// leaf upward and repeats until none fire, bounded to avoid runaway loops.
fn run_always_fixpoint<C: ContextMut>(
    def: &MachineDefinition,
    state: &mut RuntimeState<C>,
    root_event_id: Ulid,
    queue: &mut RaiseQueue,
) -> Result<(), CoreError> {
    let always_event = EventInput::internal(ALWAYS_EVENT, None);
    for _ in 0..ALWAYS_LOOP_BOUND {
        let fired = process_event_key(def, state, root_event_id, &always_event, ALWAYS_EVENT, queue)?;
        if !fired {
            return Ok(());
        }
    }
    Err(CoreError::AlwaysLoopBound(ALWAYS_LOOP_BOUND))
}
