//! Compiled `StateDefinition` tree.
//!
//! To avoid cloning subtrees, the tree is an arena (`Vec<StateNode>`)
//! indexed by `StateId`, with a `parent` field on each node instead of
//! `Rc<RefCell<..>>` parent/child cycles.

use super::transition::{BehaviorRef, TransitionDefinition, TransitionSet};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::behavior::BehaviorRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
}

#[derive(Debug, Clone)]
pub struct StateNode {
    pub id: StateId,
    /// Fully qualified dotted id, e.g. `"order.pending"`.
    pub qualified_id: String,
    pub kind: StateKind,
    pub parent: Option<StateId>,
    /// Ordered child key -> arena index (order matters for parallel region
    /// iteration and for deterministic `onDone` evaluation).
    pub children: IndexMap<String, StateId>,
    /// Required for COMPOUND, forbidden for PARALLEL, meaningless otherwise.
    pub initial_child_key: Option<String>,
    pub entry_actions: Vec<BehaviorRef>,
    pub exit_actions: Vec<BehaviorRef>,
    /// Event type (or `@always`) -> transition set.
    pub transitions: HashMap<String, TransitionSet>,
    pub on_done: Option<TransitionDefinition>,
    /// Valid only on FINAL states.
    pub result: Option<BehaviorRef>,
    pub meta: Value,
    /// Precomputed union of `transitions` keys, for fast candidate lookups.
    pub unique_event_types: Vec<String>,
}

impl StateNode {
    pub fn is_leaf_kind(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }
}

/// Immutable, compiled machine definition.
#[derive(Debug)]
pub struct MachineDefinition {
    pub id: String,
    pub delimiter: char,
    pub version: Option<String>,
    pub root: StateId,
    pub nodes: Vec<StateNode>,
    /// Fully qualified id ("<machine>.<seg>.<seg>") -> arena index.
    pub id_map: HashMap<String, StateId>,
    pub behavior: Arc<BehaviorRegistry>,
    pub should_persist: bool,
    pub scenarios_enabled: bool,
    /// BLAKE3 hash of the canonical JSON of the compiled tree's shape.
    /// Diagnostic only, never a hard failure when it drifts between an
    /// instance's creation and a later restore.
    pub definition_hash: String,
}

impl MachineDefinition {
    pub fn node(&self, id: StateId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub fn by_qualified_id(&self, qualified: &str) -> Option<StateId> {
        self.id_map.get(qualified).copied()
    }

    /// Recursive initial leaf(s) for `id`: a single leaf for atomic/compound
    /// chains, or one leaf per region for a parallel state.
    pub fn initial_leaves(&self, id: StateId) -> Vec<StateId> {
        let node = self.node(id);
        match node.kind {
            StateKind::Atomic | StateKind::Final => vec![id],
            StateKind::Compound => {
                let key = node
                    .initial_child_key
                    .as_ref()
                    .expect("compound state must have an initial child (checked at compile time)");
                let child = *node
                    .children
                    .get(key)
                    .expect("initial child key must resolve (checked at compile time)");
                self.initial_leaves(child)
            }
            StateKind::Parallel => node
                .children
                .values()
                .flat_map(|&child| self.initial_leaves(child))
                .collect(),
        }
    }

    /// Ancestor chain from `id` up to and including the root, nearest first.
    pub fn ancestors_inclusive(&self, id: StateId) -> Vec<StateId> {
        let mut out = vec![id];
        let mut cur = id;
        while let Some(p) = self.node(cur).parent {
            out.push(p);
            cur = p;
        }
        out
    }

    /// Nearest ancestor (inclusive) of `id` with kind PARALLEL, if any.
    pub fn nearest_parallel_ancestor(&self, id: StateId) -> Option<StateId> {
        self.ancestors_inclusive(id)
            .into_iter()
            .find(|&a| self.node(a).kind == StateKind::Parallel)
    }

    /// Nearest common ancestor of two states, walking each ancestor chain.
    pub fn nearest_common_ancestor(&self, a: StateId, b: StateId) -> StateId {
        let chain_a = self.ancestors_inclusive(a);
        let chain_b: std::collections::HashSet<StateId> =
            self.ancestors_inclusive(b).into_iter().collect();
        for candidate in chain_a {
            if chain_b.contains(&candidate) {
                return candidate;
            }
        }
        self.root
    }

    /// Whether every child region of `id` (PARALLEL) currently sits in a
    /// FINAL leaf, given the active `value` set.
    pub fn all_regions_final(&self, id: StateId, value: &[StateId]) -> bool {
        let node = self.node(id);
        if node.kind != StateKind::Parallel {
            return false;
        }
        node.children.values().all(|&region_root| {
            value.iter().any(|&leaf| {
                self.node(leaf).kind == StateKind::Final
                    && self.ancestors_inclusive(leaf).contains(&region_root)
            })
        })
    }
}
