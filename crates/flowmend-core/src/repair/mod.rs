mod strategies;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::{Graph, UnreachablePolicy, Violation, ViolationKind};

/// A repair strategy edits the graph in place to resolve one violation and
/// returns a changelog note, or returns `None` without touching the graph
/// when the violation no longer applies.
pub type StrategyFn = fn(&mut Graph, &Violation) -> Option<String>;

/// Result of a single [`repair`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub applied: bool,
    pub graph: Graph,
    pub note: String,
}

/// Explicit mapping from violation kind to the strategy that fixes it.
/// Kinds without an entry are never repaired.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: BTreeMap<ViolationKind, StrategyFn>,
}

impl StrategyTable {
    /// One deterministic strategy per violation kind.
    pub fn standard(unreachable: UnreachablePolicy) -> Self {
        let mut table: BTreeMap<ViolationKind, StrategyFn> = BTreeMap::new();
        table.insert(ViolationKind::DuplicateNodeId, strategies::rename_duplicates);
        table.insert(
            ViolationKind::DanglingConnection,
            strategies::drop_dangling_connection,
        );
        table.insert(ViolationKind::Cycle, strategies::break_cycle);
        table.insert(ViolationKind::MissingDefaultPath, strategies::mark_first_default);
        table.insert(
            ViolationKind::ConflictingDefaultPaths,
            strategies::keep_first_default,
        );
        table.insert(ViolationKind::MissingOutgoing, strategies::connect_to_terminal);
        table.insert(
            ViolationKind::DanglingFieldReference,
            strategies::clear_field_reference,
        );
        if unreachable == UnreachablePolicy::Remove {
            table.insert(ViolationKind::UnreachableNode, strategies::remove_unreachable);
        }
        Self { strategies: table }
    }

    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    pub fn with(mut self, kind: ViolationKind, strategy: StrategyFn) -> Self {
        self.strategies.insert(kind, strategy);
        self
    }

    pub fn without(mut self, kind: ViolationKind) -> Self {
        self.strategies.remove(&kind);
        self
    }

    pub fn handles(&self, kind: ViolationKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// Apply the registered strategy to `graph` in place.
    pub fn apply(&self, graph: &mut Graph, violation: &Violation) -> Option<String> {
        let strategy = self.strategies.get(&violation.kind())?;
        let note = strategy(graph, violation);
        match &note {
            Some(note) => debug!("Repair applied: {}", note),
            None => debug!("Repair skipped (no longer applicable): {}", violation),
        }
        note
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard(UnreachablePolicy::default())
    }
}

/// Attempt one local fix for `violation` on a copy of `graph`.
/// Never fails; `applied` is false when nothing could be done.
pub fn repair(graph: &Graph, violation: &Violation, table: &StrategyTable) -> RepairOutcome {
    let mut working = graph.clone();
    match table.apply(&mut working, violation) {
        Some(note) => RepairOutcome {
            applied: true,
            graph: working,
            note,
        },
        None => RepairOutcome {
            applied: false,
            graph: graph.clone(),
            note: format!("No applicable repair: {}", violation),
        },
    }
}
