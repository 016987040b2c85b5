use super::*;
use crate::{Connection, FieldRules, Node, NodeKind, validate_graph};

// ── Test helpers ────────────────────────────────────────────────

fn node(id: &str, kind: NodeKind) -> Node {
    Node::new(id, kind)
}

fn conn(id: &str, from: &str, to: &str) -> Connection {
    Connection::new(id, from, to)
}

fn table() -> StrategyTable {
    StrategyTable::default()
}

fn violations(graph: &Graph) -> Vec<Violation> {
    validate_graph(graph, &FieldRules::default()).violations
}

fn gateway_graph() -> Graph {
    Graph::new(
        vec![
            node("start", NodeKind::Start),
            node("decide", NodeKind::Gateway),
            node("approve", NodeKind::End),
            node("reject", NodeKind::End),
        ],
        vec![
            conn("c1", "start", "decide"),
            conn("c2", "decide", "approve"),
            conn("c3", "decide", "reject"),
        ],
    )
}

// ── Strategies ──────────────────────────────────────────────────

#[test]
fn duplicate_rename_preserves_topology() {
    let graph = Graph::new(
        vec![
            node("start", NodeKind::Start),
            node("task", NodeKind::HumanTask),
            node("end", NodeKind::End),
            node("task", NodeKind::ScriptTask),
            node("task", NodeKind::Timer),
        ],
        vec![conn("c1", "start", "task"), conn("c2", "task", "end")],
    );
    let violation = violations(&graph)
        .into_iter()
        .find(|v| v.kind() == ViolationKind::DuplicateNodeId)
        .unwrap();

    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    assert_eq!(outcome.graph.nodes.len(), graph.nodes.len());
    assert_eq!(outcome.graph.connections.len(), graph.connections.len());
    let ids: Vec<&str> = outcome.graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["start", "task", "end", "task_2", "task_3"]);
    for c in &outcome.graph.connections {
        assert!(outcome.graph.contains_node(&c.source_node_id));
        assert!(outcome.graph.contains_node(&c.target_node_id));
    }
    assert_eq!(outcome.note, "Renamed duplicate node id 'task' to 'task_2', 'task_3'");
}

#[test]
fn duplicate_rename_rewires_endpoints_by_declaration_order() {
    // start -> a -> x -> b -> x -> end, where the two `x` are distinct steps.
    let graph = Graph::new(
        vec![
            node("start", NodeKind::Start),
            node("a", NodeKind::HumanTask),
            node("x", NodeKind::ScriptTask),
            node("b", NodeKind::HumanTask),
            node("x", NodeKind::Notification),
            node("end", NodeKind::End),
        ],
        vec![
            conn("c1", "start", "a"),
            conn("c2", "a", "x"),
            conn("c3", "x", "b"),
            conn("c4", "b", "x"),
            conn("c5", "x", "end"),
        ],
    );
    let violation = violations(&graph).remove(0);
    assert_eq!(violation.kind(), ViolationKind::DuplicateNodeId);

    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    assert_eq!(
        outcome.note,
        "Renamed duplicate node id 'x' to 'x_2' and rewired 2 connection endpoint(s)"
    );
    let edges: Vec<(&str, &str)> = outcome
        .graph
        .connections
        .iter()
        .map(|c| (c.source_node_id.as_str(), c.target_node_id.as_str()))
        .collect();
    assert_eq!(
        edges,
        vec![("start", "a"), ("a", "x"), ("x", "b"), ("b", "x_2"), ("x_2", "end")]
    );
    assert!(violations(&outcome.graph).is_empty());
}

#[test]
fn dangling_connection_is_dropped() {
    let mut graph = gateway_graph();
    graph.connections.push(conn("c9", "decide", "ghost"));
    let violation = Violation::DanglingConnection {
        connection_id: "c9".into(),
        source_node_id: "decide".into(),
        target_node_id: "ghost".into(),
        missing: vec!["ghost".into()],
    };
    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    assert_eq!(outcome.graph.connections.len(), 3);

    // Already gone: nothing to do.
    let again = repair(&outcome.graph, &violation, &table());
    assert!(!again.applied);
    assert_eq!(again.graph, outcome.graph);
}

#[test]
fn unreachable_node_and_its_connections_are_removed() {
    let mut graph = gateway_graph();
    graph.nodes.push(node("island", NodeKind::HumanTask));
    graph.connections.push(conn("c9", "island", "approve"));
    let violation = Violation::UnreachableNode {
        node_id: "island".into(),
    };

    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    assert!(!outcome.graph.contains_node("island"));
    assert!(!outcome.graph.connections.iter().any(|c| c.id == "c9"));

    let retain = StrategyTable::standard(UnreachablePolicy::Retain);
    assert!(!retain.handles(ViolationKind::UnreachableNode));
    assert!(!repair(&graph, &violation, &retain).applied);
}

#[test]
fn reachable_node_is_not_removed() {
    let graph = gateway_graph();
    let stale = Violation::UnreachableNode {
        node_id: "approve".into(),
    };
    let outcome = repair(&graph, &stale, &table());
    assert!(!outcome.applied);
    assert_eq!(outcome.graph, graph);
}

#[test]
fn cycle_repair_removes_closing_edge() {
    // start -> A -> B -> A, A -> end
    let graph = Graph::new(
        vec![
            node("start", NodeKind::Start),
            node("A", NodeKind::HumanTask),
            node("B", NodeKind::ScriptTask),
            node("end", NodeKind::End),
        ],
        vec![
            conn("c1", "start", "A"),
            conn("c2", "A", "B"),
            conn("c3", "B", "A"),
            conn("c4", "A", "end"),
        ],
    );
    let violation = Violation::Cycle {
        path: vec!["A".into(), "B".into(), "A".into()],
    };
    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    let remaining: Vec<&str> = outcome.graph.connections.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(remaining, vec!["c1", "c2", "c4"]);
    assert!(
        !violations(&outcome.graph)
            .iter()
            .any(|v| matches!(v, Violation::Cycle { .. } | Violation::UnreachableNode { .. }))
    );
}

#[test]
fn stale_cycle_is_not_applied() {
    let graph = gateway_graph();
    let violation = Violation::Cycle {
        path: vec!["decide".into(), "approve".into(), "decide".into()],
    };
    assert!(!repair(&graph, &violation, &table()).applied);
}

#[test]
fn gateway_gets_first_connection_as_default() {
    let graph = gateway_graph();
    let violation = violations(&graph).remove(0);
    assert_eq!(violation.kind(), ViolationKind::MissingDefaultPath);

    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    let c2 = &outcome.graph.connections[1];
    let c3 = &outcome.graph.connections[2];
    assert!(c2.is_default);
    assert_eq!(c3, &graph.connections[2]);
    assert!(violations(&outcome.graph).is_empty());
}

#[test]
fn dead_end_is_wired_to_nearest_terminal() {
    let graph = Graph::new(
        vec![
            node("start", NodeKind::Start),
            node("far_end", NodeKind::End),
            node("a", NodeKind::HumanTask),
            node("b", NodeKind::HumanTask),
            node("near_end", NodeKind::End),
            node("c", NodeKind::Notification),
        ],
        vec![
            conn("c1", "start", "a"),
            conn("c2", "a", "far_end"),
            conn("c3", "a", "b"),
            conn("c4", "b", "near_end"),
            conn("c5", "b", "c"),
        ],
    );
    let violation = Violation::MissingOutgoing {
        node_id: "c".into(),
    };
    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    let added = outcome.graph.connections.last().unwrap();
    assert_eq!(added.id, "auto_c_near_end");
    assert_eq!(added.source_node_id, "c");
    assert_eq!(added.target_node_id, "near_end");
}

#[test]
fn unreachable_dead_end_is_not_wired() {
    let mut graph = gateway_graph();
    graph.nodes.push(node("orphan", NodeKind::HumanTask));
    let violation = Violation::MissingOutgoing {
        node_id: "orphan".into(),
    };
    let outcome = repair(&graph, &violation, &table());
    assert!(!outcome.applied);
    assert_eq!(outcome.graph, graph);
}

#[test]
fn extra_default_paths_are_cleared() {
    let mut graph = gateway_graph();
    graph.connections[1].is_default = true;
    graph.connections[2].is_default = true;
    let violation = violations(&graph).remove(0);
    assert_eq!(violation.kind(), ViolationKind::ConflictingDefaultPaths);

    let outcome = repair(&graph, &violation, &table());
    assert!(outcome.applied);
    assert!(outcome.graph.connections[1].is_default);
    assert!(!outcome.graph.connections[2].is_default);
    assert_eq!(
        outcome.note,
        "Kept connection 'c2' as the only default path of gateway 'decide'; cleared 'c3'"
    );
    assert!(violations(&outcome.graph).is_empty());
}

#[test]
fn dead_end_without_any_terminal_is_not_applied() {
    let graph = Graph::new(
        vec![node("start", NodeKind::Start), node("a", NodeKind::HumanTask)],
        vec![conn("c1", "start", "a")],
    );
    let violation = Violation::MissingOutgoing {
        node_id: "a".into(),
    };
    let outcome = repair(&graph, &violation, &table());
    assert!(!outcome.applied);
    assert!(outcome.note.starts_with("No applicable repair"));
}

#[test]
fn undeclared_field_reference_is_cleared_alone() {
    let graph = Graph::new(
        vec![
            node("start", NodeKind::Start),
            node("review", NodeKind::HumanTask)
                .with_attribute("label", "Review claim")
                .with_attribute("formRef", "claim_form")
                .with_attribute("dataField", "claimAmount"),
            node("end", NodeKind::End),
        ],
        vec![conn("c1", "start", "review"), conn("c2", "review", "end")],
    );
    let found = violations(&graph);
    assert_eq!(
        found,
        vec![Violation::DanglingFieldReference {
            node_id: "review".into(),
            attribute: "dataField".into(),
            field: "claimAmount".into(),
        }]
    );

    let outcome = repair(&graph, &found[0], &table());
    assert!(outcome.applied);
    let review = outcome.graph.find_node("review").unwrap();
    assert!(!review.attributes.contains_key("dataField"));
    assert_eq!(review.attribute_str("label"), Some("Review claim"));
    assert_eq!(review.attribute_str("formRef"), Some("claim_form"));
    assert_eq!(review.attributes.len(), 2);
}

#[test]
fn missing_start_has_no_strategy() {
    let graph = Graph::new(vec![node("end", NodeKind::End)], vec![]);
    let outcome = repair(&graph, &Violation::NoStartNode, &table());
    assert!(!outcome.applied);
}

#[test]
fn strategy_table_can_be_overridden() {
    fn relabel(graph: &mut Graph, _: &Violation) -> Option<String> {
        graph.nodes.first_mut()?.kind = NodeKind::Start;
        Some("Promoted first node to start".to_string())
    }
    let table = StrategyTable::default().with(ViolationKind::NoStartNode, relabel);
    let graph = Graph::new(
        vec![node("a", NodeKind::HumanTask), node("end", NodeKind::End)],
        vec![conn("c1", "a", "end")],
    );
    let outcome = repair(&graph, &Violation::NoStartNode, &table);
    assert!(outcome.applied);
    assert!(violations(&outcome.graph).is_empty());

    let without = table.without(ViolationKind::NoStartNode);
    assert!(!without.handles(ViolationKind::NoStartNode));
}
