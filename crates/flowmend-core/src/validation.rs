use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{Connection, FieldRules, GatewayType, Graph};

/// One broken graph invariant, carrying the ids a repair needs.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Violation {
    #[error("Node id '{id}' is used by {} nodes", .occurrences.len())]
    DuplicateNodeId {
        id: String,
        /// Positions in `Graph::nodes`, first occurrence included.
        occurrences: Vec<usize>,
    },

    #[error("Connection '{connection_id}' ({source_node_id} -> {target_node_id}) references missing node(s) {missing:?}")]
    DanglingConnection {
        connection_id: String,
        source_node_id: String,
        target_node_id: String,
        missing: Vec<String>,
    },

    #[error("Graph has no start node")]
    NoStartNode,

    #[error("Node '{node_id}' is not reachable from any start node")]
    UnreachableNode { node_id: String },

    #[error("Cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Node ids along the cycle; the first id is repeated at the end.
        path: Vec<String>,
    },

    #[error("Gateway '{node_id}' has {} outgoing connections but no default path", .outgoing.len())]
    MissingDefaultPath {
        node_id: String,
        outgoing: Vec<String>,
    },

    #[error("Gateway '{node_id}' has {} default paths; exactly one is allowed", .defaults.len())]
    ConflictingDefaultPaths {
        node_id: String,
        /// Ids of the connections flagged as default, in original order.
        defaults: Vec<String>,
    },

    #[error("Node '{node_id}' has no outgoing connection")]
    MissingOutgoing { node_id: String },

    #[error("Node '{node_id}' attribute '{attribute}' references undeclared field '{field}'")]
    DanglingFieldReference {
        node_id: String,
        attribute: String,
        field: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    DuplicateNodeId,
    DanglingConnection,
    NoStartNode,
    UnreachableNode,
    Cycle,
    MissingDefaultPath,
    ConflictingDefaultPaths,
    MissingOutgoing,
    DanglingFieldReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::DuplicateNodeId { .. } => ViolationKind::DuplicateNodeId,
            Violation::DanglingConnection { .. } => ViolationKind::DanglingConnection,
            Violation::NoStartNode => ViolationKind::NoStartNode,
            Violation::UnreachableNode { .. } => ViolationKind::UnreachableNode,
            Violation::Cycle { .. } => ViolationKind::Cycle,
            Violation::MissingDefaultPath { .. } => ViolationKind::MissingDefaultPath,
            Violation::ConflictingDefaultPaths { .. } => ViolationKind::ConflictingDefaultPaths,
            Violation::MissingOutgoing { .. } => ViolationKind::MissingOutgoing,
            Violation::DanglingFieldReference { .. } => ViolationKind::DanglingFieldReference,
        }
    }

    /// Unreachable nodes and unresolved field references do not stop a graph
    /// from being rendered or executed; everything else does.
    pub fn severity(&self) -> Severity {
        match self.kind() {
            ViolationKind::UnreachableNode | ViolationKind::DanglingFieldReference => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity() == Severity::Warning)
    }
}

/// Run every graph check and collect all violations. Never short-circuits.
///
/// Violations are ordered by check; unreachable nodes (and a missing start
/// node) are reported last.
pub fn validate_graph(graph: &Graph, fields: &FieldRules) -> ValidationReport {
    let index = GraphIndex::new(graph);

    let mut violations = Vec::new();
    violations.extend(check_duplicate_ids(graph));
    violations.extend(check_dangling_connections(graph, &index));
    violations.extend(check_cycles(graph, &index));
    violations.extend(check_gateway_defaults(graph, &index));
    violations.extend(check_outgoing(graph, &index));
    violations.extend(check_field_references(graph, &index, fields));
    // Reachability last: repairs run in report order.
    violations.extend(check_reachability(graph, &index));

    debug!(
        nodes = graph.nodes.len(),
        connections = graph.connections.len(),
        violations = violations.len(),
        "Validated graph"
    );

    ValidationReport::from_violations(violations)
}

/// Position lookups shared by the checks. Ids resolve to their first
/// occurrence; later duplicates are reported once and otherwise ignored.
struct GraphIndex<'a> {
    by_id: HashMap<&'a str, usize>,
    duplicates: HashSet<usize>,
    /// Resolvable connections per node position, as (connection position, target position).
    successors: Vec<Vec<(usize, usize)>>,
    predecessors: Vec<Vec<usize>>,
}

impl<'a> GraphIndex<'a> {
    fn new(graph: &'a Graph) -> Self {
        let mut by_id = HashMap::with_capacity(graph.nodes.len());
        let mut duplicates = HashSet::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            if by_id.contains_key(node.id.as_str()) {
                duplicates.insert(i);
            } else {
                by_id.insert(node.id.as_str(), i);
            }
        }

        let mut successors = vec![Vec::new(); graph.nodes.len()];
        let mut predecessors = vec![Vec::new(); graph.nodes.len()];
        for (ci, conn) in graph.connections.iter().enumerate() {
            let from = by_id.get(conn.source_node_id.as_str());
            let to = by_id.get(conn.target_node_id.as_str());
            if let (Some(&from), Some(&to)) = (from, to) {
                successors[from].push((ci, to));
                predecessors[to].push(from);
            }
        }

        Self {
            by_id,
            duplicates,
            successors,
            predecessors,
        }
    }

    fn resolves(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }
}

fn check_duplicate_ids(graph: &Graph) -> Vec<Violation> {
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
    let mut group_of: HashMap<&str, usize> = HashMap::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        match group_of.get(node.id.as_str()) {
            Some(&g) => groups[g].1.push(i),
            None => {
                group_of.insert(node.id.as_str(), groups.len());
                groups.push((node.id.as_str(), vec![i]));
            }
        }
    }

    groups
        .into_iter()
        .filter(|(_, occurrences)| occurrences.len() > 1)
        .map(|(id, occurrences)| Violation::DuplicateNodeId {
            id: id.to_string(),
            occurrences,
        })
        .collect()
}

fn check_dangling_connections(graph: &Graph, index: &GraphIndex) -> Vec<Violation> {
    graph
        .connections
        .iter()
        .filter_map(|conn| {
            let missing: Vec<String> = [&conn.source_node_id, &conn.target_node_id]
                .into_iter()
                .filter(|id| !index.resolves(id))
                .cloned()
                .collect();
            (!missing.is_empty()).then(|| Violation::DanglingConnection {
                connection_id: conn.id.clone(),
                source_node_id: conn.source_node_id.clone(),
                target_node_id: conn.target_node_id.clone(),
                missing,
            })
        })
        .collect()
}

fn check_reachability(graph: &Graph, index: &GraphIndex) -> Vec<Violation> {
    let starts: Vec<usize> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, n)| n.kind.is_start() && !index.duplicates.contains(i))
        .map(|(i, _)| i)
        .collect();

    if starts.is_empty() {
        return vec![Violation::NoStartNode];
    }

    let mut visited = vec![false; graph.nodes.len()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for &s in &starts {
        visited[s] = true;
        queue.push_back(s);
    }
    while let Some(current) = queue.pop_front() {
        for &(_, next) in &index.successors[current] {
            if !visited[next] {
                visited[next] = true;
                queue.push_back(next);
            }
        }
    }

    graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| !visited[*i] && !index.duplicates.contains(i))
        .map(|(_, node)| Violation::UnreachableNode {
            node_id: node.id.clone(),
        })
        .collect()
}

/// Iterative DFS; every edge into a node on the active path is one cycle.
fn check_cycles(graph: &Graph, index: &GraphIndex) -> Vec<Violation> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnPath,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; graph.nodes.len()];
    let mut violations = Vec::new();

    for root in 0..graph.nodes.len() {
        if marks[root] != Mark::Unvisited || index.duplicates.contains(&root) {
            continue;
        }
        // (node position, next successor slot)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnPath;

        while let Some(frame) = stack.last_mut() {
            let (node, slot) = *frame;
            let Some(&(_, next)) = index.successors[node].get(slot) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match marks[next] {
                Mark::Unvisited => {
                    marks[next] = Mark::OnPath;
                    stack.push((next, 0));
                }
                Mark::OnPath => {
                    let from = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut path: Vec<String> = stack[from..]
                        .iter()
                        .map(|(n, _)| graph.nodes[*n].id.clone())
                        .collect();
                    path.push(graph.nodes[next].id.clone());
                    violations.push(Violation::Cycle { path });
                }
                Mark::Done => {}
            }
        }
    }

    violations
}

fn check_gateway_defaults(graph: &Graph, index: &GraphIndex) -> Vec<Violation> {
    graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, node)| {
            !index.duplicates.contains(i) && node.gateway_type() == Some(GatewayType::Exclusive)
        })
        .filter_map(|(i, node)| {
            let outgoing: Vec<&Connection> = index.successors[i]
                .iter()
                .map(|&(ci, _)| &graph.connections[ci])
                .collect();
            if outgoing.len() < 2 {
                return None;
            }
            let defaults: Vec<String> = outgoing
                .iter()
                .filter(|c| c.is_default)
                .map(|c| c.id.clone())
                .collect();
            match defaults.len() {
                0 => Some(Violation::MissingDefaultPath {
                    node_id: node.id.clone(),
                    outgoing: outgoing.iter().map(|c| c.id.clone()).collect(),
                }),
                1 => None,
                _ => Some(Violation::ConflictingDefaultPaths {
                    node_id: node.id.clone(),
                    defaults,
                }),
            }
        })
        .collect()
}

fn check_outgoing(graph: &Graph, index: &GraphIndex) -> Vec<Violation> {
    graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, node)| {
            !node.kind.is_terminal()
                && !index.duplicates.contains(i)
                && index.successors[*i].is_empty()
        })
        .map(|(_, node)| Violation::MissingOutgoing {
            node_id: node.id.clone(),
        })
        .collect()
}

fn check_field_references(
    graph: &Graph,
    index: &GraphIndex,
    fields: &FieldRules,
) -> Vec<Violation> {
    let declared: Vec<HashSet<String>> = graph
        .nodes
        .iter()
        .map(|node| {
            fields
                .declares
                .iter()
                .filter_map(|attr| node.attributes.get(attr))
                .flat_map(declared_names)
                .collect()
        })
        .collect();

    let mut violations = Vec::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        if index.duplicates.contains(&i) {
            continue;
        }
        let references: Vec<(&String, &str)> = fields
            .references
            .iter()
            .filter_map(|attr| {
                node.attributes
                    .get(attr)
                    .and_then(Value::as_str)
                    .filter(|field| !field.trim().is_empty())
                    .map(|field| (attr, field))
            })
            .collect();
        if references.is_empty() {
            continue;
        }

        let ancestors = ancestors_of(i, index);
        for (attribute, field) in references {
            let resolved = ancestors.iter().any(|&a| declared[a].contains(field));
            if !resolved {
                violations.push(Violation::DanglingFieldReference {
                    node_id: node.id.clone(),
                    attribute: attribute.clone(),
                    field: field.to_string(),
                });
            }
        }
    }
    violations
}

/// A declaration is a field name, a list of names, or a list of `{ "name": .. }`.
fn declared_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.clone()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Strict ancestors: every node from which `node` can be reached.
fn ancestors_of(node: usize, index: &GraphIndex) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<usize> = index.predecessors[node].iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        if seen.insert(current) {
            queue.extend(index.predecessors[current].iter().copied());
        }
    }
    // On a cycle the walk comes back around to the node itself.
    seen.remove(&node);
    seen
}
