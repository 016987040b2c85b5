use std::collections::{HashMap, HashSet, VecDeque};

use crate::{Connection, Graph, Violation};

/// Keep the first node with the id; every later occurrence gets a fresh id.
///
/// Connections only name ids, so each endpoint is bound by declaration order:
/// an incoming connection goes to the first occurrence declared after its
/// source, an outgoing one to the last occurrence declared before its
/// target. Endpoints with no such occurrence stay on the first one.
pub(super) fn rename_duplicates(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::DuplicateNodeId { id, occurrences } = violation else {
        return None;
    };
    let (&first, rest) = occurrences.split_first()?;
    if graph.nodes.get(first).is_none_or(|n| &n.id != id) {
        return None;
    }
    let targets: Vec<usize> = rest
        .iter()
        .copied()
        .filter(|&p| graph.nodes.get(p).is_some_and(|n| &n.id == id))
        .collect();
    if targets.is_empty() {
        return None;
    }

    let mut owners = vec![(first, id.clone())];
    for position in targets {
        let fresh = graph.fresh_node_id(id);
        graph.nodes[position].id = fresh.clone();
        owners.push((position, fresh));
    }
    owners.sort_by_key(|(position, _)| *position);

    let rewired = rebind_endpoints(graph, id, &owners);
    let renamed: Vec<String> = owners.into_iter().skip(1).map(|(_, fresh)| fresh).collect();
    let mut note = format!(
        "Renamed duplicate node id '{}' to {}",
        id,
        quoted_list(&renamed)
    );
    if rewired > 0 {
        note.push_str(&format!(" and rewired {} connection endpoint(s)", rewired));
    }
    Some(note)
}

/// Moves endpoints naming `id` onto the occurrence chosen by declaration
/// order. `owners` is sorted by node position. Returns how many moved.
fn rebind_endpoints(graph: &mut Graph, id: &str, owners: &[(usize, String)]) -> usize {
    let position_of = |graph: &Graph, other: &str| graph.nodes.iter().position(|n| n.id == other);
    let mut rewired = 0;
    for ci in 0..graph.connections.len() {
        let conn = &graph.connections[ci];
        // Self-loops have no outside anchor; cycle repair deals with them.
        if conn.source_node_id == id && conn.target_node_id == id {
            continue;
        }
        if conn.target_node_id == id
            && let Some(source) = position_of(graph, &conn.source_node_id)
            && let Some((_, owner)) = owners.iter().find(|(p, _)| *p > source)
            && owner != id
        {
            graph.connections[ci].target_node_id = owner.clone();
            rewired += 1;
        } else if conn.source_node_id == id
            && let Some(target) = position_of(graph, &conn.target_node_id)
            && let Some((_, owner)) = owners.iter().rev().find(|(p, _)| *p < target)
            && owner != id
        {
            graph.connections[ci].source_node_id = owner.clone();
            rewired += 1;
        }
    }
    rewired
}

pub(super) fn drop_dangling_connection(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::DanglingConnection {
        connection_id,
        source_node_id,
        target_node_id,
        ..
    } = violation
    else {
        return None;
    };
    let ids = graph.node_ids();
    let position = graph.connections.iter().position(|c| {
        &c.id == connection_id
            && &c.source_node_id == source_node_id
            && &c.target_node_id == target_node_id
            && !(ids.contains(c.source_node_id.as_str()) && ids.contains(c.target_node_id.as_str()))
    })?;
    graph.connections.remove(position);
    Some(format!(
        "Removed dangling connection '{}' ({} -> {})",
        connection_id, source_node_id, target_node_id
    ))
}

/// Destructive: the node and every connection touching it are deleted.
pub(super) fn remove_unreachable(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::UnreachableNode { node_id } = violation else {
        return None;
    };
    if graph.nodes.iter().filter(|n| &n.id == node_id).count() != 1 {
        return None;
    }
    if reachable_ids(graph).contains(node_id.as_str()) {
        return None;
    }
    let touching = graph.connections.iter().filter(|c| c.touches(node_id)).count();
    graph.remove_node(node_id);
    Some(format!(
        "Removed unreachable node '{}' and {} connection(s)",
        node_id, touching
    ))
}

/// Remove the edge closing the cycle: second-to-last path id -> last path id.
pub(super) fn break_cycle(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::Cycle { path } = violation else {
        return None;
    };
    if path.len() < 2 || path.first() != path.last() {
        return None;
    }
    let still_cyclic = path.windows(2).all(|pair| {
        graph
            .connections
            .iter()
            .any(|c| c.source_node_id == pair[0] && c.target_node_id == pair[1])
    });
    if !still_cyclic {
        return None;
    }

    let source = &path[path.len() - 2];
    let target = &path[path.len() - 1];
    let position = graph
        .connections
        .iter()
        .position(|c| &c.source_node_id == source && &c.target_node_id == target)?;
    let removed = graph.connections.remove(position);
    Some(format!(
        "Removed connection '{}' ({} -> {}) closing cycle {}",
        removed.id,
        source,
        target,
        path.join(" -> ")
    ))
}

pub(super) fn mark_first_default(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::MissingDefaultPath { node_id, outgoing } = violation else {
        return None;
    };
    let already_defaulted = graph
        .connections
        .iter()
        .any(|c| &c.source_node_id == node_id && c.is_default);
    if already_defaulted {
        return None;
    }
    let first = outgoing.first()?;
    let connection = graph
        .connections
        .iter_mut()
        .find(|c| &c.id == first && &c.source_node_id == node_id)?;
    connection.is_default = true;
    Some(format!(
        "Marked connection '{}' ({} -> {}) as default path of gateway '{}'",
        connection.id, connection.source_node_id, connection.target_node_id, node_id
    ))
}

/// The first flagged connection stays the default; the others are unflagged.
pub(super) fn keep_first_default(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::ConflictingDefaultPaths { node_id, .. } = violation else {
        return None;
    };
    let flagged: Vec<usize> = graph
        .connections
        .iter()
        .enumerate()
        .filter(|(_, c)| &c.source_node_id == node_id && c.is_default)
        .map(|(i, _)| i)
        .collect();
    let (&kept, cleared) = flagged.split_first()?;
    if cleared.is_empty() {
        return None;
    }
    let cleared_ids: Vec<String> = cleared
        .iter()
        .map(|&i| {
            graph.connections[i].is_default = false;
            graph.connections[i].id.clone()
        })
        .collect();
    Some(format!(
        "Kept connection '{}' as the only default path of gateway '{}'; cleared {}",
        graph.connections[kept].id,
        node_id,
        quoted_list(&cleared_ids)
    ))
}

pub(super) fn connect_to_terminal(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::MissingOutgoing { node_id } = violation else {
        return None;
    };
    let node = graph.find_node(node_id)?;
    if node.kind.is_terminal() {
        return None;
    }
    // An orphan is left to the unreachable-node policy; wiring it would not
    // make it reachable.
    if graph.start_nodes().next().is_some() && !reachable_ids(graph).contains(node_id.as_str()) {
        return None;
    }
    let ids = graph.node_ids();
    let has_outgoing = graph
        .outgoing(node_id)
        .any(|c| ids.contains(c.target_node_id.as_str()));
    if has_outgoing {
        return None;
    }

    let terminal = nearest_terminal(graph, node_id)?;
    let id = graph.fresh_connection_id(node_id, &terminal);
    graph.add_connection(Connection::new(id.clone(), node_id.clone(), terminal.clone()));
    Some(format!(
        "Added connection '{}' from dead-end node '{}' to terminal '{}'",
        id, node_id, terminal
    ))
}

pub(super) fn clear_field_reference(graph: &mut Graph, violation: &Violation) -> Option<String> {
    let Violation::DanglingFieldReference {
        node_id,
        attribute,
        field,
    } = violation
    else {
        return None;
    };
    let node = graph.find_node_mut(node_id)?;
    if node.attribute_str(attribute) != Some(field.as_str()) {
        return None;
    }
    node.attributes.remove(attribute);
    Some(format!(
        "Cleared attribute '{}' on node '{}' (undeclared field '{}')",
        attribute, node_id, field
    ))
}

// ── Helpers ─────────────────────────────────────────────────────

fn reachable_ids(graph: &Graph) -> HashSet<&str> {
    let mut seen: HashSet<&str> = graph.start_nodes().map(|n| n.id.as_str()).collect();
    let mut queue: VecDeque<&str> = seen.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        for conn in graph.outgoing(current) {
            if seen.insert(conn.target_node_id.as_str()) {
                queue.push_back(conn.target_node_id.as_str());
            }
        }
    }
    seen
}

/// Closest terminal node by undirected hop count, ties broken by node order.
/// Falls back to the first terminal in the graph when none is connected.
fn nearest_terminal(graph: &Graph, from: &str) -> Option<String> {
    let mut neighbours: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in &graph.connections {
        neighbours
            .entry(conn.source_node_id.as_str())
            .or_default()
            .push(conn.target_node_id.as_str());
        neighbours
            .entry(conn.target_node_id.as_str())
            .or_default()
            .push(conn.source_node_id.as_str());
    }

    let mut distance: HashMap<&str, usize> = HashMap::from([(from, 0)]);
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        let next_distance = distance[current] + 1;
        for &next in neighbours.get(current).into_iter().flatten() {
            if !distance.contains_key(next) {
                distance.insert(next, next_distance);
                queue.push_back(next);
            }
        }
    }

    let terminals = graph.nodes.iter().filter(|n| n.kind.is_terminal());
    terminals
        .clone()
        .filter_map(|n| distance.get(n.id.as_str()).map(|d| (*d, n)))
        .min_by_key(|(d, _)| *d)
        .map(|(_, n)| n)
        .or_else(|| terminals.clone().next())
        .map(|n| n.id.clone())
}

fn quoted_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id))
        .collect::<Vec<_>>()
        .join(", ")
}
