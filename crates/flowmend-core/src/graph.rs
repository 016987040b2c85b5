use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A process graph: an ordered list of nodes and the directed connections
/// between them. Order is significant (repairs pick "first by original order").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Canvas placement. Opaque to validation and repair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(alias = "source", alias = "from")]
    pub source_node_id: String,
    #[serde(alias = "target", alias = "to")]
    pub target_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Connection {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source.into(),
            target_node_id: target.into(),
            label: None,
            is_default: false,
            condition: None,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

// =============================================================================
// Node kinds
// =============================================================================

/// Node kind. Unknown kinds coming out of generation are preserved verbatim
/// in `Other` so a graph round-trips without losing information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Start,
    End,
    HumanTask,
    ScriptTask,
    Timer,
    Gateway,
    DataOperation,
    Notification,
    Validation,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::HumanTask => "humanTask",
            NodeKind::ScriptTask => "scriptTask",
            NodeKind::Timer => "timer",
            NodeKind::Gateway => "gateway",
            NodeKind::DataOperation => "dataOperation",
            NodeKind::Notification => "notification",
            NodeKind::Validation => "validation",
            NodeKind::Other(name) => name,
        }
    }

    /// Terminal nodes end a path and need no outgoing connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::End)
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodeKind::Start)
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        // Generators are inconsistent about casing and separators
        // ("human_task", "HumanTask", "human-task").
        let normalized: String = value
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "start" | "startevent" => NodeKind::Start,
            "end" | "endevent" => NodeKind::End,
            "humantask" | "usertask" => NodeKind::HumanTask,
            "scripttask" => NodeKind::ScriptTask,
            "timer" => NodeKind::Timer,
            "gateway" => NodeKind::Gateway,
            "dataoperation" => NodeKind::DataOperation,
            "notification" => NodeKind::Notification,
            "validation" => NodeKind::Validation,
            _ => NodeKind::Other(value),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Branching semantics of a gateway, read from its `gatewayType` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayType {
    Exclusive,
    Inclusive,
    Parallel,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: Map::new(),
            layout: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// `None` for non-gateway nodes. A gateway without a recognisable
    /// `gatewayType` is treated as exclusive.
    pub fn gateway_type(&self) -> Option<GatewayType> {
        if self.kind != NodeKind::Gateway {
            return None;
        }
        let gateway_type = match self.attribute_str("gatewayType") {
            Some(t) if t.eq_ignore_ascii_case("parallel") => GatewayType::Parallel,
            Some(t) if t.eq_ignore_ascii_case("inclusive") => GatewayType::Inclusive,
            _ => GatewayType::Exclusive,
        };
        Some(gateway_type)
    }
}

// =============================================================================
// Graph helpers
// =============================================================================

impl Graph {
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        Self { nodes, connections }
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Outgoing connections of `node_id`, in original order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source_node_id == node_id)
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind.is_start())
    }

    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Removes a node together with every connection touching it.
    pub fn remove_node(&mut self, id: &str) {
        self.nodes.retain(|n| n.id != id);
        self.connections.retain(|c| !c.touches(id));
    }

    /// Smallest `<base>_<n>` (n >= 2) not used as a node id.
    pub fn fresh_node_id(&self, base: &str) -> String {
        let taken = self.node_ids();
        fresh_id(base, |candidate| taken.contains(candidate))
    }

    /// Deterministic id for a synthesized connection.
    pub fn fresh_connection_id(&self, source: &str, target: &str) -> String {
        let base = format!("auto_{}_{}", source, target);
        let taken: HashSet<&str> = self.connections.iter().map(|c| c.id.as_str()).collect();
        if !taken.contains(base.as_str()) {
            return base;
        }
        fresh_id(&base, |candidate| taken.contains(candidate))
    }
}

fn fresh_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
