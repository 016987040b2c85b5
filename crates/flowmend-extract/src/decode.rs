use flowmend_core::{Connection, Graph, Node, NodeKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Expected a graph object, found {0}")]
    NotAnObject(&'static str),

    #[error("Graph object has no `nodes` array")]
    MissingNodes,
}

/// A graph decoded from generated output, plus notes about entries that
/// had to be skipped.
#[derive(Debug, Clone)]
pub struct DecodedGraph {
    pub graph: Graph,
    pub warnings: Vec<String>,
}

/// Ids are sometimes emitted as numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LooseId {
    Text(String),
    Number(serde_json::Number),
}

impl From<LooseId> for String {
    fn from(id: LooseId) -> Self {
        match id {
            LooseId::Text(s) => s,
            LooseId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawNode {
    id: LooseId,
    #[serde(alias = "type", alias = "nodeType")]
    kind: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default, alias = "position", alias = "layoutHint")]
    layout: Option<Value>,
    /// Anything else (label, description, ...) at the top level of the node.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConnection {
    #[serde(default)]
    id: Option<LooseId>,
    #[serde(alias = "source", alias = "from", alias = "source_node_id")]
    source_node_id: LooseId,
    #[serde(alias = "target", alias = "to", alias = "target_node_id")]
    target_node_id: LooseId,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, alias = "is_default", alias = "default")]
    is_default: bool,
    #[serde(default)]
    condition: Option<String>,
}

/// Decode each entry on its own. A malformed entry becomes a warning naming
/// its id (or array position) and is left out of the result.
fn decode_entries<T: DeserializeOwned>(entries: &[Value], what: &str) -> (Vec<(usize, T)>, Vec<String>) {
    let mut decoded = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();
    for (position, entry) in entries.iter().enumerate() {
        match T::deserialize(entry) {
            Ok(item) => decoded.push((position, item)),
            Err(e) => warnings.push(format!(
                "Skipped {} {}: {}",
                what,
                entry_label(entry, position),
                e
            )),
        }
    }
    (decoded, warnings)
}

fn entry_label(entry: &Value, position: usize) -> String {
    match entry.get("id") {
        Some(Value::String(id)) => format!("'{}'", id),
        Some(Value::Number(id)) => format!("'{}'", id),
        _ => format!("#{}", position),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object without nodes",
    }
}

/// Decode an extracted value into a [`Graph`].
///
/// Accepts `connections` or `edges`, a `graph`/`process` wrapper object,
/// and several endpoint spellings. Individual malformed nodes or
/// connections are skipped with a warning rather than failing the decode.
pub fn decode_graph(value: &Value) -> Result<DecodedGraph, DecodeError> {
    let Value::Object(root) = value else {
        return Err(DecodeError::NotAnObject(value_kind(value)));
    };
    let object = ["graph", "process"]
        .iter()
        .filter_map(|key| root.get(*key).and_then(Value::as_object))
        .find(|inner| inner.contains_key("nodes"))
        .unwrap_or(root);

    let raw_nodes = object
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingNodes)?;
    let raw_connections = object
        .get("connections")
        .or_else(|| object.get("edges"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut warnings = Vec::new();

    let (parsed_nodes, node_warnings) = decode_entries::<RawNode>(raw_nodes, "node");
    warnings.extend(node_warnings);
    let nodes = parsed_nodes
        .into_iter()
        .map(|(_, raw)| {
            let mut attributes = raw.attributes;
            for (key, value) in raw.extra {
                attributes.entry(key).or_insert(value);
            }
            Node {
                id: raw.id.into(),
                kind: NodeKind::from(raw.kind),
                attributes,
                layout: raw.layout,
            }
        })
        .collect();

    let (parsed_connections, connection_warnings) =
        decode_entries::<RawConnection>(raw_connections, "connection");
    warnings.extend(connection_warnings);
    let connections = parsed_connections
        .into_iter()
        .map(|(i, raw)| Connection {
            id: raw
                .id
                .map(String::from)
                .unwrap_or_else(|| format!("conn_{}", i)),
            source_node_id: raw.source_node_id.into(),
            target_node_id: raw.target_node_id.into(),
            label: raw.label,
            is_default: raw.is_default,
            condition: raw.condition,
        })
        .collect();

    Ok(DecodedGraph {
        graph: Graph::new(nodes, connections),
        warnings,
    })
}
