//! Graph document serialization for save/load.
//!
//! A document captures the complete graph configuration: nodes with their
//! kinds, plugin descriptors, and property bags, plus all connections.
//! Loading replays the document through the host's own checked operations,
//! so hand-edited files cannot smuggle in connections that violate the
//! graph invariants.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graph::host::AudioGraphHost;
use crate::graph::node::{NodeId, NodeKind, PropertyValue};
use crate::graph::plugin::PluginDescriptor;

/// Current document format version.
/// Increment when making breaking changes to the format.
pub const DOCUMENT_VERSION: u32 = 1;

/// Errors raised by document save/load.
#[derive(Debug)]
pub enum DocumentError {
    /// Filesystem failure.
    Io(String),
    /// The file is not a valid document.
    Parse(String),
    /// The file was written by a newer format version.
    IncompatibleVersion(u32),
    /// A plugin node references a descriptor the resolver cannot satisfy.
    UnknownPlugin(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Io(msg) => write!(f, "Document I/O error: {}", msg),
            DocumentError::Parse(msg) => write!(f, "Invalid document: {}", msg),
            DocumentError::IncompatibleVersion(version) => {
                write!(f, "Document version {} is newer than supported", version)
            }
            DocumentError::UnknownPlugin(id) => {
                write!(f, "Document references unknown plugin '{}'", id)
            }
        }
    }
}

impl std::error::Error for DocumentError {}

/// A complete serialized graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Human-readable document name.
    pub name: String,
    /// Format version for compatibility checks.
    pub version: u32,
    /// All nodes in the graph.
    pub nodes: Vec<NodeData>,
    /// All connections between nodes.
    pub connections: Vec<ConnectionData>,
}

/// Serialized data for a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    /// Node id within this document, referenced by connections.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Node kind tag.
    pub kind: NodeKind,
    /// Plugin descriptor identifier, present for plugin nodes.
    pub descriptor: Option<String>,
    /// The node's property bag (position, window geometry).
    pub properties: HashMap<String, PropertyValue>,
}

/// Serialized data for a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionData {
    /// Source node id (document-local).
    pub from_node: u32,
    /// Source channel, or the MIDI sentinel.
    pub from_channel: u32,
    /// Destination node id (document-local).
    pub to_node: u32,
    /// Destination channel, or the MIDI sentinel.
    pub to_channel: u32,
}

impl GraphDocument {
    /// Captures the host's current graph into a document.
    pub fn capture(host: &AudioGraphHost, name: impl Into<String>) -> Self {
        let mut nodes: Vec<NodeData> = host
            .nodes()
            .map(|node| NodeData {
                id: node.id,
                name: node.name.clone(),
                kind: node.kind,
                descriptor: node.descriptor_id.clone(),
                properties: node.properties.clone(),
            })
            .collect();
        nodes.sort_by_key(|node| node.id);

        let connections = host
            .connections()
            .iter()
            .map(|conn| ConnectionData {
                from_node: conn.source,
                from_channel: conn.source_channel,
                to_node: conn.dest,
                to_channel: conn.dest_channel,
            })
            .collect();

        Self {
            name: name.into(),
            version: DOCUMENT_VERSION,
            nodes,
            connections,
        }
    }

    /// Whether this document's version is readable by the current format.
    pub fn is_compatible(&self) -> bool {
        self.version <= DOCUMENT_VERSION
    }

    /// Replaces the host's graph with this document's contents.
    ///
    /// Nodes receive fresh ids; connections are remapped and replayed
    /// through `connect`, so edges that violate the invariants (however
    /// they got into the file) are skipped with a warning instead of
    /// corrupting the graph.
    pub fn apply_to(&self, host: &mut AudioGraphHost) -> Result<(), DocumentError> {
        if !self.is_compatible() {
            return Err(DocumentError::IncompatibleVersion(self.version));
        }

        host.clear();

        let mut id_map: HashMap<u32, NodeId> = HashMap::new();
        for node in &self.nodes {
            let (x, y) = position_of(&node.properties);
            let new_id = match node.kind {
                NodeKind::Plugin => {
                    let identifier = node.descriptor.as_deref().ok_or_else(|| {
                        DocumentError::Parse(format!(
                            "plugin node {} has no descriptor",
                            node.id
                        ))
                    })?;
                    let descriptor = PluginDescriptor::new(identifier, node.name.clone());
                    host.add_node(&descriptor, x, y)
                        .map_err(|_| DocumentError::UnknownPlugin(identifier.to_string()))?
                }
                kind => host.add_builtin(kind, x, y).ok_or_else(|| {
                    DocumentError::Parse(format!("node {} has an invalid kind", node.id))
                })?,
            };

            for (key, value) in &node.properties {
                host.set_node_property(new_id, key, value.clone());
            }
            id_map.insert(node.id, new_id);
        }

        for conn in &self.connections {
            let (source, dest) = match (id_map.get(&conn.from_node), id_map.get(&conn.to_node)) {
                (Some(&source), Some(&dest)) => (source, dest),
                _ => {
                    log::warn!(
                        "document connection references missing node {} -> {}, skipping",
                        conn.from_node,
                        conn.to_node
                    );
                    continue;
                }
            };
            if !host.connect(source, conn.from_channel, dest, conn.to_channel) {
                log::warn!(
                    "document connection {}:{} -> {}:{} violates graph invariants, skipping",
                    conn.from_node,
                    conn.from_channel,
                    conn.to_node,
                    conn.to_channel
                );
            }
        }

        host.clear_changes();
        Ok(())
    }

    /// Writes the document as pretty-printed JSON.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DocumentError::Parse(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| DocumentError::Io(e.to_string()))
    }

    /// Reads a document from a JSON file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let json = std::fs::read_to_string(path).map_err(|e| DocumentError::Io(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| DocumentError::Parse(e.to_string()))
    }
}

fn position_of(properties: &HashMap<String, PropertyValue>) -> (f64, f64) {
    let read = |key: &str| {
        properties
            .get(key)
            .and_then(PropertyValue::as_number)
            .unwrap_or(0.0)
    };
    (read("x"), read("y"))
}
