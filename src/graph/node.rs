//! Node and connection model for the plugin graph.
//!
//! Nodes are opaque processing units identified by a unique id. Connections
//! are directed edges between a specific output channel of one node and an
//! input channel of another; the reserved channel index `MIDI_CHANNEL_INDEX`
//! addresses a node's MIDI pin instead of an audio channel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node in the graph.
/// Ids start at 1 and are never reused while the host lives.
pub type NodeId = u32;

/// Index of an audio channel on a node, or the MIDI sentinel.
pub type ChannelIndex = u32;

/// Reserved channel index meaning "the MIDI pin" rather than an audio
/// channel (the unsigned equivalent of the traditional -1 sentinel).
pub const MIDI_CHANNEL_INDEX: ChannelIndex = ChannelIndex::MAX;

/// The closed set of node kinds hosted by the graph.
///
/// Builtin kinds are the graph's connection points to the outside world;
/// `Plugin` covers every externally instantiated processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Presents the device input channels to the graph.
    AudioInput,
    /// The graph terminal; its gathered input becomes the rendered output.
    AudioOutput,
    /// The designated MIDI source; emits events drained from the collector.
    MidiInput,
    /// An externally instantiated processor.
    Plugin,
}

/// A typed value in a node's property bag.
///
/// Properties carry editor metadata (position, window geometry) for external
/// collaborators and never affect audio topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    /// Numeric property.
    Number(f64),
    /// Text property.
    Text(String),
    /// Boolean property.
    Flag(bool),
}

impl PropertyValue {
    /// Get the value as f64 if it is numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A node in the plugin graph.
///
/// Holds identity, channel layout, and the property bag. The processor
/// instance itself lives in the render-side state cell so that DSP state
/// survives topology rebuilds.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique id assigned by the host.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Which of the closed set of kinds this node is.
    pub kind: NodeKind,
    /// Descriptor identifier for plugin nodes, None for builtins.
    pub descriptor_id: Option<String>,
    /// Number of audio input channels.
    pub audio_inputs: u32,
    /// Number of audio output channels.
    pub audio_outputs: u32,
    /// Whether the node consumes MIDI.
    pub accepts_midi: bool,
    /// Whether the node produces MIDI.
    pub produces_midi: bool,
    /// Arbitrary key-value metadata for external collaborators.
    pub properties: HashMap<String, PropertyValue>,
}

impl Node {
    /// Property keys used for the editor position.
    pub const PROP_X: &'static str = "x";
    pub const PROP_Y: &'static str = "y";

    /// Returns the stored editor position, defaulting to the origin.
    pub fn position(&self) -> (f64, f64) {
        let x = self
            .properties
            .get(Self::PROP_X)
            .and_then(PropertyValue::as_number)
            .unwrap_or(0.0);
        let y = self
            .properties
            .get(Self::PROP_Y)
            .and_then(PropertyValue::as_number)
            .unwrap_or(0.0);
        (x, y)
    }

    /// Stores the editor position in the property bag.
    pub fn set_position(&mut self, x: f64, y: f64) {
        self.properties
            .insert(Self::PROP_X.to_string(), PropertyValue::Number(x));
        self.properties
            .insert(Self::PROP_Y.to_string(), PropertyValue::Number(y));
    }
}

/// A connection between two pins in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    /// Source node id.
    pub source: NodeId,
    /// Output channel index on the source node, or the MIDI sentinel.
    pub source_channel: ChannelIndex,
    /// Destination node id.
    pub dest: NodeId,
    /// Input channel index on the destination node, or the MIDI sentinel.
    pub dest_channel: ChannelIndex,
}

impl Connection {
    /// Creates a new connection.
    pub fn new(
        source: NodeId,
        source_channel: ChannelIndex,
        dest: NodeId,
        dest_channel: ChannelIndex,
    ) -> Self {
        Self {
            source,
            source_channel,
            dest,
            dest_channel,
        }
    }

    /// Returns true if this connection carries MIDI rather than audio.
    pub fn is_midi(&self) -> bool {
        self.dest_channel == MIDI_CHANNEL_INDEX
    }

    /// Returns true if this connection touches the given node on either end.
    pub fn touches(&self, node_id: NodeId) -> bool {
        self.source == node_id || self.dest == node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> Node {
        Node {
            id: 1,
            name: "Test".to_string(),
            kind: NodeKind::Plugin,
            descriptor_id: Some("test.plugin".to_string()),
            audio_inputs: 2,
            audio_outputs: 2,
            accepts_midi: false,
            produces_midi: false,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_position_defaults_to_origin() {
        let node = test_node();
        assert_eq!(node.position(), (0.0, 0.0));
    }

    #[test]
    fn test_position_round_trip() {
        let mut node = test_node();
        node.set_position(0.25, 0.75);
        assert_eq!(node.position(), (0.25, 0.75));
    }

    #[test]
    fn test_position_ignores_non_numeric_property() {
        let mut node = test_node();
        node.properties.insert(
            Node::PROP_X.to_string(),
            PropertyValue::Text("oops".to_string()),
        );
        assert_eq!(node.position().0, 0.0);
    }

    #[test]
    fn test_connection_equality() {
        let a = Connection::new(1, 0, 2, 1);
        let b = Connection::new(1, 0, 2, 1);
        let c = Connection::new(1, 0, 3, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_connection_is_midi() {
        let audio = Connection::new(1, 0, 2, 0);
        let midi = Connection::new(1, MIDI_CHANNEL_INDEX, 2, MIDI_CHANNEL_INDEX);
        assert!(!audio.is_midi());
        assert!(midi.is_midi());
    }

    #[test]
    fn test_connection_touches() {
        let conn = Connection::new(1, 0, 2, 0);
        assert!(conn.touches(1));
        assert!(conn.touches(2));
        assert!(!conn.touches(3));
    }

    #[test]
    fn test_property_value_serde_round_trip() {
        let value = PropertyValue::Number(0.5);
        let json = serde_json::to_string(&value).unwrap();
        let back: PropertyValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_midi_sentinel_is_max() {
        // The sentinel must never collide with a real channel index.
        assert_eq!(MIDI_CHANNEL_INDEX, u32::MAX);
    }
}
