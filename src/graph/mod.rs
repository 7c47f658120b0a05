//! Graph module
//!
//! The plugin graph core: node/connection model, plugin boundary traits,
//! the mutating host, and the immutable render plans it publishes to the
//! audio thread.

pub mod host;
pub mod midi;
pub mod node;
pub mod plugin;
pub mod render;

pub use host::AudioGraphHost;
pub use midi::{MidiEvent, TimestampedMidiEvent};
pub use node::{
    ChannelIndex, Connection, Node, NodeId, NodeKind, PropertyValue, MIDI_CHANNEL_INDEX,
};
pub use plugin::{
    EditorHost, InstantiationError, PluginDescriptor, PluginFactory, PluginProcessor,
    PluginRegistry, PluginResolver,
};
pub use render::{NodeState, Processor, RenderPlan, MAX_BLOCK_SIZE, MIDI_EVENT_CAPACITY};
