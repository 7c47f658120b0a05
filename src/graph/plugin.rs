//! The plugin processor interface and its resolution services.
//!
//! The host treats plugin instantiation and editor windows as opaque
//! external services: a `PluginResolver` turns descriptors into processor
//! instances, and an `EditorHost` is told when a node's editor must close.
//! `PluginRegistry` is the in-process resolver used by tests and builtin
//! processors.

use std::collections::HashMap;
use std::fmt;

use crate::graph::midi::TimestampedMidiEvent;
use crate::graph::node::NodeId;

/// Identifies a plugin type that a resolver can instantiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Unique identifier, stable across sessions (e.g., "fx.gain").
    pub identifier: String,
    /// Human-readable name.
    pub name: String,
}

impl PluginDescriptor {
    /// Creates a new descriptor.
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
        }
    }
}

/// Errors raised when a descriptor cannot be turned into a processor.
///
/// Always recoverable: the node is simply not added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    /// No plugin with the given identifier is known to the resolver.
    UnknownPlugin(String),
    /// The plugin was found but failed to load.
    LoadFailed { identifier: String, reason: String },
}

impl fmt::Display for InstantiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiationError::UnknownPlugin(id) => {
                write!(f, "Unknown plugin '{}'", id)
            }
            InstantiationError::LoadFailed { identifier, reason } => {
                write!(f, "Plugin '{}' failed to load: {}", identifier, reason)
            }
        }
    }
}

impl std::error::Error for InstantiationError {}

/// The interface every hosted processor implements.
///
/// # Thread Safety
///
/// `PluginProcessor` requires `Send + 'static` because instances are
/// created on the UI thread and then processed on the audio thread.
///
/// # Real-time Constraints
///
/// `process` runs on the audio thread and must not allocate, acquire locks,
/// perform I/O, or block. Any buffers the processor needs must be allocated
/// in `prepare`.
pub trait PluginProcessor: Send + 'static {
    /// Display name of this instance.
    fn name(&self) -> &str;

    /// Number of audio input channels.
    fn audio_inputs(&self) -> u32;

    /// Number of audio output channels.
    fn audio_outputs(&self) -> u32;

    /// Whether the processor consumes MIDI events.
    fn accepts_midi(&self) -> bool {
        false
    }

    /// Whether the processor produces MIDI events.
    fn produces_midi(&self) -> bool {
        false
    }

    /// Prepares the processor for playback.
    ///
    /// Called off the audio thread before processing begins and whenever the
    /// sample rate changes.
    fn prepare(&mut self, sample_rate: f32, max_block_size: usize);

    /// Processes one block of audio and MIDI.
    ///
    /// `inputs` holds one buffer per input channel, `outputs` one buffer per
    /// output channel, each at least `num_samples` long. Incoming MIDI for
    /// the block arrives in `midi_in`; produced events are pushed to
    /// `midi_out`, which has a fixed capacity that must not be exceeded.
    fn process(
        &mut self,
        inputs: &[Vec<f32>],
        outputs: &mut [Vec<f32>],
        midi_in: &[TimestampedMidiEvent],
        midi_out: &mut Vec<TimestampedMidiEvent>,
        num_samples: usize,
    );

    /// Clears internal state (delay lines, envelopes, held voices).
    fn reset(&mut self);
}

/// Resolves plugin descriptors into processor instances.
///
/// The real implementation wraps whatever plugin format machinery the
/// application ships; the host only depends on this boundary.
pub trait PluginResolver: Send {
    /// Instantiates a processor for the descriptor.
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
    ) -> Result<Box<dyn PluginProcessor>, InstantiationError>;
}

/// Notified when a node's native editor window must close.
///
/// Owned by the host as an injected collaborator rather than a process-wide
/// registry, so multiple host instances can coexist and tear down
/// deterministically.
pub trait EditorHost {
    /// Whether an editor window is currently open for the node.
    fn has_editor(&self, node_id: NodeId) -> bool;

    /// Closes the editor window for the node, if one is open.
    fn close_editor(&self, node_id: NodeId);
}

/// Factory function type for creating processor instances.
pub type PluginFactory = fn() -> Box<dyn PluginProcessor>;

/// An in-process catalog of plugin types keyed by identifier.
///
/// Serves as the `PluginResolver` for builtin processors and tests.
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory under the given identifier.
    /// Replaces any previous registration with the same identifier.
    pub fn register(&mut self, identifier: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(identifier.into(), factory);
    }

    /// Checks if an identifier is registered.
    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Returns the number of registered plugin types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no plugin types are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginResolver for PluginRegistry {
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
    ) -> Result<Box<dyn PluginProcessor>, InstantiationError> {
        self.factories
            .get(&descriptor.identifier)
            .map(|factory| factory())
            .ok_or_else(|| InstantiationError::UnknownPlugin(descriptor.identifier.clone()))
    }
}
