//! The plugin graph host.
//!
//! Owns the node and connection sets and performs every structural
//! mutation on the UI/message thread. After each successful mutation the
//! host rebuilds a complete `RenderPlan` and publishes it atomically
//! through an `ArcSwap`, so the audio callback always observes either the
//! fully-old or the fully-new topology, never a partially edited one.
//!
//! Connection invariants (duplicate destination pins, channel ranges,
//! MIDI flags, cycles) are enforced inside `connect` itself; `can_connect`
//! is the pure advisory predicate the drag-to-connect UI uses to preview
//! legality.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::graph::node::{
    ChannelIndex, Connection, Node, NodeId, NodeKind, MIDI_CHANNEL_INDEX,
};
use crate::graph::plugin::{EditorHost, InstantiationError, PluginDescriptor, PluginResolver};
use crate::graph::render::{NodeState, Processor, RenderPlan};

/// Channel count used by the builtin audio input/output nodes.
const BUILTIN_CHANNELS: u32 = 2;

/// The node graph host.
pub struct AudioGraphHost {
    nodes: HashMap<NodeId, Node>,
    connections: Vec<Connection>,
    /// Render-side processor state cells, shared with published plans.
    states: HashMap<NodeId, Arc<Mutex<NodeState>>>,
    next_node_id: NodeId,
    plan: Arc<ArcSwap<RenderPlan>>,
    resolver: Box<dyn PluginResolver>,
    editor_host: Option<Box<dyn EditorHost>>,
    sample_rate: f32,
    changed: bool,
}

impl AudioGraphHost {
    /// Creates a host that resolves plugin descriptors through `resolver`.
    pub fn new(resolver: Box<dyn PluginResolver>) -> Self {
        Self {
            nodes: HashMap::new(),
            connections: Vec::new(),
            states: HashMap::new(),
            next_node_id: 1,
            plan: Arc::new(ArcSwap::from_pointee(RenderPlan::empty())),
            resolver,
            editor_host: None,
            sample_rate: 44100.0,
            changed: false,
        }
    }

    /// Installs the collaborator notified when node editors must close.
    pub fn set_editor_host(&mut self, editor_host: Box<dyn EditorHost>) {
        self.editor_host = Some(editor_host);
    }

    /// Handle the audio engine loads plans from. Cloning is cheap.
    pub fn plan_handle(&self) -> Arc<ArcSwap<RenderPlan>> {
        Arc::clone(&self.plan)
    }

    /// Updates the sample rate and re-prepares every processor.
    ///
    /// Called when the device stream (re)starts. Holding a state lock here
    /// can make the render thread skip that node for one block, which is
    /// the intended fallback.
    pub fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for cell in self.states.values() {
            if let Ok(mut state) = cell.lock() {
                state.prepare(sample_rate);
            }
        }
    }

    /// Clears all processor state (held voices, delay lines).
    pub fn reset(&mut self) {
        for cell in self.states.values() {
            if let Ok(mut state) = cell.lock() {
                state.reset();
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of connections in the graph.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Looks up a node by id.
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Iterates over all nodes in unspecified order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All connections in the graph.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Whether the graph changed since the flag was last cleared.
    /// External document management polls this to offer saving.
    pub fn has_changes(&self) -> bool {
        self.changed
    }

    /// Clears the changed flag (after a save).
    pub fn clear_changes(&mut self) {
        self.changed = false;
    }

    // ========================================================================
    // Structural mutation (UI thread only)
    // ========================================================================

    /// Instantiates a plugin and adds it as a node at the given editor
    /// position. On failure nothing is added.
    pub fn add_node(
        &mut self,
        descriptor: &PluginDescriptor,
        x: f64,
        y: f64,
    ) -> Result<NodeId, InstantiationError> {
        let processor = self.resolver.instantiate(descriptor)?;

        let node_id = self.next_id();
        let mut node = Node {
            id: node_id,
            name: processor.name().to_string(),
            kind: NodeKind::Plugin,
            descriptor_id: Some(descriptor.identifier.clone()),
            audio_inputs: processor.audio_inputs(),
            audio_outputs: processor.audio_outputs(),
            accepts_midi: processor.accepts_midi(),
            produces_midi: processor.produces_midi(),
            properties: HashMap::new(),
        };
        node.set_position(x, y);

        let mut state = NodeState::new(
            Processor::Plugin(processor),
            node.audio_inputs,
            node.audio_outputs,
        );
        state.prepare(self.sample_rate);

        self.states.insert(node_id, Arc::new(Mutex::new(state)));
        self.nodes.insert(node_id, node);
        self.changed = true;
        self.publish();
        Ok(node_id)
    }

    /// Adds one of the builtin endpoint nodes. Returns None if `kind` is
    /// `Plugin` (use `add_node` with a descriptor for those).
    pub fn add_builtin(&mut self, kind: NodeKind, x: f64, y: f64) -> Option<NodeId> {
        let (name, processor, inputs, outputs, accepts_midi, produces_midi) = match kind {
            NodeKind::AudioInput => (
                "Audio Input",
                Processor::AudioInput,
                0,
                BUILTIN_CHANNELS,
                false,
                false,
            ),
            NodeKind::AudioOutput => (
                "Audio Output",
                Processor::AudioOutput,
                BUILTIN_CHANNELS,
                0,
                false,
                false,
            ),
            NodeKind::MidiInput => ("MIDI Input", Processor::MidiInput, 0, 0, false, true),
            NodeKind::Plugin => return None,
        };

        let node_id = self.next_id();
        let mut node = Node {
            id: node_id,
            name: name.to_string(),
            kind,
            descriptor_id: None,
            audio_inputs: inputs,
            audio_outputs: outputs,
            accepts_midi,
            produces_midi,
            properties: HashMap::new(),
        };
        node.set_position(x, y);

        let mut state = NodeState::new(processor, inputs, outputs);
        state.prepare(self.sample_rate);

        self.states.insert(node_id, Arc::new(Mutex::new(state)));
        self.nodes.insert(node_id, node);
        self.changed = true;
        self.publish();
        Some(node_id)
    }

    /// Removes a node and every connection touching it.
    /// A missing id is a no-op, not an error.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if self.nodes.remove(&node_id).is_none() {
            return;
        }

        self.connections.retain(|conn| !conn.touches(node_id));
        self.states.remove(&node_id);

        if let Some(editor_host) = &self.editor_host {
            if editor_host.has_editor(node_id) {
                editor_host.close_editor(node_id);
            }
        }

        self.changed = true;
        self.publish();
    }

    /// Moves a node's stored editor position.
    pub fn set_node_position(&mut self, node_id: NodeId, x: f64, y: f64) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_position(x, y);
            self.changed = true;
        }
    }

    /// Stores a value in a node's property bag.
    /// Properties are editor metadata and never affect topology.
    pub fn set_node_property(&mut self, node_id: NodeId, key: &str, value: crate::graph::node::PropertyValue) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.properties.insert(key.to_string(), value);
            self.changed = true;
        }
    }

    /// Adds a connection if it satisfies every invariant.
    /// Returns false without mutating state otherwise.
    pub fn connect(
        &mut self,
        source: NodeId,
        source_channel: ChannelIndex,
        dest: NodeId,
        dest_channel: ChannelIndex,
    ) -> bool {
        if !self.can_connect(source, source_channel, dest, dest_channel) {
            return false;
        }
        self.connections
            .push(Connection::new(source, source_channel, dest, dest_channel));
        self.changed = true;
        self.publish();
        true
    }

    /// Removes a single exactly matching connection.
    pub fn disconnect(
        &mut self,
        source: NodeId,
        source_channel: ChannelIndex,
        dest: NodeId,
        dest_channel: ChannelIndex,
    ) -> bool {
        let target = Connection::new(source, source_channel, dest, dest_channel);
        let before = self.connections.len();
        self.connections.retain(|conn| *conn != target);

        let removed = self.connections.len() < before;
        if removed {
            self.changed = true;
            self.publish();
        }
        removed
    }

    /// Pure predicate: would `connect` with these arguments succeed?
    /// Used by drag-to-connect UI to preview legality without mutating.
    pub fn can_connect(
        &self,
        source: NodeId,
        source_channel: ChannelIndex,
        dest: NodeId,
        dest_channel: ChannelIndex,
    ) -> bool {
        let (src, dst) = match (self.nodes.get(&source), self.nodes.get(&dest)) {
            (Some(src), Some(dst)) => (src, dst),
            _ => return false,
        };

        if source == dest {
            return false;
        }

        let source_is_midi = source_channel == MIDI_CHANNEL_INDEX;
        let dest_is_midi = dest_channel == MIDI_CHANNEL_INDEX;
        if source_is_midi != dest_is_midi {
            return false;
        }

        if source_is_midi {
            if !src.produces_midi || !dst.accepts_midi {
                return false;
            }
            // MIDI pins may fan in and out, but the exact edge must be new.
            let candidate = Connection::new(source, source_channel, dest, dest_channel);
            if self.connections.contains(&candidate) {
                return false;
            }
        } else {
            if source_channel >= src.audio_outputs || dest_channel >= dst.audio_inputs {
                return false;
            }
            // An audio input pin accepts at most one feed.
            if self
                .connections
                .iter()
                .any(|conn| conn.dest == dest && conn.dest_channel == dest_channel)
            {
                return false;
            }
        }

        // The edge must not close a path from dest back to source.
        !self.path_exists(dest, source)
    }

    /// Removes every node and connection.
    pub fn clear(&mut self) {
        if self.nodes.is_empty() && self.connections.is_empty() {
            return;
        }

        if let Some(editor_host) = &self.editor_host {
            for &node_id in self.nodes.keys() {
                if editor_host.has_editor(node_id) {
                    editor_host.close_editor(node_id);
                }
            }
        }

        self.nodes.clear();
        self.connections.clear();
        self.states.clear();
        self.changed = true;
        self.publish();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn next_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    /// Depth-first reachability over the current connection set.
    fn path_exists(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited: Vec<NodeId> = Vec::new();
        let mut stack: Vec<NodeId> = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            for conn in self.connections.iter().filter(|c| c.source == current) {
                stack.push(conn.dest);
            }
        }
        false
    }

    /// Rebuilds and atomically publishes the render plan.
    fn publish(&mut self) {
        let plan = RenderPlan::build(&self.nodes, &self.connections, &self.states);
        self.plan.store(Arc::new(plan));
    }
}
