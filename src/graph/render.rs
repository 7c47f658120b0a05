//! Immutable render plans evaluated on the audio thread.
//!
//! The host rebuilds a complete `RenderPlan` after every structural change
//! and publishes it atomically; the audio callback only ever loads a plan
//! and walks its steps. Per-node processor state lives in `Arc<Mutex>`
//! cells shared across plan rebuilds, so DSP state survives topology edits.
//! Only the render thread locks the cells while rendering (uncontended
//! `try_lock` with a silence fallback), keeping the callback free of
//! blocking waits and allocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::graph::midi::TimestampedMidiEvent;
use crate::graph::node::{Connection, Node, NodeId, NodeKind, MIDI_CHANNEL_INDEX};
use crate::graph::plugin::PluginProcessor;

/// Largest block length a single render pass will process.
/// Longer device callbacks are split into chunks of this size.
pub const MAX_BLOCK_SIZE: usize = 2048;

/// Fixed capacity of every per-node MIDI scratch buffer.
/// Events beyond this many per block are dropped.
pub const MIDI_EVENT_CAPACITY: usize = 256;

/// The processing unit held by a node's state cell.
///
/// A closed set resolved by pattern match: the three builtin graph
/// endpoints plus externally instantiated plugins.
pub enum Processor {
    /// Presents device input channels to the graph.
    AudioInput,
    /// Graph terminal; gathered input becomes the rendered output block.
    AudioOutput,
    /// Emits the externally collected MIDI events for the block.
    MidiInput,
    /// An externally instantiated processor.
    Plugin(Box<dyn PluginProcessor>),
}

/// Per-node processing state: the processor plus its preallocated scratch.
///
/// Owned behind `Arc<Mutex<..>>` so the same instance can be referenced by
/// successive render plans without losing DSP state.
pub struct NodeState {
    processor: Processor,
    /// Audio input scratch, one buffer per input channel.
    inputs: Vec<Vec<f32>>,
    /// Audio output scratch, one buffer per output channel.
    outputs: Vec<Vec<f32>>,
    /// Incoming MIDI for the current block.
    midi_in: Vec<TimestampedMidiEvent>,
    /// MIDI produced during the current block.
    midi_out: Vec<TimestampedMidiEvent>,
}

impl NodeState {
    /// Creates a state cell for a processor with the given channel counts.
    pub fn new(processor: Processor, audio_inputs: u32, audio_outputs: u32) -> Self {
        Self {
            processor,
            inputs: vec![Vec::new(); audio_inputs as usize],
            outputs: vec![Vec::new(); audio_outputs as usize],
            midi_in: Vec::new(),
            midi_out: Vec::new(),
        }
    }

    /// Allocates scratch buffers and prepares the processor.
    ///
    /// Must run off the audio thread; this is the only place the state
    /// allocates.
    pub fn prepare(&mut self, sample_rate: f32) {
        for buffer in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            buffer.clear();
            buffer.resize(MAX_BLOCK_SIZE, 0.0);
        }
        self.midi_in = Vec::with_capacity(MIDI_EVENT_CAPACITY);
        self.midi_out = Vec::with_capacity(MIDI_EVENT_CAPACITY);

        if let Processor::Plugin(plugin) = &mut self.processor {
            plugin.prepare(sample_rate, MAX_BLOCK_SIZE);
        }
    }

    /// Clears processor state and scratch contents.
    pub fn reset(&mut self) {
        for buffer in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            buffer.iter_mut().for_each(|s| *s = 0.0);
        }
        self.midi_in.clear();
        self.midi_out.clear();
        if let Processor::Plugin(plugin) = &mut self.processor {
            plugin.reset();
        }
    }

    /// Whether scratch buffers have been allocated.
    fn is_prepared(&self) -> bool {
        self.midi_in.capacity() > 0
            && self
                .inputs
                .iter()
                .chain(self.outputs.iter())
                .all(|b| b.len() >= MAX_BLOCK_SIZE)
    }
}

/// One node's slot in a render plan.
pub struct RenderStep {
    /// Node this step renders.
    pub node_id: NodeId,
    /// Kind tag, duplicated here so render never locks just to dispatch.
    pub kind: NodeKind,
    /// Shared processor state cell.
    pub state: Arc<Mutex<NodeState>>,
    /// For each audio input channel, the (step index, output channel)
    /// feeding it. At most one source per input per the graph invariants.
    pub audio_sources: Vec<Option<(usize, usize)>>,
    /// Step indices whose MIDI output feeds this step (fan-in is merged).
    pub midi_sources: Vec<usize>,
}

/// A complete, immutable snapshot of the graph topology in execution order.
pub struct RenderPlan {
    steps: Vec<RenderStep>,
    /// Index of the audio output step, if the graph has one.
    output_step: Option<usize>,
}

impl RenderPlan {
    /// An empty plan that renders silence. Used before the first publish.
    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            output_step: None,
        }
    }

    /// Builds a plan from the host's node and connection sets.
    ///
    /// Nodes are ordered with Kahn's algorithm (deterministic: ties resolve
    /// by node id). Connections referencing nodes without a state cell are
    /// ignored rather than dereferenced.
    pub fn build(
        nodes: &HashMap<NodeId, Node>,
        connections: &[Connection],
        states: &HashMap<NodeId, Arc<Mutex<NodeState>>>,
    ) -> Self {
        let order = topological_order(nodes, connections);

        // Map node id to step index for routing lookups.
        let mut step_index: HashMap<NodeId, usize> = HashMap::new();
        let mut steps: Vec<RenderStep> = Vec::with_capacity(order.len());

        for node_id in order {
            let node = match nodes.get(&node_id) {
                Some(n) => n,
                None => continue,
            };
            let state = match states.get(&node_id) {
                Some(s) => Arc::clone(s),
                None => continue,
            };

            let mut audio_sources = vec![None; node.audio_inputs as usize];
            let mut midi_sources = Vec::new();

            for conn in connections.iter().filter(|c| c.dest == node_id) {
                let source_step = match step_index.get(&conn.source) {
                    Some(&idx) => idx,
                    None => continue,
                };
                if conn.dest_channel == MIDI_CHANNEL_INDEX {
                    midi_sources.push(source_step);
                } else if (conn.dest_channel as usize) < audio_sources.len() {
                    audio_sources[conn.dest_channel as usize] =
                        Some((source_step, conn.source_channel as usize));
                }
            }

            step_index.insert(node_id, steps.len());
            steps.push(RenderStep {
                node_id,
                kind: node.kind,
                state,
                audio_sources,
                midi_sources,
            });
        }

        let output_step = steps.iter().position(|s| s.kind == NodeKind::AudioOutput);

        Self { steps, output_step }
    }

    /// Number of steps in the plan.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Node ids in execution order.
    pub fn node_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.steps.iter().map(|s| s.node_id)
    }

    /// Renders one block through the graph.
    ///
    /// `input` and `output` are interleaved device buffers with `channels`
    /// channels each (`input` may be empty when no input device is open).
    /// `midi` holds the externally collected events for this block,
    /// delivered through any `MidiInput` node.
    ///
    /// Real-time safe: no allocation, no blocking waits. A state cell whose
    /// lock is unavailable (a UI-thread `prepare` in flight) is skipped for
    /// this block and its previous output is reused.
    pub fn render(
        &self,
        input: &[f32],
        output: &mut [f32],
        channels: usize,
        midi: &[TimestampedMidiEvent],
    ) {
        output.iter_mut().for_each(|s| *s = 0.0);
        if channels == 0 {
            return;
        }
        let frames = (output.len() / channels).min(MAX_BLOCK_SIZE);

        for (index, step) in self.steps.iter().enumerate() {
            let mut state = match step.state.try_lock() {
                Ok(state) => state,
                Err(_) => continue,
            };
            if !state.is_prepared() {
                continue;
            }

            // Split-borrow the cell so inputs can be filled while the
            // processor is borrowed mutably below.
            let NodeState {
                processor,
                inputs,
                outputs,
                midi_in,
                midi_out,
            } = &mut *state;

            // Gather MIDI fan-in from upstream producers.
            midi_in.clear();
            for &source in &step.midi_sources {
                if source == index {
                    continue;
                }
                if let Ok(upstream) = self.steps[source].state.try_lock() {
                    for &event in &upstream.midi_out {
                        if midi_in.len() < MIDI_EVENT_CAPACITY {
                            midi_in.push(event);
                        }
                    }
                }
            }

            // Gather audio inputs; unconnected channels read silence.
            for (source, buffer) in step.audio_sources.iter().zip(inputs.iter_mut()) {
                match source {
                    Some((source_step, source_channel)) if *source_step != index => {
                        match self.steps[*source_step].state.try_lock() {
                            Ok(upstream) if *source_channel < upstream.outputs.len() => {
                                buffer[..frames]
                                    .copy_from_slice(&upstream.outputs[*source_channel][..frames]);
                            }
                            _ => buffer[..frames].iter_mut().for_each(|s| *s = 0.0),
                        }
                    }
                    _ => buffer[..frames].iter_mut().for_each(|s| *s = 0.0),
                }
            }

            match processor {
                Processor::AudioInput => {
                    for (channel, buffer) in outputs.iter_mut().enumerate() {
                        for frame in 0..frames {
                            buffer[frame] =
                                input.get(frame * channels + channel).copied().unwrap_or(0.0);
                        }
                    }
                }
                Processor::AudioOutput => {
                    // The terminal step: interleave gathered input into the
                    // device buffer.
                    for frame in 0..frames {
                        for channel in 0..channels {
                            output[frame * channels + channel] = inputs
                                .get(channel)
                                .map(|buffer| buffer[frame])
                                .unwrap_or(0.0);
                        }
                    }
                    midi_out.clear();
                }
                Processor::MidiInput => {
                    midi_out.clear();
                    for &event in midi.iter().take(MIDI_EVENT_CAPACITY) {
                        midi_out.push(event);
                    }
                }
                Processor::Plugin(plugin) => {
                    midi_out.clear();
                    plugin.process(inputs, outputs, midi_in, midi_out, frames);
                }
            }
        }
    }

    /// Whether the graph has an audio output node to render into.
    pub fn has_output(&self) -> bool {
        self.output_step.is_some()
    }
}

/// Computes a topological order over the nodes using Kahn's algorithm.
///
/// Ties between independent nodes resolve by ascending id so the order is
/// deterministic. If the connection set contains a cycle (prevented by the
/// host, but tolerated here), the nodes on the cycle are omitted.
fn topological_order(nodes: &HashMap<NodeId, Node>, connections: &[Connection]) -> Vec<NodeId> {
    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    for &node_id in nodes.keys() {
        in_degree.insert(node_id, 0);
    }
    for conn in connections {
        if nodes.contains_key(&conn.source) {
            if let Some(degree) = in_degree.get_mut(&conn.dest) {
                *degree += 1;
            }
        }
    }

    let mut ready: Vec<NodeId> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&node_id, _)| node_id)
        .collect();
    ready.sort_unstable();

    let mut order = Vec::with_capacity(nodes.len());
    while !ready.is_empty() {
        let node_id = ready.remove(0);
        order.push(node_id);

        for conn in connections.iter().filter(|c| c.source == node_id) {
            if let Some(degree) = in_degree.get_mut(&conn.dest) {
                *degree -= 1;
                if *degree == 0 {
                    let insert = ready.binary_search(&conn.dest).unwrap_or_else(|p| p);
                    ready.insert(insert, conn.dest);
                }
            }
        }
    }

    order
}
