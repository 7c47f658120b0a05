//! Audio Processor
//!
//! The per-callback glue that runs on the audio thread: drains the MIDI
//! collector, loads the current render plan, renders the graph in bounded
//! chunks, mirrors the output into the recording tap, and reports meter
//! levels to the UI through the lossy event ring.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rtrb::Consumer;

use crate::engine::events::{EngineEvent, EventSender};
use crate::graph::midi::TimestampedMidiEvent;
use crate::graph::render::{RenderPlan, MAX_BLOCK_SIZE, MIDI_EVENT_CAPACITY};
use crate::record::recorder::RecordTap;

/// How often to send level events, in audio callbacks.
/// At 44100 Hz with 256-sample blocks this is roughly 20 Hz.
const LEVEL_REPORT_INTERVAL: u32 = 8;

/// Runs inside the device callback and must stay real-time safe:
/// no allocation, no blocking waits, no I/O.
pub struct AudioProcessor {
    /// Current topology snapshot, published by the graph host.
    plan: Arc<ArcSwap<RenderPlan>>,
    /// Consumer end of the MIDI collector queue.
    midi_rx: Consumer<TimestampedMidiEvent>,
    /// Preallocated per-block event scratch.
    midi_scratch: Vec<TimestampedMidiEvent>,
    events: EventSender,
    tap: RecordTap,
    frame_counter: u32,
    reported_drops: u64,
    announced_start: bool,
}

impl AudioProcessor {
    /// Creates a processor around the host's plan handle, the collector
    /// consumer, the UI event sender, and the recording tap.
    pub fn new(
        plan: Arc<ArcSwap<RenderPlan>>,
        midi_rx: Consumer<TimestampedMidiEvent>,
        events: EventSender,
        tap: RecordTap,
    ) -> Self {
        Self {
            plan,
            midi_rx,
            midi_scratch: Vec::with_capacity(MIDI_EVENT_CAPACITY),
            events,
            tap,
            frame_counter: 0,
            reported_drops: 0,
            announced_start: false,
        }
    }

    /// Processes one device callback.
    ///
    /// `input` may be empty when no input device is open; `output` is the
    /// interleaved device buffer with `channels` channels.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }

        if !self.announced_start {
            self.announced_start = true;
            self.events.send_lossy(EngineEvent::Started);
        }

        // Drain this block's MIDI; anything beyond the scratch capacity
        // waits in the ring for the next block.
        self.midi_scratch.clear();
        while self.midi_scratch.len() < MIDI_EVENT_CAPACITY {
            match self.midi_rx.pop() {
                Ok(event) => self.midi_scratch.push(event),
                Err(_) => break,
            }
        }

        // Device callbacks can exceed the plan's block budget; render in
        // chunks, delivering the MIDI batch with the first one.
        let plan = self.plan.load();
        let chunk_len = MAX_BLOCK_SIZE * channels;
        for (index, out_chunk) in output.chunks_mut(chunk_len).enumerate() {
            let start = index * chunk_len;
            let in_chunk = if input.len() > start {
                &input[start..input.len().min(start + out_chunk.len())]
            } else {
                &[]
            };
            let midi = if index == 0 { &self.midi_scratch[..] } else { &[] };
            plan.render(in_chunk, out_chunk, channels, midi);
        }

        self.tap.write_block(output, channels);
        self.report_levels(output, channels);
        self.report_overruns();
    }

    /// Notifies the UI that the stream stopped. Called by the engine after
    /// the stream is torn down, not from the callback.
    pub fn notify_stopped(&mut self) {
        self.announced_start = false;
        self.events.send_lossy(EngineEvent::Stopped);
    }

    fn report_levels(&mut self, output: &[f32], channels: usize) {
        self.frame_counter += 1;
        if self.frame_counter < LEVEL_REPORT_INTERVAL {
            return;
        }
        self.frame_counter = 0;

        let mut left = 0.0_f32;
        let mut right = 0.0_f32;
        for frame in output.chunks_exact(channels) {
            left = left.max(frame[0].abs());
            if channels > 1 {
                right = right.max(frame[1].abs());
            }
        }
        if channels == 1 {
            right = left;
        }
        self.events.send_lossy(EngineEvent::OutputLevel { left, right });
    }

    fn report_overruns(&mut self) {
        let dropped = self.tap.dropped_samples();
        if dropped > self.reported_drops {
            self.reported_drops = dropped;
            self.events
                .send_lossy(EngineEvent::RecordingOverrun { dropped });
        }
    }
}
