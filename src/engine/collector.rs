//! MIDI collector: the funnel between input sources and the render thread.
//!
//! The virtual keyboard (UI thread) and the hardware MIDI callback both
//! feed the same collector, which mirrors note transitions into the shared
//! `NoteKeyState` table and enqueues the event for the graph's MIDI input
//! node. The queue is an rtrb SPSC ring: the consumer end lives in the
//! audio callback; the producer end is shared between the two non-real-time
//! source threads behind a mutex they alone contend on.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::graph::midi::{MidiEvent, TimestampedMidiEvent};
use crate::keyboard::state::NoteKeyState;

/// Default number of events the collector queue can hold.
pub const DEFAULT_COLLECTOR_CAPACITY: usize = 512;

/// Shared handle for enqueueing MIDI towards the graph.
///
/// Cloning is cheap; all clones feed the same queue and note table.
#[derive(Clone)]
pub struct MidiCollector {
    producer: Arc<Mutex<Producer<TimestampedMidiEvent>>>,
    state: Arc<NoteKeyState>,
    epoch: Instant,
}

impl MidiCollector {
    /// Creates a collector and the consumer end for the audio callback.
    pub fn new(state: Arc<NoteKeyState>) -> (Self, Consumer<TimestampedMidiEvent>) {
        Self::with_capacity(state, DEFAULT_COLLECTOR_CAPACITY)
    }

    /// Creates a collector with an explicit queue capacity.
    pub fn with_capacity(
        state: Arc<NoteKeyState>,
        capacity: usize,
    ) -> (Self, Consumer<TimestampedMidiEvent>) {
        let (producer, consumer) = RingBuffer::new(capacity);
        let collector = Self {
            producer: Arc::new(Mutex::new(producer)),
            state,
            epoch: Instant::now(),
        };
        (collector, consumer)
    }

    /// The shared sounding-note table this collector mirrors into.
    pub fn state(&self) -> &Arc<NoteKeyState> {
        &self.state
    }

    /// Starts a note: updates the note table, then enqueues the event.
    ///
    /// `channel` is 1-16 and `velocity` is clamped to [0, 1]; out-of-range
    /// arguments are a no-op.
    pub fn note_on(&self, channel: u8, note: u8, velocity: f32) {
        if !(1..=16).contains(&channel) || note > 127 {
            return;
        }
        let velocity = velocity.clamp(0.0, 1.0);
        self.state.note_on(channel, note, velocity);
        self.enqueue(MidiEvent::NoteOn {
            channel: channel - 1,
            note,
            velocity: ((velocity * 127.0).round() as u8).max(1),
        });
    }

    /// Releases a note: updates the note table, then enqueues the event.
    pub fn note_off(&self, channel: u8, note: u8) {
        if !(1..=16).contains(&channel) || note > 127 {
            return;
        }
        self.state.note_off(channel, note);
        self.enqueue(MidiEvent::NoteOff {
            channel: channel - 1,
            note,
            velocity: 0,
        });
    }

    /// Enqueues a raw event from the hardware MIDI thread, mirroring note
    /// transitions into the note table on the way through.
    pub fn push(&self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => {
                self.state
                    .note_on(channel + 1, note, velocity as f32 / 127.0);
            }
            MidiEvent::NoteOff { channel, note, .. } => {
                self.state.note_off(channel + 1, note);
            }
            _ => {}
        }
        self.enqueue(event);
    }

    /// Lossy enqueue: a full queue drops the event rather than blocking.
    fn enqueue(&self, event: MidiEvent) {
        let timestamped = TimestampedMidiEvent {
            event,
            timestamp_us: self.epoch.elapsed().as_micros() as u64,
        };
        if let Ok(mut producer) = self.producer.lock() {
            if producer.push(timestamped).is_err() {
                log::debug!("MIDI collector queue full, dropping {:?}", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_collector() -> (MidiCollector, Consumer<TimestampedMidiEvent>) {
        MidiCollector::new(Arc::new(NoteKeyState::new()))
    }

    #[test]
    fn test_note_on_updates_state_and_queue() {
        let (collector, mut consumer) = make_collector();

        collector.note_on(1, 60, 0.8);

        assert!(collector.state().is_note_on(1, 60));
        let queued = consumer.pop().unwrap();
        assert!(matches!(
            queued.event,
            MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                ..
            }
        ));
    }

    #[test]
    fn test_note_off_clears_state() {
        let (collector, mut consumer) = make_collector();

        collector.note_on(1, 60, 1.0);
        collector.note_off(1, 60);

        assert!(!collector.state().is_note_on(1, 60));
        assert!(matches!(
            consumer.pop().unwrap().event,
            MidiEvent::NoteOn { .. }
        ));
        assert!(matches!(
            consumer.pop().unwrap().event,
            MidiEvent::NoteOff { note: 60, .. }
        ));
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let (collector, mut consumer) = make_collector();

        collector.note_on(0, 60, 1.0);
        collector.note_on(17, 60, 1.0);
        collector.note_off(0, 60);

        assert!(consumer.pop().is_err());
        assert_eq!(collector.state().changes(), 0);
    }

    #[test]
    fn test_hardware_push_mirrors_note_table() {
        let (collector, mut consumer) = make_collector();

        // Wire-format channel 0 is MIDI channel 1.
        collector.push(MidiEvent::NoteOn {
            channel: 0,
            note: 64,
            velocity: 100,
        });
        assert!(collector.state().is_note_on(1, 64));

        collector.push(MidiEvent::NoteOff {
            channel: 0,
            note: 64,
            velocity: 0,
        });
        assert!(!collector.state().is_note_on(1, 64));

        // Non-note events pass through without touching the table.
        collector.push(MidiEvent::ControlChange {
            channel: 0,
            controller: 1,
            value: 64,
        });
        assert_eq!(consumer.slots(), 3);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let state = Arc::new(NoteKeyState::new());
        let (collector, mut consumer) = MidiCollector::with_capacity(state, 2);

        collector.note_on(1, 60, 1.0);
        collector.note_on(1, 61, 1.0);
        collector.note_on(1, 62, 1.0); // dropped from the queue

        assert_eq!(consumer.slots(), 2);
        // The note table still saw the dropped event.
        assert!(collector.state().is_note_on(1, 62));
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let (collector, mut consumer) = make_collector();

        collector.note_on(1, 60, 1.0);
        collector.note_off(1, 60);

        let first = consumer.pop().unwrap();
        let second = consumer.pop().unwrap();
        assert!(second.timestamp_us >= first.timestamp_us);
    }

    #[test]
    fn test_collector_clones_share_queue() {
        let (collector, mut consumer) = make_collector();
        let clone = collector.clone();

        collector.note_on(1, 60, 1.0);
        clone.note_on(2, 61, 1.0);

        assert_eq!(consumer.slots(), 2);
        assert!(consumer.pop().is_ok());
        assert!(consumer.pop().is_ok());
    }

    #[test]
    fn test_collector_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MidiCollector>();
    }
}
