//! Process-wide table of currently sounding MIDI notes.
//!
//! One atomic channel mask per note plus the velocity that triggered it.
//! Both the audio/MIDI threads and the UI thread mutate the table through
//! the same `note_on`/`note_off` entry points, so there is a single
//! serialization point; every update is a single atomic bit operation,
//! never proportional to UI work. Readers poll the change counter to skip
//! scans when nothing moved.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};

/// Number of MIDI notes tracked.
pub const NOTE_COUNT: usize = 128;

/// Channel mask covering all 16 MIDI channels.
pub const ALL_CHANNELS_MASK: u16 = 0xFFFF;

/// Thread-safe sounding-note table shared by the audio thread, the MIDI
/// input thread, and the UI.
pub struct NoteKeyState {
    /// Per-note mask of sounding channels; bit n = MIDI channel n+1.
    notes: [AtomicU16; NOTE_COUNT],
    /// Velocity latched by the most recent note-on (0-127).
    velocities: [AtomicU8; NOTE_COUNT],
    /// Bumped on every on/off transition; pollers compare against the last
    /// value they saw.
    changes: AtomicU64,
}

impl NoteKeyState {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            notes: std::array::from_fn(|_| AtomicU16::new(0)),
            velocities: std::array::from_fn(|_| AtomicU8::new(0)),
            changes: AtomicU64::new(0),
        }
    }

    /// Bit for a 1-16 MIDI channel, or None when out of range.
    fn channel_bit(channel: u8) -> Option<u16> {
        if (1..=16).contains(&channel) {
            Some(1 << (channel - 1))
        } else {
            None
        }
    }

    /// Marks a note as sounding on the given channel (1-16).
    ///
    /// Velocity is clamped to [0, 1] and latched as a 7-bit value of at
    /// least 1. Out-of-range channels or notes are a no-op.
    pub fn note_on(&self, channel: u8, note: u8, velocity: f32) {
        let bit = match Self::channel_bit(channel) {
            Some(bit) => bit,
            None => return,
        };
        if note as usize >= NOTE_COUNT {
            return;
        }

        let stored = ((velocity.clamp(0.0, 1.0) * 127.0).round() as u8).max(1);
        self.velocities[note as usize].store(stored, Ordering::Relaxed);

        let previous = self.notes[note as usize].fetch_or(bit, Ordering::AcqRel);
        if previous & bit == 0 {
            self.changes.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Clears a note on the given channel (1-16).
    pub fn note_off(&self, channel: u8, note: u8) {
        let bit = match Self::channel_bit(channel) {
            Some(bit) => bit,
            None => return,
        };
        if note as usize >= NOTE_COUNT {
            return;
        }

        let previous = self.notes[note as usize].fetch_and(!bit, Ordering::AcqRel);
        if previous & bit != 0 {
            self.changes.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Clears every note on the given channel (1-16).
    pub fn all_notes_off(&self, channel: u8) {
        for note in 0..NOTE_COUNT as u8 {
            self.note_off(channel, note);
        }
    }

    /// Whether the note is sounding on the given channel (1-16).
    pub fn is_note_on(&self, channel: u8, note: u8) -> bool {
        match Self::channel_bit(channel) {
            Some(bit) => self.is_note_on_for_channels(bit, note),
            None => false,
        }
    }

    /// Whether the note is sounding on any channel selected by `mask`
    /// (bit n = MIDI channel n+1).
    pub fn is_note_on_for_channels(&self, mask: u16, note: u8) -> bool {
        if note as usize >= NOTE_COUNT {
            return false;
        }
        self.notes[note as usize].load(Ordering::Acquire) & mask != 0
    }

    /// The velocity latched by the most recent note-on for this note,
    /// as a float in [0, 1].
    pub fn velocity(&self, note: u8) -> f32 {
        if note as usize >= NOTE_COUNT {
            return 0.0;
        }
        self.velocities[note as usize].load(Ordering::Relaxed) as f32 / 127.0
    }

    /// Monotonic transition counter for pollers.
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Acquire)
    }
}

impl Default for NoteKeyState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_note_on_off() {
        let state = NoteKeyState::new();
        assert!(!state.is_note_on(1, 60));

        state.note_on(1, 60, 0.8);
        assert!(state.is_note_on(1, 60));

        state.note_off(1, 60);
        assert!(!state.is_note_on(1, 60));
    }

    #[test]
    fn test_channels_are_independent() {
        let state = NoteKeyState::new();
        state.note_on(1, 60, 1.0);
        state.note_on(5, 60, 1.0);

        state.note_off(1, 60);
        assert!(!state.is_note_on(1, 60));
        assert!(state.is_note_on(5, 60));
    }

    #[test]
    fn test_channel_mask_query() {
        let state = NoteKeyState::new();
        state.note_on(3, 72, 1.0);

        assert!(state.is_note_on_for_channels(ALL_CHANNELS_MASK, 72));
        assert!(state.is_note_on_for_channels(1 << 2, 72));
        assert!(!state.is_note_on_for_channels(1 << 0, 72));
    }

    #[test]
    fn test_invalid_channel_is_noop() {
        let state = NoteKeyState::new();
        state.note_on(0, 60, 1.0);
        state.note_on(17, 60, 1.0);
        assert!(!state.is_note_on_for_channels(ALL_CHANNELS_MASK, 60));
        assert_eq!(state.changes(), 0);
    }

    #[test]
    fn test_velocity_latched_and_clamped() {
        let state = NoteKeyState::new();
        state.note_on(1, 60, 0.5);
        assert!((state.velocity(60) - 64.0 / 127.0).abs() < 0.01);

        // Clamped at the top, and a zero velocity still registers audibly.
        state.note_on(1, 61, 2.0);
        assert!((state.velocity(61) - 1.0).abs() < f32::EPSILON);
        state.note_on(1, 62, 0.0);
        assert!(state.velocity(62) > 0.0);
    }

    #[test]
    fn test_changes_counts_transitions_only() {
        let state = NoteKeyState::new();
        assert_eq!(state.changes(), 0);

        state.note_on(1, 60, 1.0);
        assert_eq!(state.changes(), 1);

        // Re-triggering an already sounding note is not a transition.
        state.note_on(1, 60, 0.5);
        assert_eq!(state.changes(), 1);

        state.note_off(1, 60);
        assert_eq!(state.changes(), 2);

        // Releasing a silent note is not a transition.
        state.note_off(1, 60);
        assert_eq!(state.changes(), 2);
    }

    #[test]
    fn test_all_notes_off_sweeps_channel() {
        let state = NoteKeyState::new();
        state.note_on(1, 60, 1.0);
        state.note_on(1, 64, 1.0);
        state.note_on(2, 67, 1.0);

        state.all_notes_off(1);

        assert!(!state.is_note_on(1, 60));
        assert!(!state.is_note_on(1, 64));
        assert!(state.is_note_on(2, 67));
    }

    #[test]
    fn test_concurrent_updates_from_two_threads() {
        let state = Arc::new(NoteKeyState::new());

        let writer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..1000 {
                    state.note_on(1, 60, 1.0);
                    state.note_off(1, 60);
                }
            })
        };

        for _ in 0..1000 {
            state.note_on(2, 61, 1.0);
            state.note_off(2, 61);
        }

        writer.join().unwrap();

        assert!(!state.is_note_on(1, 60));
        assert!(!state.is_note_on(2, 61));
        assert_eq!(state.changes(), 4000);
    }

    #[test]
    fn test_state_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoteKeyState>();
    }
}
