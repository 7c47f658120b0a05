//! Virtual keyboard controller.
//!
//! Translates pointer, multi-touch, and computer-keyboard input into MIDI
//! note events through the collector funnel, tracks which note each input
//! source is holding or hovering, and reconciles the drawn key state
//! against the shared sounding-note table on a low-frequency tick.
//!
//! Note-off follows the last-holder rule: a source releasing a note only
//! emits note-off when no other source (pointer, touch, or mapped key) is
//! still holding it, so glissandi and overlapping touches never leave a
//! note stuck on or cut a note another finger still presses.

use std::sync::Arc;

use egui::Pos2;

use crate::engine::collector::MidiCollector;
use crate::keyboard::layout::{KeyPressMap, KeyboardLayout};
use crate::keyboard::state::{NoteKeyState, ALL_CHANNELS_MASK, NOTE_COUNT};

/// One slot per simultaneous input source: the mouse plus touch points.
pub const MAX_INPUT_SOURCES: usize = 32;

/// Interaction and reconciliation state for the on-screen keyboard.
pub struct VirtualKeyboardController {
    collector: MidiCollector,
    state: Arc<NoteKeyState>,
    layout: KeyboardLayout,
    keymap: KeyPressMap,
    /// Channel (1-16) that emitted events are sent on.
    channel: u8,
    /// Channels whose sounding notes are shown (bit n = channel n+1).
    display_mask: u16,
    /// Overall velocity, also the fixed value in preset mode.
    velocity: f32,
    /// Derive velocity from the press position along the key.
    use_position_for_velocity: bool,
    /// Note each source is hovering, if any.
    pointer_over: [Option<u8>; MAX_INPUT_SOURCES],
    /// Note each source is pressing, if any.
    pointer_down: [Option<u8>; MAX_INPUT_SOURCES],
    /// Notes held through the computer-keyboard map.
    keys_pressed: [bool; NOTE_COUNT],
    /// Sounding state as last drawn, per note.
    drawn_down: [bool; NOTE_COUNT],
    /// Change counter value consumed by the last reconcile.
    seen_changes: u64,
    /// Forces the next reconcile to scan even without new transitions.
    check_pending: bool,
}

impl VirtualKeyboardController {
    /// Creates a controller feeding the given collector.
    pub fn new(collector: MidiCollector) -> Self {
        let state = Arc::clone(collector.state());
        Self {
            collector,
            state,
            layout: KeyboardLayout::new(),
            keymap: KeyPressMap::default_layout(),
            channel: 1,
            display_mask: ALL_CHANNELS_MASK,
            velocity: 1.0,
            use_position_for_velocity: true,
            pointer_over: [None; MAX_INPUT_SOURCES],
            pointer_down: [None; MAX_INPUT_SOURCES],
            keys_pressed: [false; NOTE_COUNT],
            drawn_down: [false; NOTE_COUNT],
            seen_changes: 0,
            check_pending: false,
        }
    }

    /// Geometry used for hit-testing and key rectangles.
    pub fn layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    /// Mutable geometry access for the owning view.
    pub fn layout_mut(&mut self) -> &mut KeyboardLayout {
        &mut self.layout
    }

    /// The computer-keyboard mapping.
    pub fn keymap(&self) -> &KeyPressMap {
        &self.keymap
    }

    /// Mutable mapping access for configuration UI.
    pub fn keymap_mut(&mut self) -> &mut KeyPressMap {
        &mut self.keymap
    }

    /// The channel events are emitted on (1-16).
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Changes the emit channel. Out-of-range values are a no-op; a real
    /// change first releases everything this component is holding so no
    /// note stays stuck on the old channel.
    pub fn set_channel(&mut self, channel: u8) {
        if !(1..=16).contains(&channel) || channel == self.channel {
            return;
        }
        self.release_all_held();
        self.channel = channel;
    }

    /// Selects which channels' sounding notes are displayed.
    pub fn set_channels_to_display(&mut self, mask: u16) {
        self.display_mask = mask;
        self.check_pending = true;
    }

    /// Sets the velocity multiplier (clamped to [0, 1]) and whether the
    /// press position along the key modulates it.
    pub fn set_velocity(&mut self, velocity: f32, use_position: bool) {
        self.velocity = velocity.clamp(0.0, 1.0);
        self.use_position_for_velocity = use_position;
    }

    /// Note a source is currently pressing, for paint.
    pub fn pressed_note(&self, source: usize) -> Option<u8> {
        self.pointer_down.get(source).copied().flatten()
    }

    /// Note a source is currently hovering, for paint.
    pub fn hovered_note(&self, source: usize) -> Option<u8> {
        self.pointer_over.get(source).copied().flatten()
    }

    /// Whether a key is drawn in its sounding state.
    pub fn is_note_drawn_down(&self, note: u8) -> bool {
        self.drawn_down
            .get(note as usize)
            .copied()
            .unwrap_or(false)
    }

    // ========================================================================
    // Pointer input (UI thread)
    // ========================================================================

    /// Hover update without a button held.
    /// Returns the notes whose hover highlight changed.
    pub fn pointer_move(&mut self, source: usize, pos: Pos2) -> Vec<u8> {
        self.update_note_under(source, Some(pos), false)
    }

    /// Press at a position; starts the note under it.
    pub fn pointer_down(&mut self, source: usize, pos: Pos2) -> Vec<u8> {
        self.update_note_under(source, Some(pos), true)
    }

    /// Drag while pressed; moving onto a different key plays a glissando.
    pub fn pointer_drag(&mut self, source: usize, pos: Pos2) -> Vec<u8> {
        self.update_note_under(source, Some(pos), true)
    }

    /// Release at a position.
    pub fn pointer_up(&mut self, source: usize, pos: Pos2) -> Vec<u8> {
        self.update_note_under(source, Some(pos), false)
    }

    /// The source left the component (or was cancelled).
    pub fn pointer_exit(&mut self, source: usize) -> Vec<u8> {
        self.update_note_under(source, None, false)
    }

    fn update_note_under(
        &mut self,
        source: usize,
        pos: Option<Pos2>,
        is_down: bool,
    ) -> Vec<u8> {
        if source >= MAX_INPUT_SOURCES {
            return Vec::new();
        }

        let hit = pos.and_then(|p| self.layout.note_at(p));
        let new_note = hit.map(|(note, _)| note);
        let fraction = hit.map(|(_, fraction)| fraction).unwrap_or(0.0);
        let event_velocity = if self.use_position_for_velocity {
            (fraction * self.velocity).clamp(0.0, 1.0)
        } else {
            self.velocity
        };

        let mut repaints = Vec::new();

        let old_over = self.pointer_over[source];
        if old_over != new_note {
            if let Some(note) = old_over {
                repaints.push(note);
            }
            if let Some(note) = new_note {
                repaints.push(note);
            }
            self.pointer_over[source] = new_note;
        }

        let old_down = self.pointer_down[source];
        if is_down {
            if new_note != old_down {
                if let Some(old) = old_down {
                    self.pointer_down[source] = None;
                    if !self.held_by_any_source(old) {
                        self.collector.note_off(self.channel, old);
                    }
                }
                if let Some(note) = new_note {
                    if !self.held_by_pointer(note) {
                        self.collector.note_on(self.channel, note, event_velocity);
                    }
                    self.pointer_down[source] = Some(note);
                }
            }
        } else if let Some(old) = old_down {
            self.pointer_down[source] = None;
            if !self.held_by_any_source(old) {
                self.collector.note_off(self.channel, old);
            }
        }

        repaints
    }

    // ========================================================================
    // Computer-keyboard input (UI thread)
    // ========================================================================

    /// Applies the current set of held keys, emitting note events for every
    /// mapped key whose state changed. Returns true when any mapped key was
    /// involved (so the caller can consume the input).
    pub fn keys_changed(&mut self, keys_down: &[egui::Key]) -> bool {
        let bindings: Vec<(egui::Key, u8)> = self.keymap.notes().collect();
        let mut used = false;

        for (key, note) in bindings {
            let is_down = keys_down.contains(&key);
            let was_down = self.keys_pressed[note as usize];

            if is_down && !was_down {
                self.keys_pressed[note as usize] = true;
                self.collector.note_on(self.channel, note, self.velocity);
                used = true;
            } else if !is_down && was_down {
                self.keys_pressed[note as usize] = false;
                if !self.held_by_any_source(note) {
                    self.collector.note_off(self.channel, note);
                }
                used = true;
            }
        }
        used
    }

    /// Shifts the keyboard one octave up or down (by the sign of `delta`):
    /// scrolls the visible range to the next octave boundary and moves the
    /// key-mapping base octave. Keyboard-held notes are released first so
    /// the re-mapping cannot strand a note at the old pitch.
    pub fn scroll_octave(&mut self, delta: i32) {
        if delta == 0 {
            return;
        }
        self.release_key_held_notes();

        let first = self.layout.lowest_visible_key() as i32;
        let (anchor, octave_step) = if delta < 0 {
            ((first - 1).div_euclid(12), -1)
        } else {
            (first.div_euclid(12) + 1, 1)
        };

        self.layout
            .set_lowest_visible_key((anchor * 12).clamp(0, 127) as f32);
        self.keymap
            .set_base_octave(self.keymap.base_octave() + octave_step);
    }

    // ========================================================================
    // Lifecycle sweeps
    // ========================================================================

    /// Keyboard focus moved to another window: unconditionally release every
    /// note this component is holding, regardless of pointer state.
    pub fn focus_lost(&mut self) {
        self.release_all_held();
    }

    /// Releases every held note and clears hover tracking.
    fn release_all_held(&mut self) {
        self.release_key_held_notes();

        for slot in 0..MAX_INPUT_SOURCES {
            if let Some(note) = self.pointer_down[slot].take() {
                if !self.held_by_any_source(note) {
                    self.collector.note_off(self.channel, note);
                }
            }
            self.pointer_over[slot] = None;
        }
    }

    /// Releases only the notes held through the key mapping.
    fn release_key_held_notes(&mut self) {
        for note in 0..NOTE_COUNT as u8 {
            if self.keys_pressed[note as usize] {
                self.keys_pressed[note as usize] = false;
                if !self.held_by_any_source(note) {
                    self.collector.note_off(self.channel, note);
                }
            }
        }
    }

    fn held_by_pointer(&self, note: u8) -> bool {
        self.pointer_down.iter().any(|&held| held == Some(note))
    }

    fn held_by_any_source(&self, note: u8) -> bool {
        self.held_by_pointer(note) || self.keys_pressed[note as usize]
    }

    // ========================================================================
    // Reconciliation (driven at ~20 Hz by the owner)
    // ========================================================================

    /// Re-reads the sounding-note table and returns exactly the notes whose
    /// drawn state flipped since the last call, bounding repaint cost to the
    /// changed keys. Skips the scan entirely when the table has not moved.
    ///
    /// Also detects local holders whose note was cleared externally (an
    /// all-notes-off from another device, for instance) and drops them so a
    /// later release cannot emit a spurious note-off.
    pub fn reconcile(&mut self) -> Vec<u8> {
        let current = self.state.changes();
        if current == self.seen_changes && !self.check_pending {
            return Vec::new();
        }
        self.seen_changes = current;
        self.check_pending = false;

        let mut repaints = Vec::new();
        let (lowest, highest) = self.layout.available_range();
        for note in lowest..=highest {
            let sounding = self.state.is_note_on_for_channels(self.display_mask, note);
            if self.drawn_down[note as usize] != sounding {
                self.drawn_down[note as usize] = sounding;
                repaints.push(note);
            }
        }

        for note in 0..NOTE_COUNT as u8 {
            if self.keys_pressed[note as usize] && !self.state.is_note_on(self.channel, note) {
                self.keys_pressed[note as usize] = false;
                log::warn!("stuck key-held note {} cleared externally, dropping hold", note);
            }
        }
        for slot in 0..MAX_INPUT_SOURCES {
            if let Some(note) = self.pointer_down[slot] {
                if !self.state.is_note_on(self.channel, note) {
                    self.pointer_down[slot] = None;
                    log::warn!(
                        "stuck pointer-held note {} cleared externally, dropping hold",
                        note
                    );
                }
            }
        }

        repaints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::midi::{MidiEvent, TimestampedMidiEvent};
    use rtrb::Consumer;

    fn make_controller() -> (VirtualKeyboardController, Consumer<TimestampedMidiEvent>) {
        let state = Arc::new(NoteKeyState::new());
        let (collector, consumer) = MidiCollector::new(state);
        let mut controller = VirtualKeyboardController::new(collector);
        controller.layout_mut().set_bounds(800.0, 80.0);
        (controller, consumer)
    }

    fn drain(consumer: &mut Consumer<TimestampedMidiEvent>) -> Vec<MidiEvent> {
        let mut events = Vec::new();
        while let Ok(queued) = consumer.pop() {
            events.push(queued.event);
        }
        events
    }

    fn center_of(controller: &VirtualKeyboardController, note: u8) -> Pos2 {
        controller.layout().rect_for_key(note).unwrap().center()
    }

    #[test]
    fn test_press_release_emits_matching_pair() {
        let (mut controller, mut consumer) = make_controller();
        let pos = center_of(&controller, 60);

        controller.pointer_down(0, pos);
        controller.pointer_up(0, pos);

        let events = drain(&mut consumer);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity,
            } if velocity > 0
        ));
        assert!(matches!(
            events[1],
            MidiEvent::NoteOff {
                channel: 0,
                note: 60,
                ..
            }
        ));
    }

    #[test]
    fn test_glissando_switches_notes() {
        let (mut controller, mut consumer) = make_controller();

        controller.pointer_down(0, center_of(&controller, 60));
        controller.pointer_drag(0, center_of(&controller, 62));
        controller.pointer_up(0, center_of(&controller, 62));

        let events = drain(&mut consumer);
        assert!(matches!(events[0], MidiEvent::NoteOn { note: 60, .. }));
        assert!(matches!(events[1], MidiEvent::NoteOff { note: 60, .. }));
        assert!(matches!(events[2], MidiEvent::NoteOn { note: 62, .. }));
        assert!(matches!(events[3], MidiEvent::NoteOff { note: 62, .. }));
    }

    #[test]
    fn test_last_holder_rule_across_touches() {
        let (mut controller, mut consumer) = make_controller();
        let pos = center_of(&controller, 60);

        controller.pointer_down(0, pos);
        controller.pointer_down(1, pos);

        // Second touch on the same key does not retrigger.
        assert_eq!(drain(&mut consumer).len(), 1);

        // First release: the other touch still holds the note.
        controller.pointer_up(0, pos);
        assert!(drain(&mut consumer).is_empty());
        assert!(controller.state.is_note_on(1, 60));

        // Last release turns the note off.
        controller.pointer_up(1, pos);
        let events = drain(&mut consumer);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MidiEvent::NoteOff { note: 60, .. }));
        assert!(!controller.state.is_note_on(1, 60));
    }

    #[test]
    fn test_last_holder_rule_across_key_and_pointer() {
        let (mut controller, mut consumer) = make_controller();
        controller.keymap_mut().set_base_octave(5); // Q plays 60
        let pos = center_of(&controller, 60);

        controller.pointer_down(0, pos);
        controller.keys_changed(&[egui::Key::Q]);
        controller.pointer_up(0, pos);

        // The mapped key still holds the note.
        assert!(controller.state.is_note_on(1, 60));

        controller.keys_changed(&[]);
        assert!(!controller.state.is_note_on(1, 60));

        let events = drain(&mut consumer);
        assert!(matches!(events.last(), Some(MidiEvent::NoteOff { note: 60, .. })));
    }

    #[test]
    fn test_keys_changed_emits_note_events() {
        let (mut controller, mut consumer) = make_controller();

        assert!(controller.keys_changed(&[egui::Key::Q]));
        assert!(controller.state.is_note_on(1, 48));

        assert!(controller.keys_changed(&[]));
        assert!(!controller.state.is_note_on(1, 48));

        let events = drain(&mut consumer);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_keys_changed_ignores_unmapped_keys() {
        let (mut controller, mut consumer) = make_controller();
        assert!(!controller.keys_changed(&[egui::Key::Escape]));
        assert!(drain(&mut consumer).is_empty());
    }

    #[test]
    fn test_focus_lost_releases_everything() {
        let (mut controller, _consumer) = make_controller();

        controller.pointer_down(0, center_of(&controller, 60));
        controller.keys_changed(&[egui::Key::Q]);
        assert!(controller.state.is_note_on(1, 60));
        assert!(controller.state.is_note_on(1, 48));

        controller.focus_lost();

        assert!(!controller.state.is_note_on(1, 60));
        assert!(!controller.state.is_note_on(1, 48));
        assert_eq!(controller.pressed_note(0), None);
    }

    #[test]
    fn test_channel_change_releases_held_notes() {
        let (mut controller, _consumer) = make_controller();

        controller.pointer_down(0, center_of(&controller, 60));
        controller.set_channel(2);

        assert!(!controller.state.is_note_on(1, 60));
        assert_eq!(controller.channel(), 2);

        controller.pointer_down(1, center_of(&controller, 64));
        assert!(controller.state.is_note_on(2, 64));
    }

    #[test]
    fn test_invalid_channel_is_noop() {
        let (mut controller, _consumer) = make_controller();
        controller.set_channel(0);
        assert_eq!(controller.channel(), 1);
        controller.set_channel(17);
        assert_eq!(controller.channel(), 1);
    }

    #[test]
    fn test_fixed_velocity_mode() {
        let (mut controller, mut consumer) = make_controller();
        controller.set_velocity(0.5, false);

        controller.pointer_down(0, center_of(&controller, 60));
        let events = drain(&mut consumer);
        assert!(matches!(
            events[0],
            MidiEvent::NoteOn { velocity: 64, .. }
        ));
    }

    #[test]
    fn test_position_velocity_mode() {
        let (mut controller, mut consumer) = make_controller();
        controller.set_velocity(1.0, true);

        let rect = controller.layout().rect_for_key(60).unwrap();
        let shallow = Pos2::new(rect.center().x, 58.0);
        let deep = Pos2::new(rect.center().x, 78.0);

        controller.pointer_down(0, shallow);
        controller.pointer_up(0, shallow);
        controller.pointer_down(0, deep);
        controller.pointer_up(0, deep);

        let events = drain(&mut consumer);
        let velocities: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                MidiEvent::NoteOn { velocity, .. } => Some(*velocity),
                _ => None,
            })
            .collect();
        assert_eq!(velocities.len(), 2);
        assert!(velocities[0] < velocities[1]);
    }

    #[test]
    fn test_octave_scroll_remaps_keys() {
        let (mut controller, _consumer) = make_controller();

        controller.keys_changed(&[egui::Key::Q]);
        assert!(controller.state.is_note_on(1, 48));

        controller.scroll_octave(1);
        // The held note was released, not stranded at the old pitch.
        assert!(!controller.state.is_note_on(1, 48));
        assert_eq!(controller.keymap().base_octave(), 5);

        // Same physical key now plays an octave higher.
        controller.keys_changed(&[]);
        controller.keys_changed(&[egui::Key::Q]);
        assert!(controller.state.is_note_on(1, 60));
    }

    #[test]
    fn test_octave_scroll_moves_visible_range() {
        let (mut controller, _consumer) = make_controller();
        let before = controller.layout().lowest_visible_key();

        controller.scroll_octave(1);
        assert!(controller.layout().lowest_visible_key() > before);

        controller.scroll_octave(-1);
        assert!((controller.layout().lowest_visible_key() - before).abs() < f32::EPSILON);
    }

    #[test]
    fn test_hover_returns_changed_notes() {
        let (mut controller, _consumer) = make_controller();
        let pos = center_of(&controller, 60);

        let repaints = controller.pointer_move(0, pos);
        assert_eq!(repaints, vec![60]);

        // Still over the same key: nothing to repaint.
        let repaints = controller.pointer_move(0, pos);
        assert!(repaints.is_empty());

        let repaints = controller.pointer_move(0, center_of(&controller, 62));
        assert_eq!(repaints, vec![60, 62]);
        assert_eq!(controller.hovered_note(0), Some(62));
    }

    #[test]
    fn test_reconcile_reports_only_changed_notes() {
        let (mut controller, _consumer) = make_controller();

        // External source (another MIDI device) starts a note.
        controller.state.note_on(3, 72, 0.9);
        assert_eq!(controller.reconcile(), vec![72]);
        assert!(controller.is_note_drawn_down(72));

        // Nothing moved: the scan is skipped entirely.
        assert!(controller.reconcile().is_empty());

        controller.state.note_off(3, 72);
        assert_eq!(controller.reconcile(), vec![72]);
        assert!(!controller.is_note_drawn_down(72));
    }

    #[test]
    fn test_reconcile_drops_externally_cleared_holds() {
        let (mut controller, mut consumer) = make_controller();

        controller.pointer_down(0, center_of(&controller, 60));
        drain(&mut consumer);

        // Another device forces all notes off underneath us.
        controller.state.all_notes_off(1);
        controller.reconcile();

        // The orphaned hold is dropped; release emits no spurious off.
        controller.pointer_up(0, center_of(&controller, 60));
        assert!(drain(&mut consumer).is_empty());
    }

    #[test]
    fn test_display_mask_filters_reconcile() {
        let (mut controller, _consumer) = make_controller();
        controller.set_channels_to_display(1 << 0); // channel 1 only
        controller.reconcile();

        controller.state.note_on(2, 70, 1.0);
        assert!(controller.reconcile().is_empty());

        controller.state.note_on(1, 71, 1.0);
        assert_eq!(controller.reconcile(), vec![71]);
    }

    #[test]
    fn test_out_of_range_source_ignored() {
        let (mut controller, mut consumer) = make_controller();
        let pos = center_of(&controller, 60);

        let repaints = controller.pointer_down(MAX_INPUT_SOURCES, pos);
        assert!(repaints.is_empty());
        assert!(drain(&mut consumer).is_empty());
    }
}
