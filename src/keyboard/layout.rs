//! Keyboard geometry and input mapping.
//!
//! Maps pointer coordinates to (note, velocity) pairs and back, and maps
//! computer-keyboard keys to notes relative to a movable base octave.
//!
//! Each octave spans a fixed proportional layout (seven equal white keys,
//! black keys offset by fixed fractions of a key width), so one formula
//! serves every orientation: vertical layouts transpose the probe point
//! before the lookup. Black keys are drawn on top of white keys and must
//! be hit-tested first.

use egui::{Pos2, Rect, Vec2};

/// Semitones within an octave that are white keys (C D E F G A B).
pub const WHITE_NOTES: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
/// Semitones within an octave that are black keys (C# D# F# G# A#).
pub const BLACK_NOTES: [u8; 5] = [1, 3, 6, 8, 10];

/// Black key width as a fraction of the white key width.
const BLACK_NOTE_WIDTH_RATIO: f32 = 0.7;

/// Horizontal start of each semitone within an octave, in white-key units.
/// Black keys sit between their neighbours at uneven fractions so the
/// groups of two and three read correctly.
const NOTE_POSITIONS: [f32; 12] = [
    0.0,
    1.0 - BLACK_NOTE_WIDTH_RATIO * 0.6,
    1.0,
    2.0 - BLACK_NOTE_WIDTH_RATIO * 0.4,
    2.0,
    3.0,
    4.0 - BLACK_NOTE_WIDTH_RATIO * 0.7,
    4.0,
    5.0 - BLACK_NOTE_WIDTH_RATIO * 0.5,
    5.0,
    6.0 - BLACK_NOTE_WIDTH_RATIO * 0.3,
    6.0,
];

/// Whether a MIDI note is a black key.
pub fn is_black_note(note: u8) -> bool {
    BLACK_NOTES.contains(&(note % 12))
}

/// Which way the keyboard is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Keys run left to right.
    Horizontal,
    /// Keys run top to bottom, keyboard faces left.
    VerticalFacingLeft,
    /// Keys run bottom to top, keyboard faces right.
    VerticalFacingRight,
}

/// Position→note geometry for the virtual keyboard.
pub struct KeyboardLayout {
    orientation: Orientation,
    /// White key width in pixels.
    key_width: f32,
    /// Black key length as a fraction of the white key length.
    black_note_length_ratio: f32,
    /// Lowest displayable note.
    range_start: u8,
    /// Highest displayable note.
    range_end: u8,
    /// Lowest visible key; float so scrolling can be smooth.
    first_key: f32,
    /// Component bounds.
    width: f32,
    height: f32,
}

impl KeyboardLayout {
    /// Creates a horizontal layout showing the full range from C4.
    pub fn new() -> Self {
        Self {
            orientation: Orientation::Horizontal,
            key_width: 16.0,
            black_note_length_ratio: 0.7,
            range_start: 0,
            range_end: 127,
            first_key: 12.0 * 4.0,
            width: 0.0,
            height: 0.0,
        }
    }

    /// Sets the component bounds used for hit-testing.
    pub fn set_bounds(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    /// Sets the drawing orientation.
    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    /// Current orientation.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Sets the white key width in pixels. Non-positive widths are ignored.
    pub fn set_key_width(&mut self, width: f32) {
        if width > 0.0 {
            self.key_width = width;
        }
    }

    /// Restricts the displayable note range; out-of-range requests clamp.
    pub fn set_available_range(&mut self, lowest: u8, highest: u8) {
        let lowest = lowest.min(127);
        let highest = highest.min(127).max(lowest);
        self.range_start = lowest;
        self.range_end = highest;
        self.first_key = self.first_key.clamp(lowest as f32, highest as f32);
    }

    /// Displayable range, inclusive.
    pub fn available_range(&self) -> (u8, u8) {
        (self.range_start, self.range_end)
    }

    /// Scrolls so the given key is the lowest visible one.
    /// Returns true when the integer key actually changed.
    pub fn set_lowest_visible_key(&mut self, key: f32) -> bool {
        let clamped = key.clamp(self.range_start as f32, self.range_end as f32);
        let moved = clamped as i32 != self.first_key as i32;
        self.first_key = clamped;
        moved
    }

    /// Lowest visible key.
    pub fn lowest_visible_key(&self) -> f32 {
        self.first_key
    }

    /// Key length along the white keys' long axis.
    fn white_note_length(&self) -> f32 {
        match self.orientation {
            Orientation::Horizontal => self.height,
            _ => self.width,
        }
    }

    /// Black key length along the long axis.
    fn black_note_length(&self) -> f32 {
        self.white_note_length() * self.black_note_length_ratio
    }

    /// Absolute (start, width) of a key measured from note 0.
    fn absolute_key_position(&self, note: u8) -> (f32, f32) {
        let octave = (note / 12) as f32;
        let semitone = (note % 12) as usize;
        let x = octave * 7.0 * self.key_width + NOTE_POSITIONS[semitone] * self.key_width;
        let w = if is_black_note(note) {
            BLACK_NOTE_WIDTH_RATIO * self.key_width
        } else {
            self.key_width
        };
        (x, w)
    }

    /// (start, width) of a key relative to the current scroll position.
    pub fn key_position(&self, note: u8) -> (f32, f32) {
        let (x, w) = self.absolute_key_position(note);
        let (origin, _) = self.absolute_key_position(self.first_key as u8);
        (x - origin, w)
    }

    /// Extent from the scroll origin to the end of the highest key.
    pub fn total_width(&self) -> f32 {
        let (x, w) = self.key_position(self.range_end);
        x + w
    }

    /// Bounding rectangle of a key in component coordinates, or None when
    /// the note is outside the displayable range.
    pub fn rect_for_key(&self, note: u8) -> Option<Rect> {
        if note < self.range_start || note > self.range_end {
            return None;
        }
        let (x, w) = self.key_position(note);

        let rect = if is_black_note(note) {
            let length = self.black_note_length();
            match self.orientation {
                Orientation::Horizontal => {
                    Rect::from_min_size(Pos2::new(x, 0.0), Vec2::new(w, length))
                }
                Orientation::VerticalFacingLeft => Rect::from_min_size(
                    Pos2::new(self.width - length, x),
                    Vec2::new(length, w),
                ),
                Orientation::VerticalFacingRight => Rect::from_min_size(
                    Pos2::new(0.0, self.height - x - w),
                    Vec2::new(length, w),
                ),
            }
        } else {
            match self.orientation {
                Orientation::Horizontal => {
                    Rect::from_min_size(Pos2::new(x, 0.0), Vec2::new(w, self.height))
                }
                Orientation::VerticalFacingLeft => {
                    Rect::from_min_size(Pos2::new(0.0, x), Vec2::new(self.width, w))
                }
                Orientation::VerticalFacingRight => Rect::from_min_size(
                    Pos2::new(0.0, self.height - x - w),
                    Vec2::new(self.width, w),
                ),
            }
        };
        Some(rect)
    }

    /// Maps a point in component coordinates to the key under it, with the
    /// fractional position along the key for velocity derivation.
    ///
    /// The black key strip overlaps the white keys and is tested first.
    pub fn note_at(&self, pos: Pos2) -> Option<(u8, f32)> {
        if pos.x < 0.0 || pos.x >= self.width || pos.y < 0.0 || pos.y >= self.height {
            return None;
        }

        // Transpose the probe so the lookup always works in horizontal
        // coordinates.
        let probe = match self.orientation {
            Orientation::Horizontal => pos,
            Orientation::VerticalFacingLeft => Pos2::new(pos.y, self.width - pos.x),
            Orientation::VerticalFacingRight => Pos2::new(self.height - pos.y, pos.x),
        };

        let black_length = self.black_note_length();
        if probe.y < black_length {
            if let Some(note) = self.scan_strip(&BLACK_NOTES, probe.x) {
                return Some((note, probe.y / black_length));
            }
        }

        let white_length = self.white_note_length();
        if white_length > 0.0 {
            if let Some(note) = self.scan_strip(&WHITE_NOTES, probe.x) {
                return Some((note, probe.y / white_length));
            }
        }
        None
    }

    /// Scans one strip (black or white semitones) octave by octave for a
    /// key spanning the given x coordinate.
    fn scan_strip(&self, semitones: &[u8], x: f32) -> Option<u8> {
        let mut octave_start = 12 * (self.range_start / 12);
        loop {
            for &semitone in semitones {
                let note = octave_start.checked_add(semitone)?;
                if note >= self.range_start && note <= self.range_end {
                    let (kx, kw) = self.key_position(note);
                    if x >= kx && x < kx + kw {
                        return Some(note);
                    }
                }
            }
            octave_start = octave_start.checked_add(12)?;
            if octave_start > self.range_end {
                return None;
            }
        }
    }
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Injective map from computer-keyboard keys to note offsets relative to a
/// movable base octave.
pub struct KeyPressMap {
    /// (key, semitone offset from the base octave's C).
    bindings: Vec<(egui::Key, i32)>,
    /// Base octave; note = 12 * base_octave + offset.
    base_octave: i32,
}

impl KeyPressMap {
    /// Creates an empty map with the default base octave.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            base_octave: 4,
        }
    }

    /// The default two-row chromatic QWERTY layout.
    pub fn default_layout() -> Self {
        use egui::Key;

        let mut map = Self::new();
        let layout: [(Key, i32); 36] = [
            (Key::Q, 0),
            (Key::Num1, 1),
            (Key::W, 2),
            (Key::Num2, 3),
            (Key::E, 4),
            (Key::R, 5),
            (Key::Num3, 6),
            (Key::T, 7),
            (Key::Num4, 8),
            (Key::Y, 9),
            (Key::Num5, 10),
            (Key::U, 11),
            (Key::I, 12),
            (Key::Num6, 13),
            (Key::O, 14),
            (Key::Num7, 15),
            (Key::P, 16),
            (Key::A, 17),
            (Key::Num8, 18),
            (Key::S, 19),
            (Key::Num9, 20),
            (Key::D, 21),
            (Key::Num0, 22),
            (Key::F, 23),
            (Key::G, 24),
            (Key::H, 26),
            (Key::J, 28),
            (Key::K, 29),
            (Key::L, 31),
            (Key::Z, 33),
            (Key::X, 35),
            (Key::C, 36),
            (Key::V, 38),
            (Key::B, 40),
            (Key::N, 41),
            (Key::M, 43),
        ];
        for (key, offset) in layout {
            map.bind(key, offset);
        }
        map
    }

    /// Binds a key to a note offset, replacing any key previously bound to
    /// the same offset.
    pub fn bind(&mut self, key: egui::Key, offset: i32) {
        self.bindings.retain(|(_, o)| *o != offset);
        self.bindings.push((key, offset));
    }

    /// Removes the binding for a note offset, if any.
    pub fn unbind(&mut self, offset: i32) {
        self.bindings.retain(|(_, o)| *o != offset);
    }

    /// Number of bound keys.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no keys are bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Moves the base octave. Values outside 0-10 are ignored, so held
    /// notes can always be released at their original pitch.
    pub fn set_base_octave(&mut self, octave: i32) {
        if (0..=10).contains(&octave) {
            self.base_octave = octave;
        }
    }

    /// Current base octave.
    pub fn base_octave(&self) -> i32 {
        self.base_octave
    }

    /// The note a binding currently produces, or None when the shifted
    /// offset falls outside 0-127.
    pub fn note_for_offset(&self, offset: i32) -> Option<u8> {
        let note = 12 * self.base_octave + offset;
        if (0..128).contains(&note) {
            Some(note as u8)
        } else {
            None
        }
    }

    /// Iterates over (key, note) pairs at the current base octave,
    /// skipping bindings shifted out of MIDI range.
    pub fn notes(&self) -> impl Iterator<Item = (egui::Key, u8)> + '_ {
        self.bindings
            .iter()
            .filter_map(|&(key, offset)| self.note_for_offset(offset).map(|note| (key, note)))
    }
}

impl Default for KeyPressMap {
    fn default() -> Self {
        Self::default_layout()
    }
}
