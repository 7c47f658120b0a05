//! Keyboard module
//!
//! The virtual/physical keyboard input component: the shared sounding-note
//! table, position→note geometry with computer-key mapping, and the
//! controller that turns input events into MIDI and reconciles the drawn
//! state with the audio side.

pub mod controller;
pub mod layout;
pub mod state;

pub use controller::{VirtualKeyboardController, MAX_INPUT_SOURCES};
pub use layout::{is_black_note, KeyPressMap, KeyboardLayout, Orientation};
pub use state::{NoteKeyState, ALL_CHANNELS_MASK, NOTE_COUNT};
