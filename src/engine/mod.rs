//! Engine module
//!
//! Device-facing machinery: the cpal audio engine and its callback
//! processor, hardware MIDI input, the MIDI collector funnel, and the
//! engine→UI event ring.

pub mod audio_engine;
pub mod audio_processor;
pub mod collector;
pub mod events;
pub mod midi_engine;

pub use audio_engine::{AudioEngine, AudioError, DeviceInfo};
pub use audio_processor::AudioProcessor;
pub use collector::{MidiCollector, DEFAULT_COLLECTOR_CAPACITY};
pub use events::{
    event_channel, event_channel_with_defaults, EngineEvent, EventReceiver, EventSender,
    DEFAULT_EVENT_BUFFER_SIZE,
};
pub use midi_engine::{MidiDeviceInfo, MidiEngine, MidiError};
