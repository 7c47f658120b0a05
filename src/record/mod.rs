//! Record module
//!
//! The audio-to-disk recording pipeline: lock-free hand-off from the render
//! callback, a background writer thread, and the decoupled waveform
//! summary consumer.

pub mod recorder;
pub mod thumbnail;

pub use recorder::{AudioRecorder, RecordError, RecordTap, RECORD_QUEUE_CAPACITY};
pub use thumbnail::{
    PeakBucket, ThumbnailTap, WaveformSummary, DEFAULT_SAMPLES_PER_BUCKET,
    DEFAULT_THUMBNAIL_CAPACITY,
};
