//! Audio-to-disk recording pipeline.
//!
//! The real-time side is a `RecordTap` living in the audio callback: a
//! non-blocking push into a bounded SPSC ring, dropping (and counting)
//! samples when the ring is momentarily full: a gap in the file is an
//! accepted degradation, a blocked callback is not. A background writer
//! thread drains the ring and performs the slow encode-and-write through
//! `hound`; stopping clears the recording flag first so the callback stops
//! enqueueing, then flushes and finalizes off the real-time thread.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::record::thumbnail::{ThumbnailTap, WaveformSummary};

/// Default number of samples the hand-off ring can hold.
pub const RECORD_QUEUE_CAPACITY: usize = 32768;

/// How long the writer thread sleeps when the ring is empty.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Errors surfaced when a recording session cannot start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No sample rate is known yet (the device has not started).
    /// Recoverable: the pipeline stays idle and the caller may retry.
    DeviceUnavailable,
    /// The output file could not be opened or written.
    Io(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::DeviceUnavailable => {
                write!(f, "No sample rate available, device not started")
            }
            RecordError::Io(msg) => write!(f, "Recording I/O error: {}", msg),
        }
    }
}

impl std::error::Error for RecordError {}

/// State shared between the tap, the recorder, and the writer thread.
struct TapShared {
    /// Gate the callback checks before enqueueing. Set last on start,
    /// cleared first on stop.
    recording: AtomicBool,
    /// Samples dropped because the ring was full.
    dropped: AtomicU64,
    /// Monotonic count of samples offered to the pipeline this session.
    position: AtomicU64,
}

/// The real-time producer half, moved into the audio callback.
pub struct RecordTap {
    producer: Producer<f32>,
    shared: Arc<TapShared>,
    thumbnail: ThumbnailTap,
}

impl RecordTap {
    /// Mirrors one interleaved output block into the recording queue.
    ///
    /// Records the first channel (the writer is mono). Returns immediately
    /// in every case; a full ring drops the remainder of the block and
    /// bumps the drop counter.
    pub fn write_block(&mut self, interleaved: &[f32], channels: usize) {
        if channels == 0 || !self.shared.recording.load(Ordering::Acquire) {
            return;
        }
        let frames = interleaved.len() / channels;
        if frames == 0 {
            return;
        }

        let available = self.producer.slots().min(frames);
        let mut pushed = 0;
        if available > 0 {
            if let Ok(chunk) = self.producer.write_chunk_uninit(available) {
                pushed = chunk.fill_from_iter(
                    interleaved
                        .chunks_exact(channels)
                        .take(available)
                        .map(|frame| frame[0]),
                );
            }
        }

        if pushed < frames {
            self.shared
                .dropped
                .fetch_add((frames - pushed) as u64, Ordering::Relaxed);
        }
        self.shared
            .position
            .fetch_add(frames as u64, Ordering::Relaxed);

        self.thumbnail
            .extend(interleaved.chunks_exact(channels).map(|frame| frame[0]));
    }

    /// Whether a session is currently consuming pushed samples.
    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// Samples dropped this session, for overrun reporting.
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// An active session's writer thread handle.
struct RecordingSession {
    /// Tells the writer to drain what remains and finalize.
    finished: Arc<AtomicBool>,
    /// Returns the ring's consumer half for the next session.
    thread: thread::JoinHandle<Consumer<f32>>,
}

/// Owns the recording state machine: `Idle → Recording → Idle`.
pub struct AudioRecorder {
    shared: Arc<TapShared>,
    /// Sample rate published by the audio engine; zero when stopped.
    sample_rate: Arc<AtomicU32>,
    /// Consumer half, present whenever no session is active.
    consumer: Option<Consumer<f32>>,
    session: Option<RecordingSession>,
}

impl AudioRecorder {
    /// Creates the pipeline: the recorder, the callback-side tap, and the
    /// waveform summary consumer.
    pub fn new(sample_rate: Arc<AtomicU32>) -> (Self, RecordTap, WaveformSummary) {
        Self::with_capacity(sample_rate, RECORD_QUEUE_CAPACITY)
    }

    /// Creates the pipeline with an explicit hand-off ring capacity.
    pub fn with_capacity(
        sample_rate: Arc<AtomicU32>,
        capacity: usize,
    ) -> (Self, RecordTap, WaveformSummary) {
        let (producer, consumer) = RingBuffer::new(capacity);
        let (summary, thumbnail) = WaveformSummary::new();
        let shared = Arc::new(TapShared {
            recording: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            position: AtomicU64::new(0),
        });

        let recorder = Self {
            shared: Arc::clone(&shared),
            sample_rate,
            consumer: Some(consumer),
            session: None,
        };
        let tap = RecordTap {
            producer,
            shared,
            thumbnail,
        };
        (recorder, tap, summary)
    }

    /// Starts recording to `path`, stopping any active session first.
    ///
    /// Fails without creating a file when no sample rate is known (device
    /// not started) or the file cannot be opened; the pipeline stays idle.
    pub fn start(&mut self, path: impl AsRef<Path>) -> Result<(), RecordError> {
        self.stop();

        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        if sample_rate == 0 {
            return Err(RecordError::DeviceUnavailable);
        }

        let mut consumer = match self.consumer.take() {
            Some(consumer) => consumer,
            None => return Err(RecordError::Io("queue consumer unavailable".to_string())),
        };
        // Discard anything a previous session left behind.
        while consumer.pop().is_ok() {}

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = match hound::WavWriter::create(path.as_ref(), spec) {
            Ok(writer) => writer,
            Err(err) => {
                self.consumer = Some(consumer);
                return Err(RecordError::Io(err.to_string()));
            }
        };

        self.shared.dropped.store(0, Ordering::Relaxed);
        self.shared.position.store(0, Ordering::Relaxed);

        let finished = Arc::new(AtomicBool::new(false));
        let thread = {
            let finished = Arc::clone(&finished);
            let shared = Arc::clone(&self.shared);
            thread::spawn(move || drain_to_disk(consumer, writer, finished, shared))
        };

        self.session = Some(RecordingSession { finished, thread });
        // Flip the gate last so the callback only enqueues into a session
        // that is fully set up.
        self.shared.recording.store(true, Ordering::Release);
        Ok(())
    }

    /// Stops the active session, if any.
    ///
    /// Clears the recording gate first (the next render block stops
    /// enqueueing), then joins the writer, which drains the ring and
    /// finalizes the file off the real-time thread. Idempotent.
    pub fn stop(&mut self) {
        self.shared.recording.store(false, Ordering::Release);

        if let Some(session) = self.session.take() {
            session.finished.store(true, Ordering::Release);
            match session.thread.join() {
                Ok(consumer) => self.consumer = Some(consumer),
                Err(_) => log::warn!("recording writer thread panicked"),
            }
        }
    }

    /// Whether a session is active.
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Samples dropped by the tap this session.
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Samples offered to the pipeline this session.
    pub fn sample_position(&self) -> u64 {
        self.shared.position.load(Ordering::Relaxed)
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Writer-thread loop: drain the ring into the encoder until told to
/// finish and the ring is empty, then finalize and hand the consumer back.
fn drain_to_disk(
    mut consumer: Consumer<f32>,
    mut writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    finished: Arc<AtomicBool>,
    shared: Arc<TapShared>,
) -> Consumer<f32> {
    let mut reported_drops = 0_u64;
    let mut write_failed = false;

    loop {
        let mut drained_any = false;
        while let Ok(sample) = consumer.pop() {
            drained_any = true;
            if write_failed {
                continue;
            }
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            if let Err(err) = writer.write_sample(value) {
                log::warn!("recording write failed, discarding rest of session: {}", err);
                write_failed = true;
            }
        }

        let drops = shared.dropped.load(Ordering::Relaxed);
        if drops > reported_drops {
            log::warn!(
                "recording queue overran, {} samples dropped",
                drops - reported_drops
            );
            reported_drops = drops;
        }

        if finished.load(Ordering::Acquire) && consumer.is_empty() {
            break;
        }
        if !drained_any {
            thread::sleep(DRAIN_IDLE_SLEEP);
        }
    }

    if let Err(err) = writer.finalize() {
        log::warn!("failed to finalize recording: {}", err);
    }
    consumer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pipeline(rate: u32) -> (AudioRecorder, RecordTap, WaveformSummary, Arc<AtomicU32>) {
        let sample_rate = Arc::new(AtomicU32::new(rate));
        let (recorder, tap, summary) = AudioRecorder::new(Arc::clone(&sample_rate));
        (recorder, tap, summary, sample_rate)
    }

    fn interleave_stereo(mono: &[f32]) -> Vec<f32> {
        mono.iter().flat_map(|&s| [s, -s]).collect()
    }

    #[test]
    fn test_starts_idle() {
        let (recorder, tap, _summary, _rate) = make_pipeline(44100);
        assert!(!recorder.is_recording());
        assert!(!tap.is_recording());
    }

    #[test]
    fn test_start_without_sample_rate_stays_idle() {
        let (mut recorder, _tap, _summary, _rate) = make_pipeline(0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let result = recorder.start(&path);

        assert_eq!(result, Err(RecordError::DeviceUnavailable));
        assert!(!recorder.is_recording());
        assert!(!path.exists());
    }

    #[test]
    fn test_start_with_bad_path_stays_idle() {
        let (mut recorder, _tap, _summary, _rate) = make_pipeline(44100);
        let result = recorder.start("/nonexistent-dir/take.wav");

        assert!(matches!(result, Err(RecordError::Io(_))));
        assert!(!recorder.is_recording());

        // The pipeline recovered its queue and can start normally.
        let dir = tempfile::tempdir().unwrap();
        assert!(recorder.start(dir.path().join("ok.wav")).is_ok());
        recorder.stop();
    }

    #[test]
    fn test_records_pushed_samples_to_file() {
        let (mut recorder, mut tap, _summary, _rate) = make_pipeline(48000);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        recorder.start(&path).unwrap();
        let mono = [0.0, 0.5, -0.5, 1.0];
        tap.write_block(&interleave_stereo(&mono), 2);
        recorder.stop();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], (0.5 * i16::MAX as f32) as i16);
        assert_eq!(samples[3], i16::MAX);
    }

    #[test]
    fn test_tap_ignores_blocks_while_idle() {
        let (recorder, mut tap, _summary, _rate) = make_pipeline(44100);

        tap.write_block(&[0.5; 64], 2);

        assert_eq!(recorder.sample_position(), 0);
        assert_eq!(recorder.dropped_samples(), 0);
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let (mut recorder, mut tap, _summary, _rate) = make_pipeline(44100);
        let dir = tempfile::tempdir().unwrap();

        recorder.start(dir.path().join("take.wav")).unwrap();
        tap.write_block(&[0.1; 32], 2);

        recorder.stop();
        assert!(!recorder.is_recording());
        // Second stop must be a no-op, not a panic or an error.
        recorder.stop();
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let sample_rate = Arc::new(AtomicU32::new(44100));
        let (mut recorder, mut tap, _summary) =
            AudioRecorder::with_capacity(Arc::clone(&sample_rate), 8);
        let dir = tempfile::tempdir().unwrap();
        recorder.start(dir.path().join("take.wav")).unwrap();

        // One oversized block: at most the ring capacity fits, the rest is
        // dropped immediately without blocking.
        let block = interleave_stereo(&[0.25; 100]);
        tap.write_block(&block, 2);

        assert!(recorder.dropped_samples() >= 92);
        assert_eq!(recorder.sample_position(), 100);
        recorder.stop();
    }

    #[test]
    fn test_restart_replaces_session() {
        let (mut recorder, mut tap, _summary, _rate) = make_pipeline(44100);
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.wav");
        let second = dir.path().join("second.wav");

        recorder.start(&first).unwrap();
        tap.write_block(&interleave_stereo(&[0.5; 16]), 2);

        // Implicit stop-then-start.
        recorder.start(&second).unwrap();
        assert!(recorder.is_recording());
        tap.write_block(&interleave_stereo(&[0.25; 8]), 2);
        recorder.stop();

        let first_samples = hound::WavReader::open(&first)
            .unwrap()
            .samples::<i16>()
            .count();
        let second_samples = hound::WavReader::open(&second)
            .unwrap()
            .samples::<i16>()
            .count();
        assert_eq!(first_samples, 16);
        assert_eq!(second_samples, 8);
    }

    #[test]
    fn test_thumbnail_sees_recorded_stream() {
        let (mut recorder, mut tap, mut summary, _rate) = make_pipeline(44100);
        let dir = tempfile::tempdir().unwrap();

        recorder.start(dir.path().join("take.wav")).unwrap();
        summary.reset(44100);

        tap.write_block(&interleave_stereo(&[0.5; 512]), 2);
        recorder.stop();

        assert!(summary.drain());
        assert!(!summary.buckets().is_empty());
        assert!((summary.buckets()[0].max - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_record_error_display() {
        assert!(RecordError::DeviceUnavailable.to_string().contains("sample rate"));
        assert!(RecordError::Io("denied".to_string())
            .to_string()
            .contains("denied"));
    }

    #[test]
    fn test_tap_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RecordTap>();
        assert_send::<AudioRecorder>();
    }
}
