//! Waveform summary for the recording display.
//!
//! A decoupled consumer of the recorded sample stream: the tap pushes
//! samples into its own lossy ring, and the UI thread folds them into
//! fixed-width min/max peak buckets when it gets around to it. Neither
//! side can stall the disk writer or the audio callback.

use rtrb::{Consumer, Producer, RingBuffer};

/// Default ring capacity between the tap and the summary.
pub const DEFAULT_THUMBNAIL_CAPACITY: usize = 16384;

/// Default number of samples folded into one peak bucket.
pub const DEFAULT_SAMPLES_PER_BUCKET: usize = 256;

/// Min/max envelope of one bucket of samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakBucket {
    /// Lowest sample value in the bucket.
    pub min: f32,
    /// Highest sample value in the bucket.
    pub max: f32,
}

/// Producer half living inside the audio callback's record tap.
pub struct ThumbnailTap {
    producer: Producer<f32>,
}

impl ThumbnailTap {
    /// Pushes samples, silently dropping whatever does not fit.
    pub fn extend(&mut self, samples: impl Iterator<Item = f32>) {
        for sample in samples {
            if self.producer.push(sample).is_err() {
                break;
            }
        }
    }
}

/// UI-side accumulator of the recorded waveform's peak envelope.
pub struct WaveformSummary {
    consumer: Consumer<f32>,
    buckets: Vec<PeakBucket>,
    pending: PeakBucket,
    pending_count: usize,
    samples_per_bucket: usize,
    sample_rate: u32,
}

impl WaveformSummary {
    /// Creates a summary and its tap with default sizes.
    pub fn new() -> (Self, ThumbnailTap) {
        Self::with_sizes(DEFAULT_THUMBNAIL_CAPACITY, DEFAULT_SAMPLES_PER_BUCKET)
    }

    /// Creates a summary with explicit ring capacity and bucket width.
    pub fn with_sizes(capacity: usize, samples_per_bucket: usize) -> (Self, ThumbnailTap) {
        let (producer, consumer) = RingBuffer::new(capacity);
        let summary = Self {
            consumer,
            buckets: Vec::new(),
            pending: EMPTY_BUCKET,
            pending_count: 0,
            samples_per_bucket: samples_per_bucket.max(1),
            sample_rate: 0,
        };
        (summary, ThumbnailTap { producer })
    }

    /// Discards accumulated peaks and adopts a new sample rate.
    /// Called when a recording session starts.
    pub fn reset(&mut self, sample_rate: u32) {
        self.buckets.clear();
        self.pending = EMPTY_BUCKET;
        self.pending_count = 0;
        self.sample_rate = sample_rate;
        while self.consumer.pop().is_ok() {}
    }

    /// Folds any queued samples into buckets.
    /// Returns true when the visible envelope changed.
    pub fn drain(&mut self) -> bool {
        let mut changed = false;
        while let Ok(sample) = self.consumer.pop() {
            self.pending.min = self.pending.min.min(sample);
            self.pending.max = self.pending.max.max(sample);
            self.pending_count += 1;

            if self.pending_count >= self.samples_per_bucket {
                self.buckets.push(self.pending);
                self.pending = EMPTY_BUCKET;
                self.pending_count = 0;
                changed = true;
            }
        }
        changed
    }

    /// Completed peak buckets, oldest first.
    pub fn buckets(&self) -> &[PeakBucket] {
        &self.buckets
    }

    /// Samples folded into each bucket.
    pub fn samples_per_bucket(&self) -> usize {
        self.samples_per_bucket
    }

    /// Length of the summarized audio in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        let samples = self.buckets.len() * self.samples_per_bucket + self.pending_count;
        samples as f64 / self.sample_rate as f64
    }
}

const EMPTY_BUCKET: PeakBucket = PeakBucket {
    min: f32::MAX,
    max: f32::MIN,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_starts_empty() {
        let (summary, _tap) = WaveformSummary::new();
        assert!(summary.buckets().is_empty());
        assert_eq!(summary.duration_seconds(), 0.0);
    }

    #[test]
    fn test_drain_folds_buckets() {
        let (mut summary, mut tap) = WaveformSummary::with_sizes(1024, 4);
        summary.reset(100);

        tap.extend([0.5, -0.25, 0.1, 0.0, 1.0, -1.0, 0.0, 0.0].into_iter());
        assert!(summary.drain());

        let buckets = summary.buckets();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0], PeakBucket { min: -0.25, max: 0.5 });
        assert_eq!(buckets[1], PeakBucket { min: -1.0, max: 1.0 });
    }

    #[test]
    fn test_partial_bucket_not_visible_until_complete() {
        let (mut summary, mut tap) = WaveformSummary::with_sizes(1024, 4);
        summary.reset(100);

        tap.extend([0.5, 0.5].into_iter());
        assert!(!summary.drain());
        assert!(summary.buckets().is_empty());

        tap.extend([0.5, 0.5].into_iter());
        assert!(summary.drain());
        assert_eq!(summary.buckets().len(), 1);
    }

    #[test]
    fn test_duration_counts_partial_samples() {
        let (mut summary, mut tap) = WaveformSummary::with_sizes(1024, 4);
        summary.reset(100);

        tap.extend([0.0; 6].into_iter());
        summary.drain();

        // 6 samples at 100 Hz.
        assert!((summary.duration_seconds() - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_reset_discards_everything() {
        let (mut summary, mut tap) = WaveformSummary::with_sizes(1024, 4);
        summary.reset(100);
        tap.extend([0.5; 8].into_iter());
        summary.drain();
        assert!(!summary.buckets().is_empty());

        tap.extend([0.9; 3].into_iter());
        summary.reset(200);

        assert!(summary.buckets().is_empty());
        // The queued-but-undrained samples were discarded too.
        assert!(!summary.drain());
    }

    #[test]
    fn test_full_ring_drops_silently() {
        let (mut summary, mut tap) = WaveformSummary::with_sizes(4, 2);
        summary.reset(100);

        tap.extend([0.1; 100].into_iter());
        summary.drain();

        assert_eq!(summary.buckets().len(), 2);
    }

    #[test]
    fn test_tap_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ThumbnailTap>();
        assert_send::<WaveformSummary>();
    }
}
