//! Engine event notifications.
//!
//! Lock-free one-way ring from the audio engine to the UI thread, used for
//! metering and status display. Sends from the callback are lossy: stale
//! meter values are worthless, so dropping on a full ring is correct.

use rtrb::{Consumer, Producer, RingBuffer};

/// Default buffer size for the event queue (engine -> UI).
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Events sent from the audio engine to the UI thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// The audio stream started processing.
    Started,
    /// The audio stream stopped.
    Stopped,
    /// Current output peak levels for metering display.
    OutputLevel {
        /// Left channel peak level (0.0-1.0+).
        left: f32,
        /// Right channel peak level (0.0-1.0+).
        right: f32,
    },
    /// The recording queue overran and samples were dropped.
    RecordingOverrun {
        /// Total samples dropped this session.
        dropped: u64,
    },
}

/// Creates an event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = RingBuffer::new(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

/// Creates an event channel with the default capacity.
pub fn event_channel_with_defaults() -> (EventSender, EventReceiver) {
    event_channel(DEFAULT_EVENT_BUFFER_SIZE)
}

/// Engine-side producer.
///
/// All methods are real-time safe: non-blocking, no allocations.
pub struct EventSender {
    tx: Producer<EngineEvent>,
}

impl EventSender {
    /// Sends an event, returning it back if the buffer is full.
    pub fn send(&mut self, event: EngineEvent) -> Result<(), EngineEvent> {
        self.tx.push(event).map_err(|rtrb::PushError::Full(e)| e)
    }

    /// Sends an event, dropping it silently if the buffer is full.
    pub fn send_lossy(&mut self, event: EngineEvent) {
        let _ = self.tx.push(event);
    }

    /// How many events can still be queued.
    pub fn slots_available(&self) -> usize {
        self.tx.slots()
    }
}

/// UI-side consumer.
pub struct EventReceiver {
    rx: Consumer<EngineEvent>,
}

impl EventReceiver {
    /// Receives one event if available. Non-blocking.
    pub fn poll(&mut self) -> Option<EngineEvent> {
        self.rx.pop().ok()
    }

    /// Drains all pending events.
    pub fn drain(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        std::iter::from_fn(|| self.poll())
    }
}
