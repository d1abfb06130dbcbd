use crate::error::ConnectError;
use crate::types::{Event, SensorDescriptor, SensorHandle};
use crate::{Result, ZenError};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Provider of discovery and streaming events.
///
/// Implementations are shared between the orchestration flow (listing,
/// obtaining, shutdown) and the dispatcher thread (waiting), so every
/// operation takes `&self`.
pub trait EventSource: Send + Sync {
    /// Start an asynchronous discovery cycle.
    ///
    /// Results arrive as `SensorFound` events, terminated by a
    /// `ListingProgress(1.0)` event.
    fn list_sensors_async(&self) -> Result<()>;

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `Ok(None)` when the wait timed out and
    /// `Err(ZenError::EventSourceClosed)` once the source was shut down.
    fn wait_for_next_event(&self, timeout: Duration) -> Result<Option<Event>>;

    /// Synchronously open a connection to a discovered sensor.
    fn obtain_sensor(&self, desc: &SensorDescriptor) -> std::result::Result<SensorHandle, ConnectError>;

    /// Close a single sensor connection.
    fn release_sensor(&self, sensor: SensorHandle) -> Result<()>;

    /// Release every resource held by the source. Idempotent.
    fn shutdown(&self);
}

/// Default capacity of an [`EventQueue`].
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// How often a blocked system-event publisher re-checks for close.
const CLOSE_POLL: Duration = Duration::from_millis(50);

/// Bounded multi-producer event queue backing an [`EventSource`].
///
/// When full, device-scope events (samples) are dropped; system events
/// wait for room so discovery results are never lost.
pub struct EventQueue {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an event. Returns `false` if the queue is closed.
    ///
    /// A sample that does not fit is counted in [`dropped`] and still
    /// reported as published.
    ///
    /// [`dropped`]: EventQueue::dropped
    pub fn publish(&self, event: Event) -> bool {
        if self.is_closed() {
            return false;
        }
        if event.is_system() {
            return self.publish_blocking(event);
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Event queue full, dropping sample");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn publish_blocking(&self, event: Event) -> bool {
        let mut pending = event;
        loop {
            match self.sender.send_timeout(pending, CLOSE_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.is_closed() {
                        return false;
                    }
                    pending = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Samples dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or(EVENT_QUEUE_CAPACITY)
    }

    pub fn wait(&self, timeout: Duration) -> Result<Option<Event>> {
        if self.is_closed() {
            return Err(ZenError::EventSourceClosed);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ZenError::EventSourceClosed),
        }
    }

    /// Close the queue; pending events are discarded.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let dropped = self.receiver.try_iter().count();
            if dropped > 0 {
                log::debug!("Event queue closed, {} pending event(s) dropped", dropped);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
