use crate::discovery::DiscoveryTracker;
use crate::source::EventSource;
use crate::types::{Event, EventKind, ImuSample, SensorHandle, StreamedSample};
use crate::{Result, ZenError};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Per-connection down-sampling.
///
/// Each sensor has a running sample count starting at 1; a sample is
/// suppressed when `count % every == 0`, so with `every = 100` samples
/// 100, 200, ... are dropped. `every = 0` disables suppression.
#[derive(Debug, Clone)]
pub struct DownSampler {
    every: u64,
    counts: HashMap<SensorHandle, u64>,
}

impl DownSampler {
    pub fn new(every: u64) -> Self {
        Self {
            every,
            counts: HashMap::new(),
        }
    }

    /// Count one sample for `sensor`.
    ///
    /// Returns its running index when it should be forwarded, `None` when
    /// it is suppressed.
    pub fn admit(&mut self, sensor: SensorHandle) -> Option<u64> {
        let count = self.counts.entry(sensor).or_insert(0);
        *count += 1;
        if self.every != 0 && *count % self.every == 0 {
            None
        } else {
            Some(*count)
        }
    }

    /// Samples seen so far for `sensor`.
    pub fn count(&self, sensor: SensorHandle) -> u64 {
        self.counts.get(&sensor).copied().unwrap_or(0)
    }
}

/// Why the dispatcher loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherExit {
    /// `cancel()` was observed.
    Cancelled,
    /// The event source was shut down.
    SourceClosed,
    /// The event source reported an unrecoverable error.
    SourceFailed(String),
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub system_events: u64,
    pub samples_received: u64,
    pub samples_forwarded: u64,
    pub samples_suppressed: u64,
    /// Samples that passed the policy but had no live sink.
    pub samples_dropped: u64,
}

#[derive(Default)]
struct Counters {
    system_events: AtomicU64,
    received: AtomicU64,
    forwarded: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            system_events: self.system_events.load(Ordering::Relaxed),
            samples_received: self.received.load(Ordering::Relaxed),
            samples_forwarded: self.forwarded.load(Ordering::Relaxed),
            samples_suppressed: self.suppressed.load(Ordering::Relaxed),
            samples_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher knobs taken from the client configuration.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub downsample_every: u64,
    /// Longest single wait on the source or the sink before the stop flag is re-checked.
    pub wait_timeout: Duration,
}

enum Delivery {
    Delivered,
    Cancelled,
    Detached,
}

/// Routing state owned by the dispatcher thread.
struct Dispatch {
    tracker: Arc<DiscoveryTracker>,
    sink: Option<Sender<StreamedSample>>,
    sampler: DownSampler,
    counters: Arc<Counters>,
    stop_flag: Arc<AtomicBool>,
    wait_timeout: Duration,
}

impl Dispatch {
    fn handle(&mut self, event: Event) {
        match (event.sensor, event.kind) {
            (None, EventKind::SensorFound(desc)) => {
                self.counters.system_events.fetch_add(1, Ordering::Relaxed);
                self.tracker.record_found(desc);
            }
            (None, EventKind::ListingProgress(progress)) => {
                self.counters.system_events.fetch_add(1, Ordering::Relaxed);
                log::debug!("Sensor listing progress {:.0}%", progress * 100.0);
                self.tracker.record_progress(progress);
            }
            (Some(sensor), EventKind::ImuSample(sample)) => self.handle_sample(sensor, sample),
            (sensor, kind) => {
                log::trace!("Ignoring event {:?} with sensor {:?}", kind, sensor);
            }
        }
    }

    fn handle_sample(&mut self, sensor: SensorHandle, sample: ImuSample) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let Some(index) = self.sampler.admit(sensor) else {
            log::trace!("Suppressed sample {} of {}", self.sampler.count(sensor), sensor);
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let streamed = StreamedSample {
            sensor,
            index,
            sample,
        };
        let delivery = match &self.sink {
            Some(sink) => deliver(sink, streamed, self.wait_timeout, &self.stop_flag),
            None => Delivery::Detached,
        };
        match delivery {
            Delivery::Delivered => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Cancelled => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Detached => {
                if self.sink.take().is_some() {
                    log::info!("Sample sink closed, further samples are dropped");
                }
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Block until the sink takes the sample, re-checking cancellation.
fn deliver(
    sink: &Sender<StreamedSample>,
    sample: StreamedSample,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> Delivery {
    let mut pending = sample;
    loop {
        match sink.send_timeout(pending, timeout) {
            Ok(()) => return Delivery::Delivered,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop_flag.load(Ordering::Relaxed) {
                    return Delivery::Cancelled;
                }
                log::trace!("Sample sink full, waiting");
                pending = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return Delivery::Detached,
        }
    }
}

/// Background consumer of an [`EventSource`].
///
/// Routes system events into the [`DiscoveryTracker`] and forwards
/// down-sampled IMU samples to a channel, strictly in delivery order.
pub struct EventDispatcher {
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    thread: Option<JoinHandle<DispatcherExit>>,
}

impl EventDispatcher {
    pub fn spawn<S>(
        source: Arc<S>,
        tracker: Arc<DiscoveryTracker>,
        sink: Sender<StreamedSample>,
        settings: DispatchSettings,
    ) -> Result<EventDispatcher>
    where
        S: EventSource + ?Sized + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let dispatch = Dispatch {
            tracker,
            sink: Some(sink),
            sampler: DownSampler::new(settings.downsample_every),
            counters: counters.clone(),
            stop_flag: stop_flag.clone(),
            wait_timeout: settings.wait_timeout,
        };

        let thread = std::thread::Builder::new()
            .name("zen-dispatcher".into())
            .spawn(move || dispatch_loop(&*source, dispatch, settings.wait_timeout))
            .map_err(|e| {
                ZenError::EventSourceFatal(format!("Failed to spawn dispatcher thread: {}", e))
            })?;

        Ok(EventDispatcher {
            stop_flag,
            counters,
            thread: Some(thread),
        })
    }

    /// Ask the loop to stop. Returns immediately.
    pub fn cancel(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    /// Cancel and wait for the loop to end.
    pub fn join(mut self) -> DispatcherExit {
        self.finish()
    }

    fn finish(&mut self) -> DispatcherExit {
        self.cancel();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                DispatcherExit::SourceFailed("dispatcher thread panicked".into())
            }),
            None => DispatcherExit::Cancelled,
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.finish();
        }
    }
}

fn dispatch_loop<S>(source: &S, mut dispatch: Dispatch, wait_timeout: Duration) -> DispatcherExit
where
    S: EventSource + ?Sized,
{
    log::info!("Event dispatcher started");

    let exit = loop {
        if dispatch.stop_flag.load(Ordering::Relaxed) {
            break DispatcherExit::Cancelled;
        }
        match source.wait_for_next_event(wait_timeout) {
            Ok(Some(event)) => dispatch.handle(event),
            Ok(None) => continue,
            Err(ZenError::EventSourceClosed) => break DispatcherExit::SourceClosed,
            Err(e) => {
                log::error!("Event source failed: {}", e);
                break DispatcherExit::SourceFailed(e.to_string());
            }
        }
    };

    log::info!("Event dispatcher stopped: {:?}", exit);
    exit
}
