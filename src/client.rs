use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::discovery::DiscoveryTracker;
use crate::dispatcher::{DispatchSettings, DispatcherExit, DispatcherStats, EventDispatcher};
use crate::sampler::{SamplerStats, StreamingSampler};
use crate::source::EventSource;
use crate::types::{SensorDescriptor, SensorHandle, StreamedSample};
use crate::{Result, ZenError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a [`SensorClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Discovering,
    SensorFound,
    NoSensorFound,
    Connecting,
    Connected,
    ConnectFailed,
    Streaming,
    ShuttingDown,
    Terminated,
}

impl ClientState {
    pub fn name(self) -> &'static str {
        match self {
            ClientState::Idle => "Idle",
            ClientState::Discovering => "Discovering",
            ClientState::SensorFound => "SensorFound",
            ClientState::NoSensorFound => "NoSensorFound",
            ClientState::Connecting => "Connecting",
            ClientState::Connected => "Connected",
            ClientState::ConnectFailed => "ConnectFailed",
            ClientState::Streaming => "Streaming",
            ClientState::ShuttingDown => "ShuttingDown",
            ClientState::Terminated => "Terminated",
        }
    }
}

/// Discover, connect and stream from one event source.
///
/// The client owns the source for its lifetime. Each transition is a
/// method; calling one out of order returns [`ZenError::InvalidState`].
/// Dropping the client shuts it down.
pub struct SensorClient<S: EventSource + ?Sized + 'static> {
    source: Arc<S>,
    config: ClientConfig,
    state: ClientState,
    tracker: Arc<DiscoveryTracker>,
    dispatcher: Option<EventDispatcher>,
    sampler: Option<StreamingSampler>,
    sensors: Vec<SensorDescriptor>,
    connection: Option<(SensorDescriptor, SensorHandle)>,
    final_stats: Option<DispatcherStats>,
}

impl<S: EventSource + ?Sized + 'static> SensorClient<S> {
    pub fn new(source: Arc<S>, config: ClientConfig) -> Self {
        Self {
            source,
            config: config.sanitized(),
            state: ClientState::Idle,
            tracker: Arc::new(DiscoveryTracker::new()),
            dispatcher: None,
            sampler: None,
            sensors: Vec::new(),
            connection: None,
            final_stats: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sensors of the finished discovery cycle.
    pub fn sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    /// The connected sensor, once `Connected`.
    pub fn connection(&self) -> Option<&(SensorDescriptor, SensorHandle)> {
        self.connection.as_ref()
    }

    /// Dispatcher counters, live while running and frozen after shutdown.
    pub fn stats(&self) -> DispatcherStats {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.stats(),
            None => self.final_stats.unwrap_or_default(),
        }
    }

    fn expect_state(&self, expected: ClientState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ZenError::InvalidState(self.state.name()))
        }
    }

    fn transition(&mut self, next: ClientState) {
        log::debug!("Client state {} -> {}", self.state.name(), next.name());
        self.state = next;
    }

    /// `Idle -> Discovering`: start the dispatcher and a listing cycle.
    pub fn start_discovery(&mut self) -> Result<()> {
        self.expect_state(ClientState::Idle)?;

        let (sender, receiver) = crossbeam_channel::bounded(self.config.sample_buffer);
        let dispatcher = EventDispatcher::spawn(
            self.source.clone(),
            self.tracker.clone(),
            sender,
            DispatchSettings {
                downsample_every: self.config.downsample_every,
                wait_timeout: self.config.wait_timeout,
            },
        )?;
        self.dispatcher = Some(dispatcher);
        self.sampler = Some(StreamingSampler::new(receiver));

        self.source.list_sensors_async()?;
        self.transition(ClientState::Discovering);
        Ok(())
    }

    /// `Discovering -> SensorFound | NoSensorFound`.
    ///
    /// Polls the completion flag every `discovery_poll` until
    /// `discovery_timeout` elapses.
    pub fn await_discovery(&mut self) -> Result<&[SensorDescriptor]> {
        self.expect_state(ClientState::Discovering)?;
        let deadline = Instant::now() + self.config.discovery_timeout;

        let sensors = loop {
            if let Some(sensors) = self.tracker.sensors() {
                break sensors;
            }
            if !self.dispatcher.as_ref().is_some_and(|d| d.is_running()) {
                return Err(ZenError::EventSourceFatal(
                    "event dispatcher stopped during discovery".into(),
                ));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ZenError::DiscoveryTimeout);
            }
            log::info!(
                "Searching for sensors ... ({:.0}%)",
                self.tracker.progress() * 100.0
            );
            std::thread::sleep(self.config.discovery_poll.min(remaining));
        };

        self.sensors = sensors;
        if self.sensors.is_empty() {
            log::warn!("No sensor found on the system");
            self.transition(ClientState::NoSensorFound);
            return Err(ZenError::DiscoveryEmpty);
        }

        log::info!("{} sensor(s) found", self.sensors.len());
        self.transition(ClientState::SensorFound);
        Ok(&self.sensors)
    }

    /// `SensorFound -> Connecting -> Connected | ConnectFailed`.
    pub fn connect(&mut self, index: usize) -> Result<SensorHandle> {
        self.expect_state(ClientState::SensorFound)?;
        let desc = self
            .sensors
            .get(index)
            .cloned()
            .ok_or(ZenError::InvalidState("SensorFound (no such sensor index)"))?;

        self.transition(ClientState::Connecting);
        let manager = ConnectionManager::new(self.config.connect_attempts, self.config.retry_delay);
        match manager.connect(&*self.source, &desc) {
            Ok(sensor) => {
                self.connection = Some((desc, sensor));
                self.transition(ClientState::Connected);
                Ok(sensor)
            }
            Err(last) => {
                log::error!("Could not connect to sensor {}", desc.identifier);
                self.transition(ClientState::ConnectFailed);
                Err(ZenError::ConnectFailed {
                    attempts: manager.max_attempts(),
                    last,
                })
            }
        }
    }

    /// `Connected -> Streaming`: observe samples for `stream_window`.
    pub fn stream<F>(&mut self, on_sample: F) -> Result<SamplerStats>
    where
        F: FnMut(&StreamedSample),
    {
        self.expect_state(ClientState::Connected)?;
        self.transition(ClientState::Streaming);
        let sampler = self.sampler.as_ref().ok_or(ZenError::StreamStopped)?;
        Ok(sampler.observe(self.config.stream_window, on_sample))
    }

    /// Pull one sample instead of observing a whole window.
    ///
    /// Valid once connected; moves the client to `Streaming`.
    pub fn next_sample(&mut self, timeout: Duration) -> Result<StreamedSample> {
        match self.state {
            ClientState::Connected => self.transition(ClientState::Streaming),
            ClientState::Streaming => {}
            other => return Err(ZenError::InvalidState(other.name())),
        }
        self.sampler
            .as_ref()
            .ok_or(ZenError::StreamStopped)?
            .recv_timeout(timeout)
    }

    /// `* -> ShuttingDown -> Terminated`.
    ///
    /// Stops the dispatcher and releases the source no matter where the
    /// client is. Returns how the dispatcher ended, if one was running.
    pub fn shutdown(&mut self) -> Option<DispatcherExit> {
        if self.state == ClientState::Terminated {
            return None;
        }
        self.transition(ClientState::ShuttingDown);

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.cancel();
        }
        self.source.shutdown();
        // Unblocks a dispatcher waiting on a full sink.
        self.sampler = None;

        let exit = self.dispatcher.take().map(|dispatcher| {
            self.final_stats = Some(dispatcher.stats());
            dispatcher.join()
        });

        self.transition(ClientState::Terminated);
        log::info!("Sensor client terminated");
        exit
    }
}

impl<S: EventSource + ?Sized + 'static> Drop for SensorClient<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Outcome of a complete [`run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub sensor: SensorDescriptor,
    pub handle: SensorHandle,
    pub samples: SamplerStats,
    pub dispatcher: DispatcherStats,
    pub dispatcher_exit: Option<DispatcherExit>,
}

/// Discover, connect to the first sensor, stream for the configured window
/// and shut down.
///
/// The source is shut down on every path, including errors.
pub fn run<S, F>(source: Arc<S>, config: ClientConfig, on_sample: F) -> Result<RunReport>
where
    S: EventSource + ?Sized + 'static,
    F: FnMut(&StreamedSample),
{
    let mut client = SensorClient::new(source, config);
    client.start_discovery()?;
    client.await_discovery()?;
    let handle = client.connect(0)?;
    let samples = client.stream(on_sample)?;
    let dispatcher_exit = client.shutdown();

    let (sensor, _) = client
        .connection
        .take()
        .ok_or(ZenError::InvalidState("Terminated (no connection)"))?;
    Ok(RunReport {
        sensor,
        handle,
        samples,
        dispatcher: client.stats(),
        dispatcher_exit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;
    use crate::io::test_sensor::TestSensorSystem;
    use crate::manager::SensorManager;
    use crate::source::EventQueue;
    use crate::types::{Event, ImuSample, IoType};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory source driven by a script.
    struct ScriptedSource {
        queue: EventQueue,
        found: Vec<SensorDescriptor>,
        complete_listing: bool,
        fatal: Option<String>,
        outcomes: Mutex<VecDeque<std::result::Result<SensorHandle, ConnectError>>>,
        samples_on_connect: u64,
        obtain_calls: Mutex<u32>,
        shutdowns: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(found: Vec<SensorDescriptor>) -> Self {
            Self {
                queue: EventQueue::new(),
                found,
                complete_listing: true,
                fatal: None,
                outcomes: Mutex::new(VecDeque::new()),
                samples_on_connect: 0,
                obtain_calls: Mutex::new(0),
                shutdowns: Mutex::new(0),
            }
        }

        fn with_outcomes(
            self,
            outcomes: Vec<std::result::Result<SensorHandle, ConnectError>>,
        ) -> Self {
            *self.outcomes.lock().unwrap() = outcomes.into();
            self
        }

        fn obtain_calls(&self) -> u32 {
            *self.obtain_calls.lock().unwrap()
        }

        fn shutdowns(&self) -> u32 {
            *self.shutdowns.lock().unwrap()
        }
    }

    impl EventSource for ScriptedSource {
        fn list_sensors_async(&self) -> Result<()> {
            for desc in &self.found {
                self.queue.publish(Event::sensor_found(desc.clone()));
            }
            if self.complete_listing {
                self.queue.publish(Event::listing_progress(1.0));
            }
            Ok(())
        }

        fn wait_for_next_event(&self, timeout: Duration) -> Result<Option<Event>> {
            match (self.queue.wait(timeout)?, &self.fatal) {
                (None, Some(reason)) => Err(ZenError::EventSourceFatal(reason.clone())),
                (event, _) => Ok(event),
            }
        }

        fn obtain_sensor(
            &self,
            _desc: &SensorDescriptor,
        ) -> std::result::Result<SensorHandle, ConnectError> {
            *self.obtain_calls.lock().unwrap() += 1;
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ConnectError::ConnectFailed));
            if let Ok(sensor) = outcome {
                for _ in 0..self.samples_on_connect {
                    self.queue.publish(Event::imu(sensor, ImuSample::default()));
                }
            }
            outcome
        }

        fn release_sensor(&self, _sensor: SensorHandle) -> Result<()> {
            Ok(())
        }

        fn shutdown(&self) {
            *self.shutdowns.lock().unwrap() += 1;
            self.queue.close();
        }
    }

    fn desc(id: &str) -> SensorDescriptor {
        SensorDescriptor {
            name: "LPMS-CU2".into(),
            identifier: id.into(),
            io_type: IoType::SiUsb,
            address: "001:002".into(),
        }
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            discovery_poll: Duration::from_millis(5),
            discovery_timeout: Duration::from_secs(2),
            wait_timeout: Duration::from_millis(5),
            stream_window: Duration::from_millis(300),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_empty_discovery_never_connects() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let mut client = SensorClient::new(source.clone(), fast_config());
        client.start_discovery().unwrap();
        assert_eq!(client.state(), ClientState::Discovering);
        assert!(matches!(client.await_discovery(), Err(ZenError::DiscoveryEmpty)));
        assert_eq!(client.state(), ClientState::NoSensorFound);
        assert!(matches!(client.connect(0), Err(ZenError::InvalidState(_))));

        client.shutdown();
        assert_eq!(client.state(), ClientState::Terminated);
        assert_eq!(source.obtain_calls(), 0);
        assert_eq!(source.shutdowns(), 1);
    }

    #[test]
    fn test_first_attempt_connects() {
        let source = Arc::new(
            ScriptedSource::new(vec![desc("a")]).with_outcomes(vec![Ok(SensorHandle(7))]),
        );
        let mut client = SensorClient::new(source.clone(), fast_config());
        client.start_discovery().unwrap();
        assert_eq!(client.await_discovery().unwrap().len(), 1);
        assert_eq!(client.state(), ClientState::SensorFound);
        assert_eq!(client.connect(0).unwrap(), SensorHandle(7));
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(source.obtain_calls(), 1);
    }

    #[test]
    fn test_connect_exhaustion_exits_with_one() {
        let source = Arc::new(ScriptedSource::new(vec![desc("a")]));
        let result = run(source.clone(), fast_config(), |_| {});
        match result {
            Err(e @ ZenError::ConnectFailed { attempts: 3, .. }) => assert_eq!(e.exit_code(), 1),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(source.obtain_calls(), 3);
        assert_eq!(source.shutdowns(), 1);
    }

    #[test]
    fn test_run_streams_downsampled_samples() {
        let mut scripted =
            ScriptedSource::new(vec![desc("a")]).with_outcomes(vec![Ok(SensorHandle(1))]);
        scripted.samples_on_connect = 250;
        let source = Arc::new(scripted);

        let mut indices = Vec::new();
        let report = run(source.clone(), fast_config(), |s| indices.push(s.index)).unwrap();

        assert_eq!(report.sensor, desc("a"));
        assert_eq!(report.handle, SensorHandle(1));
        assert_eq!(report.samples.accepted, 248);
        assert_eq!(report.dispatcher.samples_received, 250);
        assert_eq!(report.dispatcher.samples_suppressed, 2);
        assert!(!indices.contains(&100) && !indices.contains(&200));
        assert!(matches!(
            report.dispatcher_exit,
            Some(DispatcherExit::Cancelled) | Some(DispatcherExit::SourceClosed)
        ));
        assert_eq!(source.shutdowns(), 1);
    }

    #[test]
    fn test_next_sample_pulls_in_order() {
        let mut scripted =
            ScriptedSource::new(vec![desc("a")]).with_outcomes(vec![Ok(SensorHandle(2))]);
        scripted.samples_on_connect = 3;
        let mut client = SensorClient::new(Arc::new(scripted), fast_config());
        assert!(matches!(
            client.next_sample(Duration::from_millis(1)),
            Err(ZenError::InvalidState("Idle"))
        ));
        client.start_discovery().unwrap();
        client.await_discovery().unwrap();
        client.connect(0).unwrap();

        let first = client.next_sample(Duration::from_secs(1)).unwrap();
        assert_eq!(client.state(), ClientState::Streaming);
        assert_eq!((first.sensor, first.index), (SensorHandle(2), 1));
        assert_eq!(client.next_sample(Duration::from_secs(1)).unwrap().index, 2);
        assert_eq!(client.next_sample(Duration::from_secs(1)).unwrap().index, 3);
        assert!(matches!(
            client.next_sample(Duration::from_millis(20)),
            Err(ZenError::Timeout)
        ));
    }

    #[test]
    fn test_discovery_timeout() {
        let mut scripted = ScriptedSource::new(vec![desc("a")]);
        scripted.complete_listing = false;
        let config = ClientConfig {
            discovery_timeout: Duration::from_millis(30),
            ..fast_config()
        };
        let mut client = SensorClient::new(Arc::new(scripted), config);
        client.start_discovery().unwrap();
        assert!(matches!(client.await_discovery(), Err(ZenError::DiscoveryTimeout)));
        assert_eq!(client.state(), ClientState::Discovering);
    }

    #[test]
    fn test_source_failure_during_discovery_is_fatal() {
        let mut scripted = ScriptedSource::new(vec![desc("a")]);
        scripted.complete_listing = false;
        scripted.fatal = Some("bus reset".into());
        let mut client = SensorClient::new(Arc::new(scripted), fast_config());
        client.start_discovery().unwrap();

        let err = client.await_discovery().unwrap_err();
        assert!(matches!(err, ZenError::EventSourceFatal(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(client.state(), ClientState::Discovering);
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let source = Arc::new(ScriptedSource::new(vec![desc("a")]));
        let mut client = SensorClient::new(source, fast_config());
        assert!(matches!(client.await_discovery(), Err(ZenError::InvalidState("Idle"))));
        assert!(matches!(client.stream(|_| {}), Err(ZenError::InvalidState("Idle"))));
        client.start_discovery().unwrap();
        assert!(matches!(
            client.start_discovery(),
            Err(ZenError::InvalidState("Discovering"))
        ));
        client.await_discovery().unwrap();
        assert!(matches!(client.connect(4), Err(ZenError::InvalidState(_))));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_runs_on_drop() {
        let source = Arc::new(ScriptedSource::new(vec![desc("a")]));
        {
            let mut client = SensorClient::new(source.clone(), fast_config());
            client.start_discovery().unwrap();
            assert!(client.shutdown().is_some());
            assert!(client.shutdown().is_none());
        }
        assert_eq!(source.shutdowns(), 1);

        {
            let mut client = SensorClient::new(source.clone(), fast_config());
            client.start_discovery().unwrap();
        }
        assert_eq!(source.shutdowns(), 2);
    }

    #[test]
    fn test_run_against_simulated_sensor() {
        let manager = SensorManager::with_systems(vec![Box::new(
            TestSensorSystem::new(1000.0).with_sample_limit(150),
        )])
        .unwrap();
        let config = ClientConfig {
            stream_window: Duration::from_secs(1),
            ..fast_config()
        };
        let report = run(Arc::new(manager), config, |_| {}).unwrap();
        assert_eq!(report.sensor.io_type, IoType::Test);
        assert_eq!(report.samples.accepted, 149);
        assert_eq!(report.samples.per_sensor[&report.handle], 149);
    }
}
