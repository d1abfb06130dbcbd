use crate::error::ConnectError;
use crate::io::hid::HidSystem;
use crate::io::test_sensor::TestSensorSystem;
use crate::io::usb::SiUsbSystem;
use crate::io::{IoSystem, LinkContext, SensorLink};
use crate::source::{EventQueue, EventSource, EVENT_QUEUE_CAPACITY};
use crate::types::{Event, IoInterfaces, SensorDescriptor, SensorHandle};
use crate::{Result, ZenError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Concrete [`EventSource`] over a set of IO systems.
///
/// Listing runs on a background thread and reports through the shared
/// event queue; obtained sensors publish their samples into the same queue.
pub struct SensorManager {
    queue: Arc<EventQueue>,
    systems: Arc<Vec<Box<dyn IoSystem>>>,
    listing: Arc<AtomicBool>,
    listing_thread: Mutex<Option<JoinHandle<()>>>,
    links: Mutex<HashMap<SensorHandle, Box<dyn SensorLink>>>,
    next_handle: AtomicU64,
    shut_down: AtomicBool,
}

impl SensorManager {
    /// Create the IO systems selected by `interfaces`.
    ///
    /// A system whose backend is unavailable is skipped; init fails only
    /// when none is left.
    pub fn init(interfaces: IoInterfaces) -> Result<SensorManager> {
        let mut systems: Vec<Box<dyn IoSystem>> = Vec::new();

        if interfaces.contains(IoInterfaces::HID) {
            match HidSystem::new() {
                Ok(sys) => systems.push(Box::new(sys)),
                Err(e) => log::warn!("HID IO system unavailable: {}", e),
            }
        }
        if interfaces.contains(IoInterfaces::SI_USB) {
            match SiUsbSystem::new() {
                Ok(sys) => systems.push(Box::new(sys)),
                Err(e) => log::warn!("SiUsb IO system unavailable: {}", e),
            }
        }
        if interfaces.contains(IoInterfaces::TEST) {
            systems.push(Box::new(TestSensorSystem::default()));
        }

        Self::with_systems(systems)
    }

    pub fn with_systems(systems: Vec<Box<dyn IoSystem>>) -> Result<SensorManager> {
        Self::with_queue_capacity(systems, EVENT_QUEUE_CAPACITY)
    }

    /// Like [`with_systems`](Self::with_systems) with an explicit event queue
    /// capacity. Samples arriving while the queue is full are dropped.
    pub fn with_queue_capacity(
        systems: Vec<Box<dyn IoSystem>>,
        capacity: usize,
    ) -> Result<SensorManager> {
        if systems.is_empty() {
            return Err(ZenError::Init("no IO system available".into()));
        }
        log::info!(
            "Sensor manager initialized with IO systems: {}",
            systems
                .iter()
                .map(|s| s.io_type().key())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(SensorManager {
            queue: Arc::new(EventQueue::with_capacity(capacity)),
            systems: Arc::new(systems),
            listing: Arc::new(AtomicBool::new(false)),
            listing_thread: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Number of currently obtained sensors.
    pub fn connected(&self) -> usize {
        self.links.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Events waiting to be consumed.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Samples dropped because nobody consumed the event queue in time.
    pub fn dropped_samples(&self) -> u64 {
        self.queue.dropped()
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl EventSource for SensorManager {
    fn list_sensors_async(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(ZenError::EventSourceClosed);
        }
        if self.listing.swap(true, Ordering::AcqRel) {
            return Err(ZenError::ListingFailed("listing already in progress".into()));
        }

        let mut slot = self.listing_thread.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }

        let queue = self.queue.clone();
        let systems = self.systems.clone();
        let listing = self.listing.clone();
        let thread = std::thread::Builder::new()
            .name("zen-listing".into())
            .spawn(move || {
                listing_loop(&systems, &queue);
                listing.store(false, Ordering::Release);
            })
            .map_err(|e| {
                self.listing.store(false, Ordering::Release);
                ZenError::ListingFailed(format!("Failed to spawn listing thread: {}", e))
            })?;
        *slot = Some(thread);
        Ok(())
    }

    fn wait_for_next_event(&self, timeout: Duration) -> Result<Option<Event>> {
        self.queue.wait(timeout)
    }

    fn obtain_sensor(&self, desc: &SensorDescriptor) -> std::result::Result<SensorHandle, ConnectError> {
        if self.is_shut_down() {
            return Err(ConnectError::SourceClosed);
        }
        let system = self
            .systems
            .iter()
            .find(|s| s.io_type() == desc.io_type)
            .ok_or_else(|| ConnectError::UnsupportedIoType(desc.io_type.key().to_string()))?;

        let sensor = SensorHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let link = system.open(
            desc,
            LinkContext {
                sensor,
                queue: self.queue.clone(),
            },
        )?;

        self.links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sensor, link);
        log::info!(
            "Obtained sensor {} ({}) on {} as {}",
            desc.name,
            desc.identifier,
            desc.io_type,
            sensor
        );
        Ok(sensor)
    }

    fn release_sensor(&self, sensor: SensorHandle) -> Result<()> {
        let link = self
            .links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sensor)
            .ok_or(ZenError::UnknownSensor(sensor))?;
        // Dropped outside the lock: closing a link may join its reader thread.
        drop(link);
        log::info!("Released sensor {}", sensor);
        Ok(())
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();

        let links: Vec<_> = self
            .links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        let released = links.len();
        drop(links);

        if let Some(thread) = self
            .listing_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = thread.join();
        }
        log::info!("Sensor manager shut down ({} sensor(s) released)", released);
    }
}

impl Drop for SensorManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One discovery cycle: every system's sensors, then its share of progress.
fn listing_loop(systems: &[Box<dyn IoSystem>], queue: &EventQueue) {
    let total = systems.len();
    log::info!("Listing sensors on {} IO system(s)", total);

    for (i, system) in systems.iter().enumerate() {
        match system.list_devices() {
            Ok(devices) => {
                for desc in devices {
                    log::debug!("Found {} ({}) on {}", desc.name, desc.identifier, desc.io_type);
                    if !queue.publish(Event::sensor_found(desc)) {
                        return;
                    }
                }
            }
            Err(e) => log::warn!("Listing on {} failed: {}", system.io_type(), e),
        }

        let progress = (i + 1) as f32 / total as f32;
        if !queue.publish(Event::listing_progress(progress)) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, IoType};

    struct FailingSystem;

    impl IoSystem for FailingSystem {
        fn io_type(&self) -> IoType {
            IoType::Hid
        }

        fn list_devices(&self) -> Result<Vec<SensorDescriptor>> {
            Err(ZenError::ListingFailed("bus gone".into()))
        }

        fn open(
            &self,
            _desc: &SensorDescriptor,
            _ctx: LinkContext,
        ) -> std::result::Result<Box<dyn SensorLink>, ConnectError> {
            Err(ConnectError::ConnectFailed)
        }
    }

    fn drain(manager: &SensorManager) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = manager.wait_for_next_event(Duration::from_millis(200)) {
            let done = event.kind == EventKind::ListingProgress(1.0);
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[test]
    fn test_init_without_systems_fails() {
        assert!(matches!(
            SensorManager::with_systems(Vec::new()),
            Err(ZenError::Init(_))
        ));
    }

    #[test]
    fn test_listing_reports_sensors_then_progress() {
        let manager = SensorManager::with_systems(vec![
            Box::new(FailingSystem),
            Box::new(TestSensorSystem::default()),
        ])
        .unwrap();
        manager.list_sensors_async().unwrap();

        let events = drain(&manager);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], Event::listing_progress(0.5));
        match &events[1].kind {
            EventKind::SensorFound(desc) => assert_eq!(desc.io_type, IoType::Test),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events[2], Event::listing_progress(1.0));
    }

    #[test]
    fn test_obtain_routes_by_io_type() {
        let manager =
            SensorManager::with_systems(vec![Box::new(TestSensorSystem::default())]).unwrap();
        let hid_desc = SensorDescriptor {
            name: "LPMS".into(),
            identifier: "x".into(),
            io_type: IoType::Hid,
            address: "/dev/hidraw0".into(),
        };
        assert_eq!(
            manager.obtain_sensor(&hid_desc),
            Err(ConnectError::UnsupportedIoType("Hid".into()))
        );

        let desc = TestSensorSystem::default().list_devices().unwrap().remove(0);
        let first = manager.obtain_sensor(&desc).unwrap();
        assert_eq!(first, SensorHandle(1));
        assert_eq!(manager.connected(), 1);

        manager.release_sensor(first).unwrap();
        assert_eq!(manager.connected(), 0);
        assert!(matches!(
            manager.release_sensor(first),
            Err(ZenError::UnknownSensor(_))
        ));
    }

    #[test]
    fn test_unconsumed_stream_stays_within_capacity() {
        let manager = SensorManager::with_queue_capacity(
            vec![Box::new(TestSensorSystem::new(1000.0))],
            16,
        )
        .unwrap();
        let desc = TestSensorSystem::default().list_devices().unwrap().remove(0);
        manager.obtain_sensor(&desc).unwrap();

        std::thread::sleep(Duration::from_millis(150));
        assert!(manager.pending_events() <= 16);
        assert!(manager.dropped_samples() > 0);
        manager.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_closes() {
        let manager =
            SensorManager::with_systems(vec![Box::new(TestSensorSystem::default())]).unwrap();
        let desc = TestSensorSystem::default().list_devices().unwrap().remove(0);
        manager.obtain_sensor(&desc).unwrap();

        manager.shutdown();
        manager.shutdown();
        assert_eq!(manager.connected(), 0);
        assert!(matches!(
            manager.wait_for_next_event(Duration::from_millis(5)),
            Err(ZenError::EventSourceClosed)
        ));
        assert_eq!(manager.obtain_sensor(&desc), Err(ConnectError::SourceClosed));
        assert!(matches!(
            manager.list_sensors_async(),
            Err(ZenError::EventSourceClosed)
        ));
    }
}
