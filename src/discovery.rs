use crate::types::SensorDescriptor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// Sensors collected during one discovery cycle.
///
/// Written only by the event dispatcher. Readers check [`is_complete`]
/// first; the completion store is a release barrier, so a reader that
/// observed it sees every descriptor appended before it.
///
/// [`is_complete`]: DiscoveryTracker::is_complete
pub struct DiscoveryTracker {
    sensors: Mutex<Vec<SensorDescriptor>>,
    complete: AtomicBool,
    progress_bits: AtomicU32,
}

impl DiscoveryTracker {
    pub fn new() -> Self {
        Self {
            sensors: Mutex::new(Vec::new()),
            complete: AtomicBool::new(false),
            progress_bits: AtomicU32::new(0f32.to_bits()),
        }
    }

    /// Append a discovered sensor. Ignored once discovery completed.
    pub(crate) fn record_found(&self, desc: SensorDescriptor) {
        if self.is_complete() {
            log::debug!("Ignoring late sensor {} after discovery completed", desc.identifier);
            return;
        }
        log::info!("Found sensor {} ({}) on {}", desc.name, desc.identifier, desc.io_type);
        self.sensors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(desc);
    }

    /// Record listing progress. Reaching `1.0` completes discovery for good.
    pub(crate) fn record_progress(&self, progress: f32) {
        if self.is_complete() {
            return;
        }
        self.progress_bits
            .store(progress.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        if progress >= 1.0 {
            self.complete.store(true, Ordering::Release);
            log::info!("Sensor discovery complete");
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Last reported listing progress in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        if self.is_complete() {
            return 1.0;
        }
        f32::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    /// Snapshot of the discovered sensors in arrival order, duplicates kept.
    ///
    /// Returns `None` until discovery completed.
    pub fn sensors(&self) -> Option<Vec<SensorDescriptor>> {
        if !self.is_complete() {
            return None;
        }
        Some(
            self.sensors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        )
    }
}

impl Default for DiscoveryTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IoType;

    fn desc(id: &str) -> SensorDescriptor {
        SensorDescriptor {
            name: "LPMS-CU2".into(),
            identifier: id.into(),
            io_type: IoType::SiUsb,
            address: "001:004".into(),
        }
    }

    #[test]
    fn test_sensors_hidden_until_complete() {
        let tracker = DiscoveryTracker::new();
        tracker.record_found(desc("a"));
        assert!(!tracker.is_complete());
        assert!(tracker.sensors().is_none());
        tracker.record_progress(0.5);
        assert!((tracker.progress() - 0.5).abs() < f32::EPSILON);
        tracker.record_progress(1.0);
        assert_eq!(tracker.sensors().unwrap(), vec![desc("a")]);
    }

    #[test]
    fn test_order_and_duplicates_preserved() {
        let tracker = DiscoveryTracker::new();
        for id in ["b", "a", "b"] {
            tracker.record_found(desc(id));
        }
        tracker.record_progress(1.0);
        let ids: Vec<String> = tracker
            .sensors()
            .unwrap()
            .into_iter()
            .map(|d| d.identifier)
            .collect();
        assert_eq!(ids, vec!["b", "a", "b"]);
    }

    #[test]
    fn test_completion_is_sticky() {
        let tracker = DiscoveryTracker::new();
        tracker.record_progress(1.0);
        tracker.record_progress(0.25);
        tracker.record_progress(1.0);
        assert!(tracker.is_complete());
        assert_eq!(tracker.progress(), 1.0);
    }

    #[test]
    fn test_set_frozen_after_completion() {
        let tracker = DiscoveryTracker::new();
        tracker.record_found(desc("a"));
        tracker.record_progress(1.0);
        tracker.record_found(desc("late"));
        assert_eq!(tracker.sensors().unwrap().len(), 1);
    }
}
