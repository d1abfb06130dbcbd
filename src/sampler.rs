use crate::types::{SensorHandle, StreamedSample};
use crate::{Result, ZenError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Consumer end of the samples forwarded by the event dispatcher.
pub struct StreamingSampler {
    receiver: Receiver<StreamedSample>,
}

/// Totals of one observation window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub accepted: u64,
    pub per_sensor: BTreeMap<SensorHandle, u64>,
}

impl SamplerStats {
    fn record(&mut self, sample: &StreamedSample) {
        self.accepted += 1;
        *self.per_sensor.entry(sample.sensor).or_insert(0) += 1;
    }
}

impl StreamingSampler {
    pub fn new(receiver: Receiver<StreamedSample>) -> Self {
        Self { receiver }
    }

    /// Hand every sample arriving within `window` to `on_sample`.
    ///
    /// Returns early only if the dispatcher side is gone.
    pub fn observe<F>(&self, window: Duration, mut on_sample: F) -> SamplerStats
    where
        F: FnMut(&StreamedSample),
    {
        let deadline = Instant::now() + window;
        let mut stats = SamplerStats::default();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(sample) => {
                    stats.record(&sample);
                    on_sample(&sample);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("Sample stream stopped before the observation window ended");
                    break;
                }
            }
        }

        log::info!("Observation window over: {} sample(s) accepted", stats.accepted);
        stats
    }

    /// Receive the next sample (blocks until available).
    pub fn recv(&self) -> Result<StreamedSample> {
        self.receiver.recv().map_err(|_| ZenError::StreamStopped)
    }

    /// Try to receive a sample without blocking.
    pub fn try_recv(&self) -> Option<StreamedSample> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<StreamedSample> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ZenError::Timeout,
            RecvTimeoutError::Disconnected => ZenError::StreamStopped,
        })
    }

    /// Samples waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

/// Multi-line text rendering of a sample.
pub fn render(s: &StreamedSample) -> String {
    let d = &s.sample;
    format!(
        "Sensor data from {} (sample {})\n -> Acceleration a = {:+.4} {:+.4} {:+.4}\n -> Angular velocity g = {:+.4} {:+.4} {:+.4}\n -> Euler angles r = {:+.3} {:+.3} {:+.3}\n -> Quaternion w = {:+.4} x {:+.4} y {:+.4} z {:+.4}",
        s.sensor,
        s.index,
        d.acceleration[0], d.acceleration[1], d.acceleration[2],
        d.angular_velocity[0], d.angular_velocity[1], d.angular_velocity[2],
        d.euler_angles[0], d.euler_angles[1], d.euler_angles[2],
        d.quaternion[0], d.quaternion[1], d.quaternion[2], d.quaternion[3],
    )
}
