use super::{IoSystem, LinkContext, SensorLink};
use crate::error::ConnectError;
use crate::types::{Event, ImuSample, IoType, SensorDescriptor};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SENSOR_NAME: &str = "LPMS-TEST";
pub const TEST_SENSOR_ID: &str = "test-0";

/// Simulated sensor that needs no hardware.
///
/// Reports one sensor during listing. Once obtained it emits a slow yaw
/// rotation at `rate_hz` until the link is dropped or `sample_limit`
/// samples were produced.
pub struct TestSensorSystem {
    rate_hz: f64,
    sample_limit: Option<u64>,
    /// Yaw rate of the synthetic motion in degrees/s.
    yaw_rate_dps: f64,
}

impl TestSensorSystem {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            rate_hz: rate_hz.max(1.0),
            sample_limit: None,
            yaw_rate_dps: 30.0,
        }
    }

    pub fn with_sample_limit(mut self, limit: u64) -> Self {
        self.sample_limit = Some(limit);
        self
    }
}

impl Default for TestSensorSystem {
    fn default() -> Self {
        Self::new(400.0)
    }
}

impl IoSystem for TestSensorSystem {
    fn io_type(&self) -> IoType {
        IoType::Test
    }

    fn list_devices(&self) -> Result<Vec<SensorDescriptor>> {
        Ok(vec![SensorDescriptor {
            name: TEST_SENSOR_NAME.to_string(),
            identifier: TEST_SENSOR_ID.to_string(),
            io_type: IoType::Test,
            address: "sim".to_string(),
        }])
    }

    fn open(
        &self,
        desc: &SensorDescriptor,
        ctx: LinkContext,
    ) -> std::result::Result<Box<dyn SensorLink>, ConnectError> {
        if desc.identifier != TEST_SENSOR_ID {
            return Err(ConnectError::UnknownSensor(desc.identifier.clone()));
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let period = Duration::from_secs_f64(1.0 / self.rate_hz);
        let limit = self.sample_limit;
        let yaw_rate = self.yaw_rate_dps;

        let thread = std::thread::Builder::new()
            .name("zen-test-sensor".into())
            .spawn(move || test_sensor_loop(ctx, period, limit, yaw_rate, stop_clone))
            .map_err(|e| ConnectError::IoFailed(format!("Failed to spawn test sensor: {}", e)))?;

        log::info!("Test sensor {} streaming at {:.0} Hz", desc.identifier, self.rate_hz);
        Ok(Box::new(TestSensorLink {
            stop_flag,
            thread: Some(thread),
        }))
    }
}

struct TestSensorLink {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SensorLink for TestSensorLink {
    fn io_type(&self) -> IoType {
        IoType::Test
    }
}

impl Drop for TestSensorLink {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn test_sensor_loop(
    ctx: LinkContext,
    period: Duration,
    limit: Option<u64>,
    yaw_rate_dps: f64,
    stop_flag: Arc<AtomicBool>,
) {
    let dt = period.as_secs_f64();
    let mut frame: u64 = 0;

    while !stop_flag.load(Ordering::Relaxed) {
        if limit.is_some_and(|l| frame >= l) {
            log::debug!("Test sensor {} reached its sample limit", ctx.sensor);
            break;
        }
        let sample = synthetic_sample(frame, dt, yaw_rate_dps);
        if !ctx.queue.publish(Event::imu(ctx.sensor, sample)) {
            log::debug!("Event queue closed, test sensor {} stopping", ctx.sensor);
            break;
        }
        frame += 1;
        std::thread::sleep(period);
    }
}

/// Level sensor turning about Z at a constant rate.
pub(crate) fn synthetic_sample(frame: u64, dt: f64, yaw_rate_dps: f64) -> ImuSample {
    let t = frame as f64 * dt;
    let yaw_deg = wrap_degrees(yaw_rate_dps * t);
    let half = yaw_deg.to_radians() / 2.0;
    ImuSample {
        acceleration: [0.0, 0.0, -1.0],
        angular_velocity: [0.0, 0.0, yaw_rate_dps],
        euler_angles: [0.0, 0.0, yaw_deg],
        quaternion: [half.cos(), 0.0, 0.0, half.sin()],
        timestamp_s: t,
        frame_count: frame as u32,
    }
}

fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
