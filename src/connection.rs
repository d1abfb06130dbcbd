use crate::error::ConnectError;
use crate::source::EventSource;
use crate::types::{SensorDescriptor, SensorHandle};
use std::time::Duration;

/// Bounded-retry connection to a discovered sensor.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManager {
    max_attempts: u32,
    retry_delay: Duration,
}

impl ConnectionManager {
    /// `max_attempts` below one is treated as one.
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Try to obtain `desc` up to `max_attempts` times.
    ///
    /// Returns the handle of the first successful attempt, or the error of
    /// the last one.
    pub fn connect<S>(&self, source: &S, desc: &SensorDescriptor) -> Result<SensorHandle, ConnectError>
    where
        S: EventSource + ?Sized,
    {
        let mut last_err = ConnectError::ConnectFailed;

        for attempt in 1..=self.max_attempts {
            log::info!(
                "Connecting to sensor {} on IO interface {} (attempt {}/{})",
                desc.identifier,
                desc.io_type,
                attempt,
                self.max_attempts
            );
            match source.obtain_sensor(desc) {
                Ok(sensor) => {
                    log::info!("Successfully connected to sensor {} as {}", desc.identifier, sensor);
                    return Ok(sensor);
                }
                Err(e) => {
                    log::warn!("Connection attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    let closed = e == ConnectError::SourceClosed;
                    last_err = e;
                    if closed {
                        break;
                    }
                    if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(last_err)
    }
}
