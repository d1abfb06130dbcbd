use crate::types::IoInterfaces;
use std::time::Duration;

/// Tunables for a client run.
///
/// `Default` reproduces the reference flow: 3 connection attempts without
/// backoff, 1 s discovery poll, 5 s streaming window, 1-in-100 down-sampling.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_attempts: u32,
    /// Pause between failed connection attempts.
    pub retry_delay: Duration,
    /// How often the main flow checks for discovery completion.
    pub discovery_poll: Duration,
    pub discovery_timeout: Duration,
    pub stream_window: Duration,
    /// Every N-th sample per connection is suppressed; 0 forwards all.
    pub downsample_every: u64,
    /// Upper bound of one dispatcher wait, so cancellation is seen promptly.
    pub wait_timeout: Duration,
    /// Capacity of the dispatcher to sampler channel.
    pub sample_buffer: usize,
    pub interfaces: IoInterfaces,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay: Duration::ZERO,
            discovery_poll: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(30),
            stream_window: Duration::from_secs(5),
            downsample_every: 100,
            wait_timeout: Duration::from_millis(100),
            sample_buffer: 256,
            interfaces: IoInterfaces::HARDWARE,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `ZEN_*` environment variables.
    ///
    /// - `ZEN_CONNECT_ATTEMPTS`
    /// - `ZEN_RETRY_DELAY_MS`
    /// - `ZEN_POLL_MS`
    /// - `ZEN_DISCOVERY_TIMEOUT_MS`
    /// - `ZEN_STREAM_SECS`
    /// - `ZEN_DOWNSAMPLE`
    /// - `ZEN_INTERFACES` (`hid,siusb,test`)
    pub fn from_env() -> Self {
        let d = Self::default();
        let config = Self {
            connect_attempts: u32::try_from(read_env_u64(
                "ZEN_CONNECT_ATTEMPTS",
                d.connect_attempts as u64,
            ))
            .unwrap_or(d.connect_attempts),
            retry_delay: read_env_millis("ZEN_RETRY_DELAY_MS", d.retry_delay),
            discovery_poll: read_env_millis("ZEN_POLL_MS", d.discovery_poll),
            discovery_timeout: read_env_millis("ZEN_DISCOVERY_TIMEOUT_MS", d.discovery_timeout),
            stream_window: Duration::from_secs(read_env_u64(
                "ZEN_STREAM_SECS",
                d.stream_window.as_secs(),
            )),
            downsample_every: read_env_u64("ZEN_DOWNSAMPLE", d.downsample_every),
            interfaces: IoInterfaces::from_list(&read_env_string("ZEN_INTERFACES", ""))
                .unwrap_or(d.interfaces),
            ..d
        };
        config.sanitized()
    }

    /// Clamp counters that must be at least one.
    pub fn sanitized(mut self) -> Self {
        self.connect_attempts = self.connect_attempts.max(1);
        self.sample_buffer = self.sample_buffer.max(1);
        if self.discovery_poll.is_zero() {
            self.discovery_poll = Duration::from_millis(1);
        }
        if self.wait_timeout.is_zero() {
            self.wait_timeout = Duration::from_millis(1);
        }
        self
    }
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(read_env_u64(name, default.as_millis() as u64))
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_flow() {
        let c = ClientConfig::default();
        assert_eq!(c.connect_attempts, 3);
        assert_eq!(c.retry_delay, Duration::ZERO);
        assert_eq!(c.discovery_poll, Duration::from_secs(1));
        assert_eq!(c.stream_window, Duration::from_secs(5));
        assert_eq!(c.downsample_every, 100);
        assert_eq!(c.interfaces, IoInterfaces::HID | IoInterfaces::SI_USB);
        assert!(!c.interfaces.contains(IoInterfaces::TEST));
    }

    #[test]
    fn test_oversized_connect_attempts_keep_default() {
        std::env::set_var("ZEN_CONNECT_ATTEMPTS", "4294967296");
        assert_eq!(ClientConfig::from_env().connect_attempts, 3);
        std::env::remove_var("ZEN_CONNECT_ATTEMPTS");
    }

    #[test]
    fn test_sanitized_clamps_zero_counters() {
        let c = ClientConfig {
            connect_attempts: 0,
            sample_buffer: 0,
            discovery_poll: Duration::ZERO,
            ..ClientConfig::default()
        }
        .sanitized();
        assert_eq!(c.connect_attempts, 1);
        assert_eq!(c.sample_buffer, 1);
        assert!(!c.discovery_poll.is_zero());
    }

    #[test]
    fn test_env_reader_falls_back_on_garbage() {
        std::env::set_var("ZEN_TEST_GARBAGE_U64", "three");
        assert_eq!(read_env_u64("ZEN_TEST_GARBAGE_U64", 7), 7);
        std::env::set_var("ZEN_TEST_GOOD_U64", " 12 ");
        assert_eq!(read_env_u64("ZEN_TEST_GOOD_U64", 7), 12);
    }
}
