use std::fmt;

/// Errors surfaced by the sensor client and its event sources.
#[derive(Debug, thiserror::Error)]
pub enum ZenError {
    #[error("Event source failed to initialize: {0}")]
    Init(String),

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Sensor listing failed: {0}")]
    ListingFailed(String),

    #[error("No sensor found on the system")]
    DiscoveryEmpty,

    #[error("Sensor discovery did not complete in time")]
    DiscoveryTimeout,

    #[error("Could not connect to sensor after {attempts} attempt(s): {last}")]
    ConnectFailed { attempts: u32, last: ConnectError },

    #[error("Event source closed")]
    EventSourceClosed,

    #[error("Event source failed: {0}")]
    EventSourceFatal(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Sample stream stopped")]
    StreamStopped,

    #[error("Unknown sensor handle {0}")]
    UnknownSensor(crate::types::SensorHandle),

    #[error("Operation not allowed in state {0}")]
    InvalidState(&'static str),
}

impl ZenError {
    /// Process exit status the CLI reports for this error.
    ///
    /// An empty discovery cycle is reported but not treated as a failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ZenError::DiscoveryEmpty => 0,
            _ => 1,
        }
    }
}

/// Per-attempt failure when obtaining a sensor connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid client handle")]
    InvalidHandle,

    #[error("IO type '{0}' is not supported")]
    UnsupportedIoType(String),

    #[error("failed to establish a connection with the sensor")]
    ConnectFailed,

    #[error("low-level IO failed: {0}")]
    IoFailed(String),

    #[error("sensor '{0}' is not present")]
    UnknownSensor(String),

    #[error("event source is shut down")]
    SourceClosed,
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &ZenError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
