use std::fmt;

/// IO interface a sensor is attached through.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    /// USB HID class devices.
    Hid = 0,
    /// Silicon Labs USB-to-UART bridges used by LPMS-CU/URS sensors.
    SiUsb = 1,
    /// In-process simulated sensor.
    Test = 2,
}

impl IoType {
    /// Key used by the native SDK to name the IO system.
    pub fn key(self) -> &'static str {
        match self {
            IoType::Hid => "Hid",
            IoType::SiUsb => "SiUsb",
            IoType::Test => "TestSensor",
        }
    }

    /// Parse an IO system key, case-insensitively.
    pub fn from_key(key: &str) -> Option<IoType> {
        match key.trim().to_ascii_lowercase().as_str() {
            "hid" => Some(IoType::Hid),
            "siusb" | "usb" => Some(IoType::SiUsb),
            "testsensor" | "test" => Some(IoType::Test),
            _ => None,
        }
    }

    pub(crate) fn interface(self) -> IoInterfaces {
        match self {
            IoType::Hid => IoInterfaces::HID,
            IoType::SiUsb => IoInterfaces::SI_USB,
            IoType::Test => IoInterfaces::TEST,
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

bitflags::bitflags! {
    /// Set of IO systems scanned during discovery.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct IoInterfaces: u32 {
        const HID    = 1 << 0;
        const SI_USB = 1 << 1;
        const TEST   = 1 << 2;
    }
}

impl IoInterfaces {
    /// Hardware transports only; the simulated sensor must be asked for.
    pub const HARDWARE: IoInterfaces = IoInterfaces::HID.union(IoInterfaces::SI_USB);

    /// Parse a comma separated list of IO keys (`hid,siusb,test`).
    ///
    /// Unknown keys are skipped. Returns `None` when nothing valid remains.
    pub fn from_list(list: &str) -> Option<IoInterfaces> {
        let set = list
            .split(',')
            .filter_map(IoType::from_key)
            .fold(IoInterfaces::empty(), |acc, io| acc | io.interface());
        if set.is_empty() {
            None
        } else {
            Some(set)
        }
    }
}

/// A sensor reported during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    /// Human readable sensor name.
    pub name: String,
    /// Serial number or other stable identifier.
    pub identifier: String,
    pub io_type: IoType,
    /// IO-system specific address (HID path, `bus:address`, ...).
    pub address: String,
}

/// Opaque reference to an obtained sensor connection.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorHandle(pub u64);

impl fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One decoded inertial measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    /// Calibrated acceleration [x, y, z] in g.
    pub acceleration: [f64; 3],
    /// Angular velocity [x, y, z] in degrees/s.
    pub angular_velocity: [f64; 3],
    /// Euler angles [roll, pitch, yaw] in degrees.
    pub euler_angles: [f64; 3],
    /// Orientation quaternion [w, x, y, z].
    pub quaternion: [f64; 4],
    /// Sensor sampling time in seconds.
    pub timestamp_s: f64,
    pub frame_count: u32,
}

/// Payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    SensorFound(SensorDescriptor),
    /// Listing progress in `0.0..=1.0`; `1.0` ends the discovery cycle.
    ListingProgress(f32),
    ImuSample(ImuSample),
}

/// Event delivered by an event source.
///
/// System-scope events carry no sensor handle; device-scope events do.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub sensor: Option<SensorHandle>,
    pub kind: EventKind,
}

impl Event {
    pub fn sensor_found(desc: SensorDescriptor) -> Self {
        Self {
            sensor: None,
            kind: EventKind::SensorFound(desc),
        }
    }

    pub fn listing_progress(progress: f32) -> Self {
        Self {
            sensor: None,
            kind: EventKind::ListingProgress(progress),
        }
    }

    pub fn imu(sensor: SensorHandle, sample: ImuSample) -> Self {
        Self {
            sensor: Some(sensor),
            kind: EventKind::ImuSample(sample),
        }
    }

    pub fn is_system(&self) -> bool {
        self.sensor.is_none()
    }
}

/// A down-sampled IMU sample forwarded to the streaming sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamedSample {
    pub sensor: SensorHandle,
    /// Running per-connection count of the sample (starts at 1).
    pub index: u64,
    pub sample: ImuSample,
}
