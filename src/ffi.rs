//! C FFI layer for zenclient.
//!
//! Provides an opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/zenclient.h` by cbindgen.

use crate::client::SensorClient;
use crate::config::ClientConfig;
use crate::error::LastError;
use crate::manager::SensorManager;
use crate::types::{IoInterfaces, IoType, SensorDescriptor};
use crate::ZenError;
use std::ffi::{c_char, c_int};
use std::sync::Arc;
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque client handle for C consumers.
pub struct ZenClient(SensorClient<SensorManager>);

/// Sensor descriptor in C-compatible layout.
#[repr(C)]
pub struct ZenSensorDesc {
    /// Null-terminated sensor name.
    pub name: [c_char; 256],
    /// Null-terminated serial number or identifier.
    pub identifier: [c_char; 64],
    pub io_type: IoType,
    /// Null-terminated IO-specific address.
    pub address: [c_char; 128],
}

/// Forwarded IMU sample in C-compatible layout.
#[repr(C)]
pub struct ZenSample {
    pub sensor: u64,
    /// Running per-connection sample index.
    pub index: u64,
    pub acceleration: [f64; 3],
    pub angular_velocity: [f64; 3],
    pub euler_angles: [f64; 3],
    /// Quaternion [w, x, y, z].
    pub quaternion: [f64; 4],
    pub timestamp_s: f64,
    pub frame_count: u32,
}

fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    for (i, &b) in bytes[..len].iter().enumerate() {
        buf[i] = b as c_char;
    }
    buf
}

fn to_c_desc(desc: &SensorDescriptor) -> ZenSensorDesc {
    ZenSensorDesc {
        name: str_to_fixed(&desc.name),
        identifier: str_to_fixed(&desc.identifier),
        io_type: desc.io_type,
        address: str_to_fixed(&desc.address),
    }
}

fn fail(err: ZenError) -> c_int {
    LAST_ERROR.set(&err);
    -1
}

/// Create a client over the IO systems in `interfaces`
/// (bit 0 = HID, bit 1 = SiUsb, bit 2 = simulated; 0 = HID and SiUsb).
///
/// Timing and retry settings come from the `ZEN_*` environment variables.
/// Returns NULL on error (check zen_last_error()).
#[no_mangle]
pub extern "C" fn zen_client_init(interfaces: u32) -> *mut ZenClient {
    let interfaces = match IoInterfaces::from_bits_truncate(interfaces) {
        set if set.is_empty() => IoInterfaces::HARDWARE,
        set => set,
    };
    let config = ClientConfig {
        interfaces,
        ..ClientConfig::from_env()
    };
    match SensorManager::init(interfaces) {
        Ok(manager) => {
            LAST_ERROR.clear();
            Box::into_raw(Box::new(ZenClient(SensorClient::new(Arc::new(manager), config))))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Run one discovery cycle and copy up to `max` descriptors into `out`.
///
/// Blocks until discovery completes. Returns the number of sensors found
/// (0 if none), or -1 on error.
///
/// # Safety
/// `client` must be a valid client pointer, or null. `out` must point to an
/// array of at least `max` `ZenSensorDesc` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn zen_client_list_sensors(
    client: *mut ZenClient,
    out: *mut ZenSensorDesc,
    max: c_int,
) -> c_int {
    if client.is_null() {
        return -1;
    }
    let client = &mut (*client).0;

    if let Err(e) = client.start_discovery() {
        return fail(e);
    }
    let sensors = match client.await_discovery() {
        Ok(sensors) => sensors,
        Err(ZenError::DiscoveryEmpty) => return 0,
        Err(e) => return fail(e),
    };

    let count = sensors.len().min(max.max(0) as usize);
    if !out.is_null() {
        for (i, desc) in sensors.iter().take(count).enumerate() {
            out.add(i).write(to_c_desc(desc));
        }
    }
    sensors.len() as c_int
}

/// Connect to the sensor at `index` of the last listing, with retries.
/// Returns the sensor handle (> 0), or -1 on error.
///
/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn zen_client_obtain_sensor(client: *mut ZenClient, index: c_int) -> i64 {
    if client.is_null() || index < 0 {
        return -1;
    }
    let client = &mut (*client).0;
    match client.connect(index as usize) {
        Ok(sensor) => sensor.0 as i64,
        Err(e) => fail(e) as i64,
    }
}

/// Receive the next forwarded sample with timeout.
/// `timeout_ms`: timeout in milliseconds (0 = try without blocking).
/// Returns 0 on success, -1 on error/timeout.
///
/// # Safety
/// `client` and `sample` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn zen_client_recv_sample(
    client: *mut ZenClient,
    sample: *mut ZenSample,
    timeout_ms: c_int,
) -> c_int {
    if client.is_null() || sample.is_null() {
        return -1;
    }
    let client = &mut (*client).0;
    let timeout = Duration::from_millis(timeout_ms.max(0) as u64);

    match client.next_sample(timeout) {
        Ok(s) => {
            let d = &s.sample;
            sample.write(ZenSample {
                sensor: s.sensor.0,
                index: s.index,
                acceleration: d.acceleration,
                angular_velocity: d.angular_velocity,
                euler_angles: d.euler_angles,
                quaternion: d.quaternion,
                timestamp_s: d.timestamp_s,
                frame_count: d.frame_count,
            });
            0
        }
        Err(e) => fail(e),
    }
}

/// Shut the client down and free it.
///
/// # Safety
/// `client` must be a pointer returned by `zen_client_init`, or null.
#[no_mangle]
pub unsafe extern "C" fn zen_client_shutdown(client: *mut ZenClient) {
    if !client.is_null() {
        let mut client = Box::from_raw(client);
        client.0.shutdown();
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next zenclient API call.
#[no_mangle]
pub extern "C" fn zen_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn fixed_to_string(buf: &[c_char]) -> String {
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_str_to_fixed_truncates_and_terminates() {
        let buf: [c_char; 4] = str_to_fixed("LPMS-B2");
        assert_eq!(fixed_to_string(&buf), "LPM");
    }

    #[test]
    fn test_simulated_client_roundtrip() {
        std::env::set_var("ZEN_POLL_MS", "5");
        let client = zen_client_init(IoInterfaces::TEST.bits());
        assert!(!client.is_null());

        let mut descs: Vec<ZenSensorDesc> = Vec::with_capacity(4);
        let found = unsafe { zen_client_list_sensors(client, descs.as_mut_ptr(), 4) };
        assert_eq!(found, 1);
        unsafe { descs.set_len(1) };
        assert_eq!(fixed_to_string(&descs[0].name), "LPMS-TEST");
        assert_eq!(descs[0].io_type, IoType::Test);

        let handle = unsafe { zen_client_obtain_sensor(client, 0) };
        assert_eq!(handle, 1);

        let mut sample = std::mem::MaybeUninit::<ZenSample>::uninit();
        let rc = unsafe { zen_client_recv_sample(client, sample.as_mut_ptr(), 2000) };
        assert_eq!(rc, 0);
        let sample = unsafe { sample.assume_init() };
        assert_eq!(sample.sensor, 1);
        assert_eq!(sample.index, 1);

        unsafe { zen_client_shutdown(client) };
    }

    #[test]
    fn test_null_handles_are_rejected() {
        unsafe {
            assert_eq!(zen_client_list_sensors(std::ptr::null_mut(), std::ptr::null_mut(), 0), -1);
            assert_eq!(zen_client_obtain_sensor(std::ptr::null_mut(), 0), -1);
            assert_eq!(
                zen_client_recv_sample(std::ptr::null_mut(), std::ptr::null_mut(), 0),
                -1
            );
            zen_client_shutdown(std::ptr::null_mut());
        }
    }
}
