use super::{IoSystem, LinkContext, SensorLink, SILABS_VID};
use crate::error::ConnectError;
use crate::types::{IoType, SensorDescriptor};
use crate::Result;
use hidapi::{HidApi, HidDevice};

/// CP2110 / CP2114 HID-to-UART bridge product IDs.
const HID_BRIDGE_PIDS: &[u16] = &[0xEA80, 0xEAB0];

fn is_sensor_hid(d: &hidapi::DeviceInfo) -> bool {
    d.vendor_id() == SILABS_VID && HID_BRIDGE_PIDS.contains(&d.product_id())
}

fn create_hid_api() -> Result<HidApi> {
    let api = HidApi::new()?;
    #[cfg(target_os = "macos")]
    {
        // Keep HID opens shared on macOS to avoid seizing the interface.
        api.set_open_exclusive(false);
    }
    Ok(api)
}

/// Sensors behind HID-class UART bridges, enumerated with hidapi.
pub struct HidSystem;

impl HidSystem {
    pub fn new() -> Result<Self> {
        // Open the backend once so a missing HID stack fails at init, not mid-listing.
        create_hid_api()?;
        Ok(Self)
    }
}

impl IoSystem for HidSystem {
    fn io_type(&self) -> IoType {
        IoType::Hid
    }

    fn list_devices(&self) -> Result<Vec<SensorDescriptor>> {
        let api = create_hid_api()?;
        let devices = api
            .device_list()
            .filter(|d| is_sensor_hid(d))
            .map(|d| {
                let address = d.path().to_str().unwrap_or("").to_string();
                SensorDescriptor {
                    name: d.product_string().unwrap_or("LPMS").to_string(),
                    identifier: d
                        .serial_number()
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| address.clone()),
                    io_type: IoType::Hid,
                    address,
                }
            })
            .collect::<Vec<_>>();
        log::debug!("HID listing found {} sensor(s)", devices.len());
        Ok(devices)
    }

    fn open(
        &self,
        desc: &SensorDescriptor,
        _ctx: LinkContext,
    ) -> std::result::Result<Box<dyn SensorLink>, ConnectError> {
        let api = create_hid_api().map_err(|e| ConnectError::IoFailed(e.to_string()))?;
        let info = api
            .device_list()
            .find(|d| is_sensor_hid(d) && d.path().to_str().unwrap_or("") == desc.address)
            .ok_or_else(|| ConnectError::UnknownSensor(desc.identifier.clone()))?;
        let device = api
            .open_path(info.path())
            .map_err(|e| ConnectError::IoFailed(format!("open failed: {}", e)))?;
        log::info!("Opened HID sensor {} at {}", desc.identifier, desc.address);
        Ok(Box::new(HidLink { _device: device }))
    }
}

struct HidLink {
    _device: HidDevice,
}

impl SensorLink for HidLink {
    fn io_type(&self) -> IoType {
        IoType::Hid
    }
}
