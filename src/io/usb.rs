use super::{IoSystem, LinkContext, SensorLink, SILABS_VID};
use crate::error::ConnectError;
use crate::types::{IoType, SensorDescriptor};
use crate::Result;
use rusb::{Device, DeviceHandle, GlobalContext, UsbContext};
use std::time::Duration;

/// CP210x USB UART bridge product IDs.
const SIUSB_PIDS: &[u16] = &[0xEA60, 0xEA61];

const STRING_TIMEOUT: Duration = Duration::from_millis(200);

fn is_sensor_usb(vid: u16, pid: u16) -> bool {
    vid == SILABS_VID && SIUSB_PIDS.contains(&pid)
}

fn usb_address(device: &Device<GlobalContext>) -> String {
    format!("{:03}:{:03}", device.bus_number(), device.address())
}

/// Sensors behind Silicon Labs USB bridges, enumerated with rusb.
pub struct SiUsbSystem {
    context: GlobalContext,
}

impl SiUsbSystem {
    pub fn new() -> Result<Self> {
        let context = GlobalContext::default();
        context.devices()?;
        Ok(Self { context })
    }

    fn describe(device: &Device<GlobalContext>) -> Option<SensorDescriptor> {
        let desc = device.device_descriptor().ok()?;
        if !is_sensor_usb(desc.vendor_id(), desc.product_id()) {
            return None;
        }
        let address = usb_address(device);

        // Strings need an open handle; an unreadable device is still listed.
        let (name, serial) = match device.open() {
            Ok(handle) => {
                let language = handle
                    .read_languages(STRING_TIMEOUT)
                    .ok()
                    .and_then(|langs| langs.first().copied());
                let read = |index: Option<u8>| -> Option<String> {
                    let lang = language?;
                    handle
                        .read_string_descriptor(lang, index?, STRING_TIMEOUT)
                        .ok()
                        .filter(|s| !s.is_empty())
                };
                (
                    read(desc.product_string_index()),
                    read(desc.serial_number_string_index()),
                )
            }
            Err(e) => {
                log::warn!("Cannot read strings of USB device {}: {}", address, e);
                (None, None)
            }
        };

        Some(SensorDescriptor {
            name: name.unwrap_or_else(|| "LPMS".to_string()),
            identifier: serial.unwrap_or_else(|| address.clone()),
            io_type: IoType::SiUsb,
            address,
        })
    }
}

impl IoSystem for SiUsbSystem {
    fn io_type(&self) -> IoType {
        IoType::SiUsb
    }

    fn list_devices(&self) -> Result<Vec<SensorDescriptor>> {
        let devices = self
            .context
            .devices()?
            .iter()
            .filter_map(|d| Self::describe(&d))
            .collect::<Vec<_>>();
        log::debug!("SiUsb listing found {} sensor(s)", devices.len());
        Ok(devices)
    }

    fn open(
        &self,
        desc: &SensorDescriptor,
        _ctx: LinkContext,
    ) -> std::result::Result<Box<dyn SensorLink>, ConnectError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| ConnectError::IoFailed(e.to_string()))?;
        let device = devices
            .iter()
            .find(|d| usb_address(d) == desc.address)
            .ok_or_else(|| ConnectError::UnknownSensor(desc.identifier.clone()))?;
        let handle = device.open().map_err(|e| match e {
            rusb::Error::Access | rusb::Error::Busy => ConnectError::ConnectFailed,
            other => ConnectError::IoFailed(other.to_string()),
        })?;
        log::info!("Opened SiUsb sensor {} at {}", desc.identifier, desc.address);
        Ok(Box::new(SiUsbLink { _handle: handle }))
    }
}

struct SiUsbLink {
    _handle: DeviceHandle<GlobalContext>,
}

impl SensorLink for SiUsbLink {
    fn io_type(&self) -> IoType {
        IoType::SiUsb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_filter() {
        assert!(is_sensor_usb(0x10C4, 0xEA60));
        assert!(is_sensor_usb(0x10C4, 0xEA61));
        assert!(!is_sensor_usb(0x10C4, 0xEA70));
        assert!(!is_sensor_usb(0x0403, 0xEA60));
    }
}
