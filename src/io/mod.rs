//! IO systems: the transports sensors are discovered and opened through.

pub mod hid;
pub mod test_sensor;
pub mod usb;

use crate::error::ConnectError;
use crate::source::EventQueue;
use crate::types::{IoType, SensorDescriptor, SensorHandle};
use crate::Result;
use std::sync::Arc;

/// Silicon Labs vendor ID; LPMS sensors ship with CP210x/CP211x bridges.
pub const SILABS_VID: u16 = 0x10C4;

/// What an opened link may use to report data.
pub struct LinkContext {
    pub sensor: SensorHandle,
    pub queue: Arc<EventQueue>,
}

/// A transport that can enumerate and open sensors.
pub trait IoSystem: Send + Sync {
    fn io_type(&self) -> IoType;

    /// Enumerate the sensors currently reachable through this system.
    fn list_devices(&self) -> Result<Vec<SensorDescriptor>>;

    /// Open a link to `desc`. The link stays open until dropped.
    fn open(
        &self,
        desc: &SensorDescriptor,
        ctx: LinkContext,
    ) -> std::result::Result<Box<dyn SensorLink>, ConnectError>;
}

/// An open connection to one sensor. Dropping it closes the connection.
pub trait SensorLink: Send {
    fn io_type(&self) -> IoType;
}
