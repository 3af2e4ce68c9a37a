//! Device discovery scans.
//!
//! A scan opens the driver's manager layer for a bounded window and maps
//! every attach notification to a [`DiscoveredDevice`]. Families without a
//! specific mapping are reported as generic phidgets; the driver-internal
//! dictionary pseudo-device is never reported. A device announcing itself
//! more than once within a window is reported once.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, warn};

use crate::driver::{DeviceFamily, ManagerEvent, PhidgetDriver};
use crate::error::BridgeResult;
use crate::events::{DeviceType, DiscoveredDevice, OutboundEvent};

/// Scans the bus for attached devices.
pub struct DiscoveryScanner {
    driver: Arc<dyn PhidgetDriver>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

impl DiscoveryScanner {
    /// Create a scanner reporting results on `outbound`.
    pub fn new(
        driver: Arc<dyn PhidgetDriver>,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        Self { driver, outbound }
    }

    /// Run one scan lasting `window`, reporting each discovered device as an
    /// [`OutboundEvent::DeviceDiscovered`]. Returns the devices reported.
    pub async fn scan(&self, window: Duration) -> BridgeResult<Vec<DiscoveredDevice>> {
        debug!(window_ms = window.as_millis() as u64, "starting discovery scan");
        let mut events = self.driver.open_manager().await?;

        let deadline = Instant::now() + window;
        let mut seen: HashSet<i32> = HashSet::new();
        let mut discovered = Vec::new();

        loop {
            let event = match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                // Stream ended or window elapsed.
                Ok(None) | Err(_) => break,
            };
            if let Some(device) = map_device(&event) {
                if seen.insert(device.serial_number) {
                    debug!(
                        serial = device.serial_number,
                        label = %device.label,
                        "discovered device"
                    );
                    let _ = self
                        .outbound
                        .send(OutboundEvent::DeviceDiscovered(device.clone()));
                    discovered.push(device);
                }
            }
        }

        if let Err(err) = self.driver.close_manager().await {
            warn!(error = %err, "could not close manager after scan");
        }
        debug!(count = discovered.len(), "discovery scan finished");
        Ok(discovered)
    }
}

/// Map a manager notification to a discovery result.
///
/// `None` for the dictionary pseudo-device, which is driver-internal and
/// never user-visible.
fn map_device(event: &ManagerEvent) -> Option<DiscoveredDevice> {
    let device_type = match event.family {
        DeviceFamily::InterfaceKit1010101310181019 => DeviceType::InterfaceKit1010101310181019,
        DeviceFamily::InterfaceKit1011 => DeviceType::InterfaceKit1011,
        DeviceFamily::InterfaceKit1012 => DeviceType::InterfaceKit1012,
        DeviceFamily::Relay1014 => DeviceType::Relay1014,
        DeviceFamily::Relay1017 => DeviceType::Relay1017,
        DeviceFamily::Bridge1046 => DeviceType::Bridge1046,
        DeviceFamily::Hub0000 => DeviceType::Hub0000,
        DeviceFamily::Dictionary => return None,
        DeviceFamily::Other(id) => {
            debug!(serial = event.serial_number, device_id = id, "unmapped device family");
            DeviceType::Generic
        }
    };
    Some(DiscoveredDevice {
        device_type,
        serial_number: event.serial_number,
        label: format!("{} (serial: {})", event.device_name, event.serial_number),
    })
}
