//! Vendor driver boundary.
//!
//! The phidget22 SDK is modeled as two traits: [`PhidgetDriver`] constructs
//! channel handles and owns the network/manager layer, and [`DeviceChannel`]
//! is one live hardware channel. The rest of the crate only ever talks to
//! these traits, so tests and the demo binary run against the in-memory
//! [`mock`] implementation.
//!
//! Event delivery follows the SDK: each handle emits attach/detach/value
//! events in the order the hardware reports them. Here that is a broadcast
//! channel per handle; every subscriber observes the per-handle order.
//!
//! Handle polymorphism (the SDK's kind-specific subclasses) is rendered as a
//! kind tag plus a capability surface: setters that do not apply to a handle's
//! kind answer [`DriverError::Unsupported`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::options::{
    BridgeGain, InputMode, LedForwardVoltage, PowerSupply, VoltageRange, VoltageRatioSensorType,
    VoltageSensorType,
};

pub mod mock;

/// Result alias for driver-boundary calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors surfaced by the vendor driver.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Operation does not exist for this channel kind.
    #[error("operation '{op}' is not supported by {kind} channels")]
    Unsupported {
        /// Name of the attempted operation.
        op: &'static str,
        /// Kind of the handle the operation was attempted on.
        kind: ChannelKind,
    },

    /// Driver rejected the supplied parameters.
    #[error("driver rejected parameters: {0}")]
    Rejected(String),

    /// Hardware or transport failure during an operation.
    #[error("communication failure: {0}")]
    Communication(String),
}

/// Concrete kind of a hardware channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Analog voltage input.
    VoltageInput,
    /// Ratiometric voltage input (bridge/sensor port).
    VoltageRatioInput,
    /// Digital input.
    DigitalInput,
    /// Digital output.
    DigitalOutput,
}

impl ChannelKind {
    /// Stable identifier, also used in channel keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::VoltageInput => "voltage-input",
            ChannelKind::VoltageRatioInput => "voltage-ratio-input",
            ChannelKind::DigitalInput => "digital-input",
            ChannelKind::DigitalOutput => "digital-output",
        }
    }

    /// Whether values read from this kind are numeric (vs on/off).
    pub fn is_analog(self) -> bool {
        matches!(self, ChannelKind::VoltageInput | ChannelKind::VoltageRatioInput)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value observed on or written to a channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    /// Numeric reading from an analog kind.
    Decimal(f64),
    /// Boolean state of a digital kind.
    OnOff(bool),
}

/// Event emitted by a channel handle.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// Hardware became reachable.
    Attach,
    /// Hardware became unreachable.
    Detach,
    /// Observed value changed.
    ValueChange(ChannelValue),
}

/// Remote server classes the driver can discover on the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerType {
    /// phidget22 network server.
    DeviceRemote,
    /// phidget22 web server.
    WwwRemote,
    /// Phidget single-board computer.
    Sbc,
}

/// Device family reported by the manager layer during a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceFamily {
    /// 1010/1013/1018/1019 InterfaceKit boards.
    InterfaceKit1010101310181019,
    /// 1011 InterfaceKit 2/2/2.
    InterfaceKit1011,
    /// 1012 InterfaceKit 0/16/16.
    InterfaceKit1012,
    /// 1014 relay board.
    Relay1014,
    /// 1017 relay board.
    Relay1017,
    /// 1046 bridge.
    Bridge1046,
    /// HUB0000 VINT hub.
    Hub0000,
    /// Driver-internal dictionary pseudo-device.
    Dictionary,
    /// Any other family, identified by its raw device id.
    Other(i32),
}

/// One attach notification from the manager layer.
#[derive(Clone, Debug)]
pub struct ManagerEvent {
    /// Serial number of the attached device.
    pub serial_number: i32,
    /// Device family reported by the driver.
    pub family: DeviceFamily,
    /// Human-readable device name.
    pub device_name: String,
}

/// One live hardware channel.
///
/// `open`/`close` are idempotent. Kind-specific setters default to
/// [`DriverError::Unsupported`]; implementations override the ones their
/// kind provides.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Concrete kind of this handle.
    fn kind(&self) -> ChannelKind;

    /// Serial number of the owning device.
    fn serial_number(&self) -> i32;

    /// Whether the hardware is currently attached.
    fn is_attached(&self) -> bool;

    /// Open the channel. Safe to call on an already-open handle.
    async fn open(&self) -> DriverResult<()>;

    /// Close the channel and release driver-side resources.
    async fn close(&self) -> DriverResult<()>;

    /// Subscribe to attach/detach/value events for this handle.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Read the current value (attached handles only).
    async fn read_value(&self) -> DriverResult<ChannelValue>;

    /// Write an on/off state (digital outputs only).
    async fn write_state(&self, _on: bool) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "write_state", kind: self.kind() })
    }

    /// Mark this handle as addressing a hub port directly.
    async fn set_hub_port_device(&self, _is_hub_port: bool) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_hub_port_device", kind: self.kind() })
    }

    /// Select the hub port this handle addresses.
    async fn set_hub_port(&self, _port: i32) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_hub_port", kind: self.kind() })
    }

    /// Select the channel index within the addressed port.
    async fn set_channel(&self, _channel: i32) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_channel", kind: self.kind() })
    }

    /// Minimum value change that triggers a value event (analog kinds).
    async fn set_sensor_value_change_trigger(&self, _sensitivity: f64) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_sensor_value_change_trigger", kind: self.kind() })
    }

    /// Voltage sensor interpretation (voltage inputs).
    async fn set_voltage_sensor_type(&self, _sensor: VoltageSensorType) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_voltage_sensor_type", kind: self.kind() })
    }

    /// Ratio sensor interpretation (voltage ratio inputs).
    async fn set_voltage_ratio_sensor_type(
        &self,
        _sensor: VoltageRatioSensorType,
    ) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_voltage_ratio_sensor_type", kind: self.kind() })
    }

    /// Sensor power supply (voltage inputs, digital inputs).
    async fn set_power_supply(&self, _supply: PowerSupply) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_power_supply", kind: self.kind() })
    }

    /// Measurement range (voltage inputs).
    async fn set_voltage_range(&self, _range: VoltageRange) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_voltage_range", kind: self.kind() })
    }

    /// Bridge amplifier enable (voltage ratio inputs).
    async fn set_bridge_enabled(&self, _enabled: bool) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_bridge_enabled", kind: self.kind() })
    }

    /// Bridge amplifier gain (voltage ratio inputs).
    async fn set_bridge_gain(&self, _gain: BridgeGain) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_bridge_gain", kind: self.kind() })
    }

    /// Input wiring mode (digital inputs).
    async fn set_input_mode(&self, _mode: InputMode) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_input_mode", kind: self.kind() })
    }

    /// Duty cycle (digital outputs).
    async fn set_duty_cycle(&self, _duty: f64) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_duty_cycle", kind: self.kind() })
    }

    /// LED current limit in amps (digital outputs).
    async fn set_led_current_limit(&self, _limit: f64) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_led_current_limit", kind: self.kind() })
    }

    /// LED forward voltage (digital outputs).
    async fn set_led_forward_voltage(&self, _voltage: LedForwardVoltage) -> DriverResult<()> {
        Err(DriverError::Unsupported { op: "set_led_forward_voltage", kind: self.kind() })
    }
}

/// Entry point into the vendor driver.
///
/// Construction is not guaranteed thread-safe by the SDK; the channel
/// registry serializes all `construct` calls onto its worker.
#[async_trait]
pub trait PhidgetDriver: Send + Sync {
    /// Construct a new channel handle bound to a device and channel index.
    async fn construct(
        &self,
        kind: ChannelKind,
        serial_number: i32,
        channel: Option<i32>,
    ) -> DriverResult<Arc<dyn DeviceChannel>>;

    /// Enable network discovery of a remote server class.
    fn enable_server_discovery(&self, server: ServerType) -> DriverResult<()>;

    /// Open the manager layer and stream device attach notifications.
    async fn open_manager(&self) -> DriverResult<mpsc::UnboundedReceiver<ManagerEvent>>;

    /// Close the manager layer opened by [`open_manager`](Self::open_manager).
    async fn close_manager(&self) -> DriverResult<()>;
}
