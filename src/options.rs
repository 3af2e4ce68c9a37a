//! Per-channel configuration snapshots and Phidget enumeration tables.
//!
//! The host framework hands the bridge a read-only mapping from option name to
//! typed value for every declared channel. Values are either plain numbers,
//! booleans, or enumerations identified by an integer id from the phidget22
//! library. An id that does not match a known enumeration member is treated as
//! absent, so the driver's own default stays in effect.
//!
//! Option names mirror the host framework's channel configuration keys
//! (`sensitivity`, `power-supply`, `sensor-type`, ...). Only `sensitivity` has
//! a library-side default (0.01); every other absent option is simply skipped
//! during configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Option key: sensor value change trigger.
pub const OPT_SENSITIVITY: &str = "sensitivity";
/// Option key: power supply selection for voltage/digital inputs.
pub const OPT_POWER_SUPPLY: &str = "power-supply";
/// Option key: digital input mode (NPN/PNP).
pub const OPT_INPUT_MODE: &str = "input-mode";
/// Option key: digital output duty cycle.
pub const OPT_DUTY_CYCLE: &str = "duty-cycle";
/// Option key: LED current limit in amps.
pub const OPT_LED_CURRENT_LIMIT: &str = "led-current-limit";
/// Option key: LED forward voltage selection.
pub const OPT_LED_FORWARD_VOLTAGE: &str = "led-forward-voltage";
/// Option key: analog sensor type id.
pub const OPT_SENSOR_TYPE: &str = "sensor-type";
/// Option key: voltage input range selection.
pub const OPT_VOLTAGE_RANGE: &str = "voltage-range";
/// Option key: bridge enable for voltage ratio inputs.
pub const OPT_BRIDGE_ENABLE: &str = "bridge-enable";
/// Option key: bridge gain selection.
pub const OPT_BRIDGE_GAIN: &str = "bridge-gain";
/// Option key: hub port mode for VINT ports.
pub const OPT_PORT_MODE: &str = "port-mode";

/// Sensitivity applied when the snapshot does not specify one.
pub const DEFAULT_SENSITIVITY: f64 = 0.01;

/// A single typed option value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Numeric value (also carries enumeration ids).
    Number(f64),
    /// Boolean value.
    Bool(bool),
}

/// Read-only configuration snapshot for one channel.
///
/// Built once from the host framework's channel configuration and never
/// mutated by the bridge. Re-applied verbatim on every attach event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelOptions {
    values: HashMap<String, OptionValue>,
}

impl ChannelOptions {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style numeric option.
    pub fn with_number(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), OptionValue::Number(value));
        self
    }

    /// Builder-style boolean option.
    pub fn with_bool(mut self, name: &str, value: bool) -> Self {
        self.values.insert(name.to_string(), OptionValue::Bool(value));
        self
    }

    /// Numeric option, if present and numeric.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(OptionValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Boolean option, if present and boolean.
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(OptionValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Enumerated option decoded from its integer id.
    ///
    /// An id that matches no member of the enumeration is treated as absent.
    pub fn enumerated<E: FromOptionId>(&self, name: &str) -> Option<E> {
        self.number(name).and_then(|n| E::from_id(n as i32))
    }
}

/// Decoding of phidget22 enumerations from their integer ids.
pub trait FromOptionId: Sized {
    /// Decode from the phidget22 integer id; `None` when unrecognized.
    fn from_id(id: i32) -> Option<Self>;
}

macro_rules! option_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $id:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl FromOptionId for $name {
            fn from_id(id: i32) -> Option<Self> {
                match id {
                    $($id => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl $name {
            /// The phidget22 integer id of this member.
            pub fn id(self) -> i32 {
                match self {
                    $(Self::$variant => $id),+
                }
            }
        }
    };
}

option_enum! {
    /// Electrical/logical mode of a VINT hub port.
    HubPortMode {
        /// Port speaks the VINT protocol to a smart device.
        Vint = 0,
        /// Port acts as a digital input.
        DigitalInput = 1,
        /// Port acts as a digital output.
        DigitalOutput = 2,
        /// Port acts as a 0-5V voltage input.
        VoltageInput = 3,
        /// Port acts as a ratiometric voltage input.
        VoltageRatioInput = 4,
    }
}

option_enum! {
    /// Sensor power supply selection.
    PowerSupply {
        /// Power supply off.
        Off = 1,
        /// 12V supply.
        Volts12 = 2,
        /// 24V supply.
        Volts24 = 3,
    }
}

option_enum! {
    /// Digital input wiring mode.
    InputMode {
        /// Sinking sensor.
        Npn = 1,
        /// Sourcing sensor.
        Pnp = 2,
    }
}

option_enum! {
    /// Bridge amplifier gain for voltage ratio inputs.
    BridgeGain {
        /// Unity gain.
        Gain1x = 1,
        /// 8x gain.
        Gain8x = 2,
        /// 16x gain.
        Gain16x = 3,
        /// 32x gain.
        Gain32x = 4,
        /// 64x gain.
        Gain64x = 5,
        /// 128x gain.
        Gain128x = 6,
    }
}

option_enum! {
    /// LED forward voltage selection for digital outputs driving LEDs.
    LedForwardVoltage {
        /// 1.7V
        V1_7 = 1,
        /// 2.75V
        V2_75 = 2,
        /// 3.2V
        V3_2 = 3,
        /// 3.9V
        V3_9 = 4,
        /// 4.0V
        V4_0 = 5,
        /// 4.8V
        V4_8 = 6,
        /// 5.0V
        V5_0 = 7,
        /// 5.6V
        V5_6 = 8,
    }
}

option_enum! {
    /// Measurement range of a voltage input.
    VoltageRange {
        /// ±10mV
        Mv10 = 1,
        /// ±40mV
        Mv40 = 2,
        /// ±200mV
        Mv200 = 3,
        /// ±312.5mV
        Mv312_5 = 4,
        /// ±400mV
        Mv400 = 5,
        /// ±1000mV
        Mv1000 = 6,
        /// ±2V
        V2 = 7,
        /// ±5V
        V5 = 8,
        /// ±15V
        V15 = 9,
        /// ±40V
        V40 = 10,
        /// Automatic range selection.
        Auto = 11,
    }
}

option_enum! {
    /// Known voltage sensor types (phidget22 VoltageSensorType ids).
    VoltageSensorType {
        /// Generic voltage measurement.
        Voltage = 0,
        /// 1114 temperature sensor.
        Pn1114 = 11140,
        /// 1117 voltage sensor.
        Pn1117 = 11170,
        /// 1123 precision voltage sensor.
        Pn1123 = 11230,
        /// 1127 precision light sensor.
        Pn1127 = 11270,
        /// 1130 pH adapter.
        Pn1130Ph = 11301,
        /// 1130 ORP adapter.
        Pn1130Orp = 11302,
        /// 3500 AC current transducer 10A.
        Pn3500 = 35000,
        /// 3501 AC current transducer 25A.
        Pn3501 = 35010,
        /// 3507 AC voltage sensor 0-250V.
        Pn3507 = 35070,
        /// 3508 AC voltage sensor 0-400V.
        Pn3508 = 35080,
        /// 3511 DC current sensor 0-10mA.
        Pn3511 = 35110,
        /// 3512 DC current sensor 0-100mA.
        Pn3512 = 35120,
        /// 3513 DC current sensor 0-1A.
        Pn3513 = 35130,
    }
}

option_enum! {
    /// Known voltage ratio sensor types (phidget22 VoltageRatioSensorType ids).
    VoltageRatioSensorType {
        /// Generic ratiometric measurement.
        VoltageRatio = 0,
        /// 1101 IR distance adapter with Sharp 2D120X.
        Pn1101Sharp2D120X = 11011,
        /// 1101 IR distance adapter with Sharp 2Y0A21.
        Pn1101Sharp2Y0A21 = 11012,
        /// 1101 IR distance adapter with Sharp 2Y0A02.
        Pn1101Sharp2Y0A02 = 11013,
        /// 1102 IR reflective sensor.
        Pn1102 = 11020,
        /// 1103 IR reflective sensor 10cm.
        Pn1103 = 11030,
        /// 1104 vibration sensor.
        Pn1104 = 11040,
        /// 1105 light sensor.
        Pn1105 = 11050,
        /// 1106 force sensor.
        Pn1106 = 11060,
        /// 1107 humidity sensor.
        Pn1107 = 11070,
        /// 1108 magnetic sensor.
        Pn1108 = 11080,
        /// 1109 rotation sensor.
        Pn1109 = 11090,
        /// 1110 touch sensor.
        Pn1110 = 11100,
        /// 1111 motion sensor.
        Pn1111 = 11110,
        /// 1112 slider 60.
        Pn1112 = 11120,
        /// 1113 mini joystick.
        Pn1113 = 11130,
        /// 1115 pressure sensor.
        Pn1115 = 11150,
        /// 1116 multi-turn rotation sensor.
        Pn1116 = 11160,
    }
}
