//! Declared-type to concrete-kind resolution.
//!
//! Several channel types the host framework can declare are polymorphic: a
//! VINT hub port becomes whatever its configured port mode says, and a generic
//! analog input becomes a voltage or voltage-ratio input depending on the
//! configured sensor type. Resolution is a pure function of the declared type
//! and the channel's configuration snapshot and must run before any registry
//! lookup; resolving to the wrong kind would collide with an unrelated
//! channel's key.

use crate::driver::ChannelKind;
use crate::options::{
    ChannelOptions, FromOptionId, HubPortMode, VoltageRatioSensorType, VoltageSensorType,
    OPT_PORT_MODE, OPT_SENSOR_TYPE,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel type as declared by the host framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclaredChannelType {
    /// Concrete voltage input.
    VoltageInput,
    /// Concrete voltage ratio input.
    VoltageRatioInput,
    /// Concrete digital input.
    DigitalInput,
    /// Concrete digital output.
    DigitalOutput,
    /// Generic analog input; concrete kind selected by sensor type.
    AnalogInput,
    /// Relay output; always a digital output underneath.
    RelayOutput,
    /// Generic VINT hub port; concrete kind selected by port mode.
    VintPort,
}

impl DeclaredChannelType {
    /// Identifier used in channel definitions and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            DeclaredChannelType::VoltageInput => "voltage-input",
            DeclaredChannelType::VoltageRatioInput => "voltage-ratio-input",
            DeclaredChannelType::DigitalInput => "digital-input",
            DeclaredChannelType::DigitalOutput => "digital-output",
            DeclaredChannelType::AnalogInput => "analog-input",
            DeclaredChannelType::RelayOutput => "relay-output",
            DeclaredChannelType::VintPort => "vint-port",
        }
    }
}

impl fmt::Display for DeclaredChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a declared channel type to the concrete kind to instantiate.
///
/// Pure and non-blocking. Returns `None` when the declared type cannot be
/// narrowed to a concrete kind (the caller skips the channel):
///
/// - a VINT port whose configured mode is missing, unrecognized, or `Vint`;
/// - an analog input whose sensor type matches neither the voltage nor the
///   voltage-ratio sensor table. The legacy sensor-type id `1` is an alias
///   for `0` and is normalized before the ratio table is consulted.
pub fn resolve_channel_kind(
    declared: DeclaredChannelType,
    options: &ChannelOptions,
) -> Option<ChannelKind> {
    match declared {
        DeclaredChannelType::VoltageInput => Some(ChannelKind::VoltageInput),
        DeclaredChannelType::VoltageRatioInput => Some(ChannelKind::VoltageRatioInput),
        DeclaredChannelType::DigitalInput => Some(ChannelKind::DigitalInput),
        DeclaredChannelType::DigitalOutput | DeclaredChannelType::RelayOutput => {
            Some(ChannelKind::DigitalOutput)
        }
        DeclaredChannelType::VintPort => match options.enumerated(OPT_PORT_MODE)? {
            HubPortMode::DigitalInput => Some(ChannelKind::DigitalInput),
            HubPortMode::DigitalOutput => Some(ChannelKind::DigitalOutput),
            HubPortMode::VoltageInput => Some(ChannelKind::VoltageInput),
            HubPortMode::VoltageRatioInput => Some(ChannelKind::VoltageRatioInput),
            HubPortMode::Vint => None,
        },
        DeclaredChannelType::AnalogInput => {
            let sensor_type = options.number(OPT_SENSOR_TYPE)? as i32;
            if VoltageSensorType::from_id(sensor_type).is_some() {
                return Some(ChannelKind::VoltageInput);
            }
            // Sensor type 1 is a legacy alias for the generic ratio sensor.
            let normalized = if sensor_type == 1 { 0 } else { sensor_type };
            VoltageRatioSensorType::from_id(normalized).map(|_| ChannelKind::VoltageRatioInput)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_types_pass_through() {
        let options = ChannelOptions::new();
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::VoltageInput, &options),
            Some(ChannelKind::VoltageInput)
        );
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::DigitalInput, &options),
            Some(ChannelKind::DigitalInput)
        );
    }

    #[test]
    fn relay_output_is_a_digital_output() {
        let options = ChannelOptions::new();
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::RelayOutput, &options),
            Some(ChannelKind::DigitalOutput)
        );
    }

    #[test]
    fn vint_port_follows_port_mode() {
        let options = ChannelOptions::new()
            .with_number(OPT_PORT_MODE, f64::from(HubPortMode::DigitalOutput.id()));
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::VintPort, &options),
            Some(ChannelKind::DigitalOutput)
        );
    }

    #[test]
    fn vint_port_without_mode_does_not_resolve() {
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::VintPort, &ChannelOptions::new()),
            None
        );
        let unknown = ChannelOptions::new().with_number(OPT_PORT_MODE, 99.0);
        assert_eq!(resolve_channel_kind(DeclaredChannelType::VintPort, &unknown), None);
    }

    #[test]
    fn analog_input_with_voltage_sensor_resolves_to_voltage() {
        let options = ChannelOptions::new().with_number(OPT_SENSOR_TYPE, 11170.0);
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::AnalogInput, &options),
            Some(ChannelKind::VoltageInput)
        );
    }

    #[test]
    fn analog_input_legacy_alias_normalizes_to_ratio() {
        // Id 1 is in neither table directly; it aliases the generic ratio
        // sensor (id 0) and must resolve to a voltage ratio input.
        let options = ChannelOptions::new().with_number(OPT_SENSOR_TYPE, 1.0);
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::AnalogInput, &options),
            Some(ChannelKind::VoltageRatioInput)
        );
    }

    #[test]
    fn analog_input_with_ratio_sensor_resolves_to_ratio() {
        let options = ChannelOptions::new().with_number(OPT_SENSOR_TYPE, 11060.0);
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::AnalogInput, &options),
            Some(ChannelKind::VoltageRatioInput)
        );
    }

    #[test]
    fn analog_input_with_unknown_sensor_does_not_resolve() {
        let options = ChannelOptions::new().with_number(OPT_SENSOR_TYPE, 12345.0);
        assert_eq!(resolve_channel_kind(DeclaredChannelType::AnalogInput, &options), None);
        assert_eq!(
            resolve_channel_kind(DeclaredChannelType::AnalogInput, &ChannelOptions::new()),
            None
        );
    }
}
