//! Outbound events consumed by the host framework.
//!
//! The bridge pushes three things outward: per-channel state updates, device
//! level online/offline status, and discovery results. They travel over a
//! single unbounded channel the host framework (or a test) holds the
//! receiving end of.

use crate::driver::ChannelValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device-level status reported to the host framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThingStatus {
    /// Device reachable and operational.
    Online,
    /// Device unreachable.
    Offline,
}

/// Additional detail attached to a status update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusDetail {
    /// No further detail.
    None,
    /// A driver operation failed mid-command.
    CommunicationError,
}

/// Logical device type reported by discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Any phidget without a more specific mapping.
    Generic,
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
}

/// One device found during a scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Mapped logical device type.
    pub device_type: DeviceType,
    /// Device serial number.
    pub serial_number: i32,
    /// Human-readable label, e.g. `"Phidget InterfaceKit 8/8/8 (serial: 123)"`.
    pub label: String,
}

/// Event pushed outward to the host framework.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundEvent {
    /// A channel's observed or commanded value changed.
    StateUpdate {
        /// Identifier of the logical channel.
        channel_id: String,
        /// New value: numeric for analog kinds, on/off for digital kinds.
        value: ChannelValue,
        /// When the bridge observed the change.
        timestamp: DateTime<Utc>,
    },
    /// Device-level status changed.
    StatusUpdate {
        /// Serial number of the device.
        serial_number: i32,
        /// Online or offline.
        status: ThingStatus,
        /// Extra detail, e.g. a communication error.
        detail: StatusDetail,
    },
    /// A device was discovered during a scan.
    DeviceDiscovered(DiscoveredDevice),
}

impl OutboundEvent {
    /// State update stamped now.
    pub fn state_update(channel_id: &str, value: ChannelValue) -> Self {
        OutboundEvent::StateUpdate {
            channel_id: channel_id.to_string(),
            value,
            timestamp: Utc::now(),
        }
    }

    /// Plain status update with no detail.
    pub fn status(serial_number: i32, status: ThingStatus) -> Self {
        OutboundEvent::StatusUpdate { serial_number, status, detail: StatusDetail::None }
    }

    /// Offline status carrying a communication-error detail.
    pub fn communication_error(serial_number: i32) -> Self {
        OutboundEvent::StatusUpdate {
            serial_number,
            status: ThingStatus::Offline,
            detail: StatusDetail::CommunicationError,
        }
    }
}
