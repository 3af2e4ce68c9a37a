//! # Phidget Bridge Library
//!
//! This crate bridges Phidget hardware channels into a home-automation host
//! framework. It owns the full lifecycle of a channel: resolving declared
//! channel types to the concrete kind to instantiate, caching one live
//! handle per hardware resource, applying declarative configuration whenever
//! the hardware attaches, translating driver events into outward state and
//! status updates, and deferring commands issued while a device is
//! unreachable.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct
//! responsibility:
//!
//! - **`attachment`**: The per-channel `AttachmentController`, which applies
//!   configuration on attach, reports online/offline status, and replays the
//!   most recent deferred command.
//! - **`discovery`**: Bounded discovery scans over the driver's manager
//!   layer, mapping device families to logical device types.
//! - **`driver`**: The vendor driver boundary (`PhidgetDriver`,
//!   `DeviceChannel`) plus the in-memory `mock` implementation used by tests
//!   and the demo binary.
//! - **`error`**: The central `BridgeError` enum. Nothing in this crate is
//!   process-fatal; every failure degrades to a log line and a status
//!   update.
//! - **`events`**: Outbound events (state updates, device status, discovery
//!   results) consumed by the host framework.
//! - **`handler`**: The per-device `DeviceHandler`, which sets up channels
//!   and processes on/off/refresh commands.
//! - **`options`**: Per-channel configuration snapshots and the Phidget
//!   enumeration tables they decode into.
//! - **`registry`**: The process-wide `ChannelRegistry` cache with its
//!   serialized creation worker and bounded handle wait.
//! - **`resolver`**: Pure resolution of declared channel types (VINT ports,
//!   generic analog inputs) to concrete channel kinds.
//! - **`settings`**: Binding-level settings loaded from TOML files.

pub mod attachment;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod events;
pub mod handler;
pub mod options;
pub mod registry;
pub mod resolver;
pub mod settings;
