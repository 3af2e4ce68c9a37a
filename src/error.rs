//! Custom error types for the bridge.
//!
//! This module defines the primary error type, `BridgeError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized taxonomy for
//! everything that can go wrong between the host framework and the vendor
//! driver:
//!
//! - **`Settings`**: wraps errors from the `config` crate (file parsing,
//!   missing keys).
//! - **`Resolution`**: a declared channel type plus its configuration does not
//!   map to any concrete phidget kind. The channel is skipped, never fatal.
//! - **`Creation`**: the driver rejected the construction parameters. The
//!   channel is reported unavailable and the device offline.
//! - **`Communication`**: a driver call failed after the handle was attached,
//!   typically mid-command. The device is reported offline with a
//!   communication-error detail; the channel stays usable for a retry.
//! - **`ConfigApply`**: a single configuration field failed to apply on
//!   attach. Logged; the remaining fields still apply and the attach
//!   transition completes.
//! - **`HandleWaitTimeout`**: waiting for an asynchronously created handle
//!   exceeded the fixed bound. Treated as "channel not found"; the in-flight
//!   creation finishes in the background.
//!
//! No variant here is propagated as a process-fatal condition. Every failure
//! degrades to an offline/unavailable status plus a log record so the bridge
//! can recover on the next attach event or command.

use crate::driver::DriverError;
use thiserror::Error;

/// Convenience alias for results using the bridge error type.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Error taxonomy for the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Settings file could not be loaded or deserialized.
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O error outside the vendor driver.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared channel type does not resolve to a concrete phidget kind.
    #[error("Channel type '{0}' does not resolve to a concrete phidget kind")]
    Resolution(String),

    /// Driver rejected the channel construction parameters.
    #[error("Driver rejected channel creation for {0}")]
    Creation(String),

    /// Driver call failed while handling a command on an attached handle.
    #[error("Communication failure: {0}")]
    Communication(#[source] DriverError),

    /// A single configuration field failed to apply on attach.
    #[error("Unable to apply '{field}': {source}")]
    ConfigApply {
        /// Name of the configuration field that failed.
        field: &'static str,
        /// Underlying driver failure.
        #[source]
        source: DriverError,
    },

    /// Bounded wait for an asynchronously created handle elapsed.
    #[error("Timed out waiting for channel handle {0}")]
    HandleWaitTimeout(String),

    /// Any other driver failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}
