//! Per-channel attachment lifecycle.
//!
//! Once a handle has been obtained from the registry, an
//! [`AttachmentController`] owns everything event-driven about it: applying
//! the declarative configuration snapshot whenever the hardware attaches,
//! translating value-change events into outward state updates, reporting
//! online/offline status, and replaying the most recent deferred command.
//!
//! Configuration is resent verbatim on every attach, so a detach/reattach
//! cycle reconfigures the hardware the same way the first attach did. A field
//! that fails to apply is logged and skipped; the remaining fields still
//! apply and the channel stays attached.
//!
//! The deferred command is an explicit one-shot observer: registering a new
//! one drops (and thereby cancels) the previous one, so only the most recent
//! command is ever replayed. Last write wins; there is no queue.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::driver::{ChannelEvent, ChannelKind, DeviceChannel};
use crate::error::BridgeError;
use crate::events::{OutboundEvent, ThingStatus};
use crate::handler::ChannelCommand;
use crate::options::{
    ChannelOptions, DEFAULT_SENSITIVITY, OPT_BRIDGE_ENABLE, OPT_BRIDGE_GAIN, OPT_DUTY_CYCLE,
    OPT_INPUT_MODE, OPT_LED_CURRENT_LIMIT, OPT_LED_FORWARD_VOLTAGE, OPT_POWER_SUPPLY,
    OPT_SENSITIVITY, OPT_SENSOR_TYPE, OPT_VOLTAGE_RANGE,
};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// One-shot attach observer
// =============================================================================

/// Observer that fires a closure on the next attach event, then removes
/// itself. Dropping the observer before the event fires cancels it.
pub struct OneShotAttach {
    task: JoinHandle<()>,
}

impl OneShotAttach {
    /// Register `on_attach` against an event stream. The closure runs at most
    /// once, on the first attach event observed after registration.
    pub fn register(
        mut events: broadcast::Receiver<ChannelEvent>,
        on_attach: impl FnOnce() + Send + 'static,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Attach) => {
                        on_attach();
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "one-shot attach observer lagged behind events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }
}

impl Drop for OneShotAttach {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Attachment controller
// =============================================================================

/// Event-driven lifecycle logic for one opened channel handle.
pub struct AttachmentController {
    channel_id: String,
    serial_number: i32,
    handle: Arc<dyn DeviceChannel>,
    events_task: JoinHandle<()>,
    deferred: Mutex<Option<OneShotAttach>>,
}

impl AttachmentController {
    /// Wire a controller to a handle. Must happen before the handle is
    /// opened so the first attach event is not missed.
    pub fn new(
        channel_id: &str,
        handle: Arc<dyn DeviceChannel>,
        options: ChannelOptions,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        let serial_number = handle.serial_number();
        // Subscribe here, not inside the task: events fired before the task's
        // first poll would otherwise never reach it.
        let events = handle.subscribe();
        let events_task = tokio::spawn(event_loop(
            channel_id.to_string(),
            handle.clone(),
            events,
            options,
            outbound,
        ));
        Self {
            channel_id: channel_id.to_string(),
            serial_number,
            handle,
            events_task,
            deferred: Mutex::new(None),
        }
    }

    /// The handle this controller drives.
    pub fn handle(&self) -> &Arc<dyn DeviceChannel> {
        &self.handle
    }

    /// Store `command` for replay on the next attach event.
    ///
    /// Replaces any previously deferred command for this channel; the old
    /// observer is removed before it can fire. On attach the command is
    /// re-sent through `commands`, the handler's normal command path.
    pub fn defer_command(
        &self,
        command: ChannelCommand,
        commands: mpsc::UnboundedSender<(String, ChannelCommand)>,
    ) {
        let channel_id = self.channel_id.clone();
        let serial_number = self.serial_number;
        let observer = OneShotAttach::register(self.handle.subscribe(), move || {
            debug!(
                serial = serial_number,
                channel = %channel_id,
                ?command,
                "executing deferred command"
            );
            let _ = commands.send((channel_id.clone(), command));
        });
        let mut slot = locked(&self.deferred);
        if slot.is_some() {
            debug!(
                serial = self.serial_number,
                channel = %self.channel_id,
                "replacing previously deferred command"
            );
        }
        *slot = Some(observer);
    }

    /// Drop any pending deferred command without replaying it.
    pub fn clear_deferred(&self) {
        locked(&self.deferred).take();
    }
}

impl Drop for AttachmentController {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

async fn event_loop(
    channel_id: String,
    handle: Arc<dyn DeviceChannel>,
    mut events: broadcast::Receiver<ChannelEvent>,
    options: ChannelOptions,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
) {
    let serial = handle.serial_number();
    loop {
        match events.recv().await {
            Ok(ChannelEvent::Attach) => {
                debug!(serial, channel = %channel_id, "attached");
                apply_configuration(&channel_id, &handle, &options).await;
                let _ = outbound.send(OutboundEvent::status(serial, ThingStatus::Online));
            }
            Ok(ChannelEvent::Detach) => {
                debug!(serial, channel = %channel_id, "detached");
                let _ = outbound.send(OutboundEvent::status(serial, ThingStatus::Offline));
            }
            Ok(ChannelEvent::ValueChange(value)) => {
                debug!(serial, channel = %channel_id, ?value, "value changed");
                let _ = outbound.send(OutboundEvent::state_update(&channel_id, value));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(serial, channel = %channel_id, skipped, "event loop lagged behind driver");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// =============================================================================
// Configuration application
// =============================================================================

macro_rules! apply_field {
    ($call:expr, $field:expr, $channel_id:expr) => {
        if let Err(source) = $call.await {
            let err = BridgeError::ConfigApply { field: $field, source };
            error!(channel = %$channel_id, error = %err, "unable to configure channel properly");
        }
    };
}

/// Apply the configuration snapshot to an attached handle.
///
/// Kind-specific fields in a fixed order; absent or unrecognized options are
/// skipped so the driver default stays in effect, except sensitivity which
/// falls back to [`DEFAULT_SENSITIVITY`]. Individual failures are logged and
/// do not abort the remaining fields.
pub async fn apply_configuration(
    channel_id: &str,
    handle: &Arc<dyn DeviceChannel>,
    options: &ChannelOptions,
) {
    match handle.kind() {
        ChannelKind::VoltageInput => {
            let sensitivity = options.number(OPT_SENSITIVITY).unwrap_or(DEFAULT_SENSITIVITY);
            apply_field!(
                handle.set_sensor_value_change_trigger(sensitivity),
                OPT_SENSITIVITY,
                channel_id
            );
            if let Some(sensor) = options.enumerated(OPT_SENSOR_TYPE) {
                apply_field!(handle.set_voltage_sensor_type(sensor), OPT_SENSOR_TYPE, channel_id);
            }
            if let Some(supply) = options.enumerated(OPT_POWER_SUPPLY) {
                apply_field!(handle.set_power_supply(supply), OPT_POWER_SUPPLY, channel_id);
            }
            if let Some(range) = options.enumerated(OPT_VOLTAGE_RANGE) {
                apply_field!(handle.set_voltage_range(range), OPT_VOLTAGE_RANGE, channel_id);
            }
        }
        ChannelKind::VoltageRatioInput => {
            let sensitivity = options.number(OPT_SENSITIVITY).unwrap_or(DEFAULT_SENSITIVITY);
            apply_field!(
                handle.set_sensor_value_change_trigger(sensitivity),
                OPT_SENSITIVITY,
                channel_id
            );
            if let Some(sensor) = options.enumerated(OPT_SENSOR_TYPE) {
                apply_field!(
                    handle.set_voltage_ratio_sensor_type(sensor),
                    OPT_SENSOR_TYPE,
                    channel_id
                );
            }
            // Bridge enable is only ever sent when true.
            if options.bool(OPT_BRIDGE_ENABLE) == Some(true) {
                apply_field!(handle.set_bridge_enabled(true), OPT_BRIDGE_ENABLE, channel_id);
            }
            if let Some(gain) = options.enumerated(OPT_BRIDGE_GAIN) {
                apply_field!(handle.set_bridge_gain(gain), OPT_BRIDGE_GAIN, channel_id);
            }
        }
        ChannelKind::DigitalInput => {
            if let Some(supply) = options.enumerated(OPT_POWER_SUPPLY) {
                apply_field!(handle.set_power_supply(supply), OPT_POWER_SUPPLY, channel_id);
            }
            if let Some(mode) = options.enumerated(OPT_INPUT_MODE) {
                apply_field!(handle.set_input_mode(mode), OPT_INPUT_MODE, channel_id);
            }
        }
        ChannelKind::DigitalOutput => {
            if let Some(duty) = options.number(OPT_DUTY_CYCLE) {
                apply_field!(handle.set_duty_cycle(duty), OPT_DUTY_CYCLE, channel_id);
            }
            if let Some(limit) = options.number(OPT_LED_CURRENT_LIMIT) {
                apply_field!(
                    handle.set_led_current_limit(limit),
                    OPT_LED_CURRENT_LIMIT,
                    channel_id
                );
            }
            if let Some(voltage) = options.enumerated(OPT_LED_FORWARD_VOLTAGE) {
                apply_field!(
                    handle.set_led_forward_voltage(voltage),
                    OPT_LED_FORWARD_VOLTAGE,
                    channel_id
                );
            }
        }
    }
}
