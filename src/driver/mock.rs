//! In-memory mock driver.
//!
//! Stands in for the phidget22 SDK in tests and the demo binary. Tests drive
//! attach/detach/value events by hand and inspect the setter calls a channel
//! received, so the attachment lifecycle can be verified without hardware.
//!
//! Construction can be slowed down (`set_construct_delay`) to exercise the
//! registry's bounded wait, and individual kinds or setters can be made to
//! fail to exercise the error paths.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;

use super::{
    ChannelEvent, ChannelKind, ChannelValue, DeviceChannel, DeviceFamily, DriverError,
    DriverResult, ManagerEvent, PhidgetDriver, ServerType,
};
use crate::options::{
    BridgeGain, InputMode, LedForwardVoltage, PowerSupply, VoltageRange, VoltageRatioSensorType,
    VoltageSensorType,
};

const EVENT_CAPACITY: usize = 64;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockChannel
// =============================================================================

/// Mock hardware channel with scriptable events.
pub struct MockChannel {
    kind: ChannelKind,
    serial_number: i32,
    channel: Option<i32>,
    attached: AtomicBool,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    value: Mutex<ChannelValue>,
    events: broadcast::Sender<ChannelEvent>,
    calls: Mutex<Vec<(String, String)>>,
    failing_ops: Mutex<HashSet<&'static str>>,
}

impl MockChannel {
    fn new(kind: ChannelKind, serial_number: i32, channel: Option<i32>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let value = if kind.is_analog() {
            ChannelValue::Decimal(0.0)
        } else {
            ChannelValue::OnOff(false)
        };
        Self {
            kind,
            serial_number,
            channel,
            attached: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            value: Mutex::new(value),
            events,
            calls: Mutex::new(Vec::new()),
            failing_ops: Mutex::new(HashSet::new()),
        }
    }

    /// Channel index this handle was constructed with.
    pub fn channel(&self) -> Option<i32> {
        self.channel
    }

    /// Simulate the hardware becoming reachable.
    pub fn fire_attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
        let _ = self.events.send(ChannelEvent::Attach);
    }

    /// Simulate the hardware becoming unreachable.
    pub fn fire_detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
        let _ = self.events.send(ChannelEvent::Detach);
    }

    /// Simulate a value change reported by the hardware.
    pub fn fire_value(&self, value: ChannelValue) {
        *locked(&self.value) = value;
        let _ = self.events.send(ChannelEvent::ValueChange(value));
    }

    /// Set the value returned by reads without emitting an event.
    pub fn set_value(&self, value: ChannelValue) {
        *locked(&self.value) = value;
    }

    /// Make one named operation fail with a communication error.
    pub fn fail_op(&self, op: &'static str) {
        locked(&self.failing_ops).insert(op);
    }

    /// All recorded setter/write invocations, in order, as `(op, argument)`.
    pub fn recorded_calls(&self) -> Vec<(String, String)> {
        locked(&self.calls).clone()
    }

    /// Recorded invocations of a single operation.
    pub fn calls_of(&self, op: &str) -> Vec<String> {
        locked(&self.calls)
            .iter()
            .filter(|(name, _)| name == op)
            .map(|(_, arg)| arg.clone())
            .collect()
    }

    /// How many times `open` was called.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn record(&self, op: &'static str, arg: impl ToString) -> DriverResult<()> {
        if locked(&self.failing_ops).contains(op) {
            return Err(DriverError::Communication(format!("injected failure in {op}")));
        }
        locked(&self.calls).push((op.to_string(), arg.to_string()));
        Ok(())
    }
}

#[async_trait]
impl DeviceChannel for MockChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn serial_number(&self) -> i32 {
        self.serial_number
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn open(&self) -> DriverResult<()> {
        if locked(&self.failing_ops).contains("open") {
            return Err(DriverError::Communication("injected failure in open".into()));
        }
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        if locked(&self.failing_ops).contains("close") {
            return Err(DriverError::Communication("injected failure in close".into()));
        }
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.attached.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn read_value(&self) -> DriverResult<ChannelValue> {
        if locked(&self.failing_ops).contains("read_value") {
            return Err(DriverError::Communication("injected failure in read_value".into()));
        }
        Ok(*locked(&self.value))
    }

    async fn write_state(&self, on: bool) -> DriverResult<()> {
        if self.kind != ChannelKind::DigitalOutput {
            return Err(DriverError::Unsupported { op: "write_state", kind: self.kind });
        }
        self.record("write_state", on)?;
        *locked(&self.value) = ChannelValue::OnOff(on);
        Ok(())
    }

    async fn set_hub_port_device(&self, is_hub_port: bool) -> DriverResult<()> {
        self.record("set_hub_port_device", is_hub_port)
    }

    async fn set_hub_port(&self, port: i32) -> DriverResult<()> {
        self.record("set_hub_port", port)
    }

    async fn set_channel(&self, channel: i32) -> DriverResult<()> {
        self.record("set_channel", channel)
    }

    async fn set_sensor_value_change_trigger(&self, sensitivity: f64) -> DriverResult<()> {
        self.record("set_sensor_value_change_trigger", sensitivity)
    }

    async fn set_voltage_sensor_type(&self, sensor: VoltageSensorType) -> DriverResult<()> {
        self.record("set_voltage_sensor_type", format!("{sensor:?}"))
    }

    async fn set_voltage_ratio_sensor_type(
        &self,
        sensor: VoltageRatioSensorType,
    ) -> DriverResult<()> {
        self.record("set_voltage_ratio_sensor_type", format!("{sensor:?}"))
    }

    async fn set_power_supply(&self, supply: PowerSupply) -> DriverResult<()> {
        self.record("set_power_supply", format!("{supply:?}"))
    }

    async fn set_voltage_range(&self, range: VoltageRange) -> DriverResult<()> {
        self.record("set_voltage_range", format!("{range:?}"))
    }

    async fn set_bridge_enabled(&self, enabled: bool) -> DriverResult<()> {
        self.record("set_bridge_enabled", enabled)
    }

    async fn set_bridge_gain(&self, gain: BridgeGain) -> DriverResult<()> {
        self.record("set_bridge_gain", format!("{gain:?}"))
    }

    async fn set_input_mode(&self, mode: InputMode) -> DriverResult<()> {
        self.record("set_input_mode", format!("{mode:?}"))
    }

    async fn set_duty_cycle(&self, duty: f64) -> DriverResult<()> {
        self.record("set_duty_cycle", duty)
    }

    async fn set_led_current_limit(&self, limit: f64) -> DriverResult<()> {
        self.record("set_led_current_limit", limit)
    }

    async fn set_led_forward_voltage(&self, voltage: LedForwardVoltage) -> DriverResult<()> {
        self.record("set_led_forward_voltage", format!("{voltage:?}"))
    }
}

// =============================================================================
// MockDriver
// =============================================================================

/// Mock phidget driver.
///
/// Hands out [`MockChannel`] handles and keeps them accessible for test
/// assertions. Devices "on the bus" for discovery are queued with
/// [`announce_device`](MockDriver::announce_device) and delivered when the
/// manager layer opens.
pub struct MockDriver {
    constructed: Mutex<Vec<Arc<MockChannel>>>,
    construct_count: AtomicUsize,
    construct_delay: Mutex<Duration>,
    rejected_kinds: Mutex<HashSet<ChannelKind>>,
    discovery_enabled: Mutex<Vec<ServerType>>,
    pending_devices: Mutex<Vec<ManagerEvent>>,
    manager_tx: Mutex<Option<mpsc::UnboundedSender<ManagerEvent>>>,
}

impl MockDriver {
    /// Create a driver with no channels and instant construction.
    pub fn new() -> Self {
        Self {
            constructed: Mutex::new(Vec::new()),
            construct_count: AtomicUsize::new(0),
            construct_delay: Mutex::new(Duration::ZERO),
            rejected_kinds: Mutex::new(HashSet::new()),
            discovery_enabled: Mutex::new(Vec::new()),
            pending_devices: Mutex::new(Vec::new()),
            manager_tx: Mutex::new(None),
        }
    }

    /// Delay every subsequent `construct` call by `delay`.
    pub fn set_construct_delay(&self, delay: Duration) {
        *locked(&self.construct_delay) = delay;
    }

    /// Make construction of `kind` fail with a rejection.
    pub fn reject_kind(&self, kind: ChannelKind) {
        locked(&self.rejected_kinds).insert(kind);
    }

    /// Number of successful constructions so far.
    pub fn construct_count(&self) -> usize {
        self.construct_count.load(Ordering::SeqCst)
    }

    /// Handle constructed for the given identity, if any.
    pub fn channel_for(
        &self,
        serial_number: i32,
        kind: ChannelKind,
        channel: Option<i32>,
    ) -> Option<Arc<MockChannel>> {
        locked(&self.constructed)
            .iter()
            .find(|c| {
                c.serial_number() == serial_number && c.kind() == kind && c.channel() == channel
            })
            .cloned()
    }

    /// Server classes discovery was enabled for.
    pub fn discovery_enabled(&self) -> Vec<ServerType> {
        locked(&self.discovery_enabled).clone()
    }

    /// Queue a device for delivery when the manager layer opens, or deliver
    /// it immediately if a scan is in progress.
    pub fn announce_device(&self, serial_number: i32, family: DeviceFamily, device_name: &str) {
        let event = ManagerEvent {
            serial_number,
            family,
            device_name: device_name.to_string(),
        };
        if let Some(tx) = locked(&self.manager_tx).as_ref() {
            if tx.send(event.clone()).is_ok() {
                return;
            }
        }
        locked(&self.pending_devices).push(event);
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhidgetDriver for MockDriver {
    async fn construct(
        &self,
        kind: ChannelKind,
        serial_number: i32,
        channel: Option<i32>,
    ) -> DriverResult<Arc<dyn DeviceChannel>> {
        let delay = *locked(&self.construct_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if locked(&self.rejected_kinds).contains(&kind) {
            return Err(DriverError::Rejected(format!(
                "no {kind} channel on device {serial_number}"
            )));
        }
        let handle = Arc::new(MockChannel::new(kind, serial_number, channel));
        locked(&self.constructed).push(handle.clone());
        self.construct_count.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn enable_server_discovery(&self, server: ServerType) -> DriverResult<()> {
        locked(&self.discovery_enabled).push(server);
        Ok(())
    }

    async fn open_manager(&self) -> DriverResult<mpsc::UnboundedReceiver<ManagerEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in locked(&self.pending_devices).drain(..) {
            let _ = tx.send(event);
        }
        *locked(&self.manager_tx) = Some(tx);
        Ok(rx)
    }

    async fn close_manager(&self) -> DriverResult<()> {
        *locked(&self.manager_tx) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn constructed_handles_are_queryable() {
        let driver = MockDriver::new();
        let handle = driver
            .construct(ChannelKind::DigitalOutput, 42, Some(1))
            .await
            .unwrap();
        assert_eq!(handle.kind(), ChannelKind::DigitalOutput);
        assert!(driver.channel_for(42, ChannelKind::DigitalOutput, Some(1)).is_some());
        assert!(driver.channel_for(42, ChannelKind::DigitalInput, Some(1)).is_none());
    }

    #[tokio::test]
    async fn rejected_kind_fails_construction() {
        let driver = MockDriver::new();
        driver.reject_kind(ChannelKind::VoltageInput);
        let result = driver.construct(ChannelKind::VoltageInput, 42, None).await;
        assert!(matches!(result, Err(DriverError::Rejected(_))));
        assert_eq!(driver.construct_count(), 0);
    }

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let channel = MockChannel::new(ChannelKind::VoltageInput, 7, Some(0));
        let mut rx = channel.subscribe();
        channel.fire_attach();
        channel.fire_value(ChannelValue::Decimal(3.7));
        channel.fire_detach();
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Attach);
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::ValueChange(ChannelValue::Decimal(3.7))
        );
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Detach);
    }

    #[tokio::test]
    async fn write_state_is_digital_output_only() {
        let input = MockChannel::new(ChannelKind::DigitalInput, 7, None);
        assert!(matches!(
            input.write_state(true).await,
            Err(DriverError::Unsupported { .. })
        ));

        let output = MockChannel::new(ChannelKind::DigitalOutput, 7, None);
        output.write_state(true).await.unwrap();
        assert_eq!(output.read_value().await.unwrap(), ChannelValue::OnOff(true));
        assert_eq!(output.calls_of("write_state"), vec!["true"]);
    }
}
