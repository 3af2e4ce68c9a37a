//! Attachment Lifecycle Integration Test
//!
//! Verifies the end-to-end path from channel definitions through the
//! registry, handler, and attachment controller against the mock driver:
//! - configuration applied on attach (and reapplied on reattach)
//! - value changes surfacing as state updates
//! - deferred commands replaying on attach, last write wins
//! - shared handles across declarations resolving to the same kind
//! - disposal closing handles exactly once

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use phidget_bridge::discovery::DiscoveryScanner;
use phidget_bridge::driver::mock::MockDriver;
use phidget_bridge::driver::{ChannelKind, ChannelValue, DeviceFamily};
use phidget_bridge::events::{DeviceType, OutboundEvent, StatusDetail, ThingStatus};
use phidget_bridge::handler::{ChannelCommand, ChannelDefinition, DeviceHandler};
use phidget_bridge::options::{ChannelOptions, OPT_SENSITIVITY};
use phidget_bridge::registry::ChannelRegistry;
use phidget_bridge::resolver::DeclaredChannelType;

const SERIAL: i32 = 123456;

fn definition(
    id: &str,
    declared: DeclaredChannelType,
    channel: Option<i32>,
    options: ChannelOptions,
) -> ChannelDefinition {
    ChannelDefinition {
        id: id.to_string(),
        declared_type: declared,
        channel,
        port: None,
        options,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> OutboundEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for outbound event")
        .expect("outbound channel closed")
}

async fn next_state_update(
    rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
) -> (String, ChannelValue) {
    loop {
        match next_event(rx).await {
            OutboundEvent::StateUpdate { channel_id, value, .. } => return (channel_id, value),
            OutboundEvent::StatusUpdate { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn voltage_input_refresh_attach_and_value_flow() {
    let driver = Arc::new(MockDriver::new());
    let registry = Arc::new(ChannelRegistry::new(driver.clone()));
    let (outbound, mut rx) = mpsc::unbounded_channel();

    let handler = DeviceHandler::new(
        SERIAL,
        vec![definition(
            "voltage0",
            DeclaredChannelType::VoltageInput,
            Some(0),
            ChannelOptions::new().with_number(OPT_SENSITIVITY, 0.05),
        )],
        driver.clone(),
        registry,
        outbound,
    );
    handler.initialize().await;
    assert_eq!(
        next_event(&mut rx).await,
        OutboundEvent::StatusUpdate {
            serial_number: SERIAL,
            status: ThingStatus::Online,
            detail: StatusDetail::None,
        }
    );

    let mock = driver
        .channel_for(SERIAL, ChannelKind::VoltageInput, Some(0))
        .expect("voltage handle constructed");
    assert_eq!(mock.open_count(), 1);

    // Refresh before attach only reopens; no state can be read yet.
    handler.handle_command("voltage0", ChannelCommand::Refresh).await;
    assert_eq!(mock.open_count(), 2);

    // Attach applies the configured sensitivity and reports online.
    mock.fire_attach();
    assert_eq!(
        next_event(&mut rx).await,
        OutboundEvent::StatusUpdate {
            serial_number: SERIAL,
            status: ThingStatus::Online,
            detail: StatusDetail::None,
        }
    );
    assert_eq!(mock.calls_of("set_sensor_value_change_trigger"), vec!["0.05"]);

    // A hardware value change surfaces as a numeric state update.
    mock.fire_value(ChannelValue::Decimal(3.7));
    let (channel_id, value) = next_state_update(&mut rx).await;
    assert_eq!(channel_id, "voltage0");
    assert_eq!(value, ChannelValue::Decimal(3.7));

    // Refresh while attached re-reads the current value.
    handler.handle_command("voltage0", ChannelCommand::Refresh).await;
    let (_, value) = next_state_update(&mut rx).await;
    assert_eq!(value, ChannelValue::Decimal(3.7));
}

#[tokio::test]
async fn deferred_commands_replay_last_write_on_attach() {
    let driver = Arc::new(MockDriver::new());
    let registry = Arc::new(ChannelRegistry::new(driver.clone()));
    let (outbound, mut rx) = mpsc::unbounded_channel();

    let handler = DeviceHandler::new(
        SERIAL,
        vec![definition(
            "relay0",
            DeclaredChannelType::RelayOutput,
            Some(0),
            ChannelOptions::new(),
        )],
        driver.clone(),
        registry,
        outbound,
    );
    handler.initialize().await;
    next_event(&mut rx).await; // online from initialize

    let mock = driver
        .channel_for(SERIAL, ChannelKind::DigitalOutput, Some(0))
        .expect("relay resolves to a digital output");

    // Two commands while unattached: each reports offline, reopens, and
    // replaces the pending replay.
    handler.handle_command("relay0", ChannelCommand::On).await;
    handler.handle_command("relay0", ChannelCommand::Off).await;
    assert!(mock.calls_of("write_state").is_empty());

    mock.fire_attach();
    let (channel_id, value) = next_state_update(&mut rx).await;
    assert_eq!(channel_id, "relay0");
    assert_eq!(value, ChannelValue::OnOff(false));
    assert_eq!(mock.calls_of("write_state"), vec!["false"]);

    // The replay was one-shot: a detach/reattach cycle writes nothing new.
    mock.fire_detach();
    mock.fire_attach();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.calls_of("write_state"), vec!["false"]);
}

#[tokio::test]
async fn relay_and_digital_output_definitions_share_one_handle() {
    let driver = Arc::new(MockDriver::new());
    let registry = Arc::new(ChannelRegistry::new(driver.clone()));
    let (outbound, _rx) = mpsc::unbounded_channel();

    // Both declarations resolve to digital-output channel 0 on this device.
    let handler = DeviceHandler::new(
        SERIAL,
        vec![
            definition("relay0", DeclaredChannelType::RelayOutput, Some(0), ChannelOptions::new()),
            definition(
                "output0",
                DeclaredChannelType::DigitalOutput,
                Some(0),
                ChannelOptions::new(),
            ),
        ],
        driver.clone(),
        registry,
        outbound,
    );
    handler.initialize().await;

    assert_eq!(driver.construct_count(), 1);
}

#[tokio::test]
async fn dispose_closes_handles_once() {
    let driver = Arc::new(MockDriver::new());
    let registry = Arc::new(ChannelRegistry::new(driver.clone()));
    let (outbound, _rx) = mpsc::unbounded_channel();

    let handler = DeviceHandler::new(
        SERIAL,
        vec![definition(
            "voltage0",
            DeclaredChannelType::VoltageInput,
            Some(0),
            ChannelOptions::new(),
        )],
        driver.clone(),
        registry,
        outbound,
    );
    handler.initialize().await;
    let mock = driver
        .channel_for(SERIAL, ChannelKind::VoltageInput, Some(0))
        .expect("voltage handle constructed");

    handler.dispose().await;
    handler.dispose().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.close_count(), 1);
}

#[tokio::test]
async fn discovery_scan_reports_known_and_generic_devices() {
    let driver = Arc::new(MockDriver::new());
    let (outbound, _rx) = mpsc::unbounded_channel();
    let scanner = DiscoveryScanner::new(driver.clone(), outbound);

    driver.announce_device(111, DeviceFamily::Relay1017, "Phidget InterfaceKit 0/0/8");
    driver.announce_device(222, DeviceFamily::Other(125), "Phidget TextLCD");
    driver.announce_device(333, DeviceFamily::Dictionary, "Dictionary");

    let devices = scanner.scan(Duration::from_millis(100)).await.expect("scan succeeds");
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device_type, DeviceType::Relay1017);
    assert_eq!(devices[0].label, "Phidget InterfaceKit 0/0/8 (serial: 111)");
    assert_eq!(devices[1].device_type, DeviceType::Generic);
}
