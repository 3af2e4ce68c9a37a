//! Per-device command handling.
//!
//! A [`DeviceHandler`] owns every declared channel of one physical device. It
//! resolves declared channel types to concrete kinds, obtains handles from
//! the shared [`ChannelRegistry`], wires an [`AttachmentController`] per
//! channel, and processes `on`/`off`/`refresh` commands from the host
//! framework.
//!
//! Commands also arrive over an internal queue: a deferred command's one-shot
//! attach observer re-injects the original command there, so replay follows
//! the exact same code path as a fresh command from the host.
//!
//! Nothing in here is fatal. A channel that cannot be resolved or created is
//! skipped and logged; a driver failure mid-command degrades to an offline
//! status with a communication-error detail and the channel stays available
//! for the next attempt.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::attachment::AttachmentController;
use crate::driver::{ChannelKind, PhidgetDriver, ServerType};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{OutboundEvent, ThingStatus};
use crate::options::ChannelOptions;
use crate::registry::{ChannelKey, ChannelRegistry};
use crate::resolver::{resolve_channel_kind, DeclaredChannelType};

/// Command addressed to one logical channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Switch a digital output on.
    On,
    /// Switch a digital output off.
    Off,
    /// Re-read and republish the current value.
    Refresh,
}

/// Declarative definition of one channel, as supplied by the host framework.
#[derive(Clone, Debug)]
pub struct ChannelDefinition {
    /// Channel identifier within the device.
    pub id: String,
    /// Declared channel type (possibly polymorphic).
    pub declared_type: DeclaredChannelType,
    /// Explicit channel index property, if declared.
    pub channel: Option<i32>,
    /// Hub port number property (VINT ports only).
    pub port: Option<i32>,
    /// Configuration snapshot for this channel.
    pub options: ChannelOptions,
}

struct ChannelRuntime {
    key: ChannelKey,
    controller: AttachmentController,
}

struct HandlerInner {
    serial_number: i32,
    driver: Arc<dyn PhidgetDriver>,
    registry: Arc<ChannelRegistry>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    commands: mpsc::UnboundedSender<(String, ChannelCommand)>,
    definitions: Vec<ChannelDefinition>,
    channels: RwLock<HashMap<String, ChannelRuntime>>,
}

/// Handler for all channels of one device.
pub struct DeviceHandler {
    inner: Arc<HandlerInner>,
    commands_task: JoinHandle<()>,
}

impl DeviceHandler {
    /// Create a handler for the device with the given serial number.
    pub fn new(
        serial_number: i32,
        definitions: Vec<ChannelDefinition>,
        driver: Arc<dyn PhidgetDriver>,
        registry: Arc<ChannelRegistry>,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(HandlerInner {
            serial_number,
            driver,
            registry,
            outbound,
            commands,
            definitions,
            channels: RwLock::new(HashMap::new()),
        });
        let loop_inner = inner.clone();
        let commands_task = tokio::spawn(async move {
            while let Some((channel_id, command)) = commands_rx.recv().await {
                loop_inner.handle_command(&channel_id, command).await;
            }
        });
        Self { inner, commands_task }
    }

    /// Serial number of the device this handler owns.
    pub fn serial_number(&self) -> i32 {
        self.inner.serial_number
    }

    /// Queue-based entry point for commands; the same queue deferred
    /// commands replay through.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<(String, ChannelCommand)> {
        self.inner.commands.clone()
    }

    /// Handle one command for one channel.
    pub async fn handle_command(&self, channel_id: &str, command: ChannelCommand) {
        self.inner.handle_command(channel_id, command).await;
    }

    /// Open all declared channels for this device.
    ///
    /// Enables driver server discovery, then sets up every channel that
    /// resolves and constructs. Channels that do not are skipped, never
    /// fatal. Finishes by reporting the device online.
    pub async fn initialize(&self) {
        let serial = self.inner.serial_number;
        debug!(serial, "initialize");

        for server in [ServerType::DeviceRemote, ServerType::WwwRemote, ServerType::Sbc] {
            if let Err(err) = self.inner.driver.enable_server_discovery(server) {
                warn!(
                    serial,
                    ?server,
                    error = %err,
                    "unable to enable server discovery, is the avahi client library missing?"
                );
            }
        }

        for definition in &self.inner.definitions {
            debug!(serial, channel = %definition.id, "setting up phidget for channel");
            if let Err(err) = self.inner.setup_channel(definition).await {
                debug!(serial, channel = %definition.id, error = %err, "no phidget, ignoring");
            }
        }

        let _ = self.inner.outbound.send(OutboundEvent::status(serial, ThingStatus::Online));
    }

    /// Close all channels for this device and clear pending deferred
    /// commands. Handles are evicted from the registry.
    pub async fn dispose(&self) {
        let serial = self.inner.serial_number;
        debug!(serial, "dispose");
        let mut channels = self.inner.channels.write().await;
        for (channel_id, runtime) in channels.drain() {
            debug!(serial, channel = %channel_id, "disposing phidget for channel");
            runtime.controller.clear_deferred();
            self.inner.registry.dispose(runtime.key.clone());
        }
    }
}

impl Drop for DeviceHandler {
    fn drop(&mut self) {
        self.commands_task.abort();
    }
}

impl HandlerInner {
    /// Resolve, obtain, and wire the handle for one channel definition.
    async fn setup_channel(&self, definition: &ChannelDefinition) -> BridgeResult<()> {
        if self.channels.read().await.contains_key(&definition.id) {
            return Ok(());
        }

        let kind = resolve_channel_kind(definition.declared_type, &definition.options)
            .ok_or_else(|| BridgeError::Resolution(definition.declared_type.to_string()))?;
        let key = ChannelKey::new(self.serial_number, kind, definition.channel);
        let request = self.registry.request(key.clone());
        let handle = self.registry.await_handle(request).await?;

        if definition.declared_type == DeclaredChannelType::VintPort {
            if let Some(port) = definition.port {
                let result = async {
                    handle.set_hub_port_device(true).await?;
                    handle.set_hub_port(port).await?;
                    handle.set_channel(0).await
                }
                .await;
                if let Err(err) = result {
                    error!(
                        serial = self.serial_number,
                        channel = %definition.id,
                        error = %err,
                        "unable to configure hub port"
                    );
                }
            }
        }

        // Wire listeners before opening so the first attach is not missed.
        let controller = AttachmentController::new(
            &definition.id,
            handle.clone(),
            definition.options.clone(),
            self.outbound.clone(),
        );
        if let Err(err) = handle.open().await {
            error!(
                serial = self.serial_number,
                channel = %definition.id,
                error = %err,
                "unable to open phidget channel"
            );
        }

        self.channels
            .write()
            .await
            .insert(definition.id.clone(), ChannelRuntime { key, controller });
        Ok(())
    }

    async fn handle_command(&self, channel_id: &str, command: ChannelCommand) {
        let serial = self.serial_number;
        let Some(definition) = self.definitions.iter().find(|d| d.id == channel_id) else {
            warn!(serial, channel = %channel_id, "command for undeclared channel");
            return;
        };

        // A channel that failed to set up during initialize gets another
        // chance here; the registry dedupes any handle created meanwhile.
        if !self.channels.read().await.contains_key(channel_id) {
            if let Err(err) = self.setup_channel(definition).await {
                warn!(
                    serial,
                    channel = %channel_id,
                    ?command,
                    error = %err,
                    "phidget was not found for channel to handle command"
                );
                return;
            }
        }

        let channels = self.channels.read().await;
        let Some(runtime) = channels.get(channel_id) else {
            return;
        };
        let handle = runtime.controller.handle();

        match command {
            ChannelCommand::On | ChannelCommand::Off => {
                if handle.kind() != ChannelKind::DigitalOutput {
                    warn!(serial, channel = %channel_id, ?command, "on/off on a non-output channel");
                    return;
                }
                let state = command == ChannelCommand::On;
                if handle.is_attached() {
                    debug!(serial, channel = %channel_id, state, "setting state");
                    match handle.write_state(state).await {
                        Ok(()) => {
                            runtime.controller.clear_deferred();
                            let _ = self.outbound.send(OutboundEvent::state_update(
                                channel_id,
                                crate::driver::ChannelValue::OnOff(state),
                            ));
                        }
                        Err(err) => self.report_communication_error(channel_id, command, err),
                    }
                } else {
                    let _ = self
                        .outbound
                        .send(OutboundEvent::status(serial, ThingStatus::Offline));
                    if let Err(err) = handle.open().await {
                        self.report_communication_error(channel_id, command, err);
                        return;
                    }
                    debug!(
                        serial,
                        channel = %channel_id,
                        state,
                        "phidget not attached, deferring command until attached"
                    );
                    runtime.controller.defer_command(command, self.commands.clone());
                }
            }
            ChannelCommand::Refresh => {
                if handle.is_attached() {
                    debug!(serial, channel = %channel_id, "refreshing channel");
                    match handle.read_value().await {
                        Ok(value) => {
                            let _ = self
                                .outbound
                                .send(OutboundEvent::state_update(channel_id, value));
                        }
                        Err(err) => self.report_communication_error(channel_id, command, err),
                    }
                } else {
                    if let Err(err) = handle.open().await {
                        self.report_communication_error(channel_id, command, err);
                        return;
                    }
                    debug!(
                        serial,
                        channel = %channel_id,
                        "channel not attached, will refresh state when attached"
                    );
                }
            }
        }
    }

    fn report_communication_error(
        &self,
        channel_id: &str,
        command: ChannelCommand,
        err: crate::driver::DriverError,
    ) {
        let err = BridgeError::Communication(err);
        error!(
            serial = self.serial_number,
            channel = %channel_id,
            ?command,
            error = %err,
            "problem when handling command"
        );
        let _ = self.outbound.send(OutboundEvent::communication_error(self.serial_number));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::ChannelValue;
    use crate::events::StatusDetail;
    use crate::options::{HubPortMode, OPT_PORT_MODE, OPT_SENSOR_TYPE};
    use tokio::time::{timeout, Duration};

    fn definition(id: &str, declared: DeclaredChannelType, channel: Option<i32>) -> ChannelDefinition {
        ChannelDefinition {
            id: id.to_string(),
            declared_type: declared,
            channel,
            port: None,
            options: ChannelOptions::new(),
        }
    }

    struct Fixture {
        driver: Arc<MockDriver>,
        handler: DeviceHandler,
        outbound_rx: mpsc::UnboundedReceiver<OutboundEvent>,
    }

    fn fixture(definitions: Vec<ChannelDefinition>) -> Fixture {
        let driver = Arc::new(MockDriver::new());
        let registry = Arc::new(ChannelRegistry::new(driver.clone()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let handler = DeviceHandler::new(4711, definitions, driver.clone(), registry, outbound);
        Fixture { driver, handler, outbound_rx }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> OutboundEvent {
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn initialize_opens_resolvable_channels_and_reports_online() {
        let f = fixture(vec![
            definition("vin", DeclaredChannelType::VoltageInput, Some(0)),
            // Unresolvable: analog input without a sensor type.
            definition("broken", DeclaredChannelType::AnalogInput, Some(1)),
        ]);
        let mut rx = f.outbound_rx;
        f.handler.initialize().await;

        assert_eq!(f.driver.construct_count(), 1);
        assert_eq!(
            f.driver.discovery_enabled(),
            vec![ServerType::DeviceRemote, ServerType::WwwRemote, ServerType::Sbc]
        );
        let mock = f.driver.channel_for(4711, ChannelKind::VoltageInput, Some(0)).unwrap();
        assert_eq!(mock.open_count(), 1);
        // Online even though the unresolvable channel was skipped.
        assert_eq!(
            next_event(&mut rx).await,
            OutboundEvent::StatusUpdate {
                serial_number: 4711,
                status: ThingStatus::Online,
                detail: StatusDetail::None,
            }
        );
    }

    #[tokio::test]
    async fn vint_port_is_routed_to_its_hub_port_before_open() {
        let mut def = definition("port2", DeclaredChannelType::VintPort, None);
        def.port = Some(2);
        def.options = ChannelOptions::new()
            .with_number(OPT_PORT_MODE, f64::from(HubPortMode::DigitalOutput.id()));
        let f = fixture(vec![def]);
        f.handler.initialize().await;

        let mock = f.driver.channel_for(4711, ChannelKind::DigitalOutput, None).unwrap();
        let names: Vec<String> =
            mock.recorded_calls().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["set_hub_port_device", "set_hub_port", "set_channel"]);
        assert_eq!(mock.calls_of("set_hub_port"), vec!["2"]);
        assert_eq!(mock.calls_of("set_channel"), vec!["0"]);
        assert_eq!(mock.open_count(), 1);
    }

    #[tokio::test]
    async fn write_on_attached_output_updates_state() {
        let f = fixture(vec![definition("out", DeclaredChannelType::DigitalOutput, Some(0))]);
        let mut rx = f.outbound_rx;
        f.handler.initialize().await;
        next_event(&mut rx).await; // online from initialize

        let mock = f.driver.channel_for(4711, ChannelKind::DigitalOutput, Some(0)).unwrap();
        mock.fire_attach();
        next_event(&mut rx).await; // online from attach

        f.handler.handle_command("out", ChannelCommand::On).await;
        assert_eq!(mock.calls_of("write_state"), vec!["true"]);
        match next_event(&mut rx).await {
            OutboundEvent::StateUpdate { channel_id, value, .. } => {
                assert_eq!(channel_id, "out");
                assert_eq!(value, ChannelValue::OnOff(true));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_failure_reports_communication_error() {
        let f = fixture(vec![definition("out", DeclaredChannelType::DigitalOutput, Some(0))]);
        let mut rx = f.outbound_rx;
        f.handler.initialize().await;
        next_event(&mut rx).await;

        let mock = f.driver.channel_for(4711, ChannelKind::DigitalOutput, Some(0)).unwrap();
        mock.fire_attach();
        next_event(&mut rx).await;
        mock.fail_op("write_state");

        f.handler.handle_command("out", ChannelCommand::On).await;
        assert_eq!(
            next_event(&mut rx).await,
            OutboundEvent::StatusUpdate {
                serial_number: 4711,
                status: ThingStatus::Offline,
                detail: StatusDetail::CommunicationError,
            }
        );
    }

    #[tokio::test]
    async fn refresh_on_unattached_channel_only_opens() {
        let f = fixture(vec![definition("vin", DeclaredChannelType::VoltageInput, Some(0))]);
        let mut rx = f.outbound_rx;
        f.handler.initialize().await;
        next_event(&mut rx).await;

        let mock = f.driver.channel_for(4711, ChannelKind::VoltageInput, Some(0)).unwrap();
        assert_eq!(mock.open_count(), 1);
        f.handler.handle_command("vin", ChannelCommand::Refresh).await;
        assert_eq!(mock.open_count(), 2);
        assert!(
            timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
            "no state update until the hardware reports a value"
        );
    }

    #[tokio::test]
    async fn deferred_write_replays_last_command_on_attach() {
        let f = fixture(vec![definition("out", DeclaredChannelType::DigitalOutput, Some(0))]);
        let mut rx = f.outbound_rx;
        f.handler.initialize().await;
        next_event(&mut rx).await;

        let mock = f.driver.channel_for(4711, ChannelKind::DigitalOutput, Some(0)).unwrap();

        f.handler.handle_command("out", ChannelCommand::On).await;
        // Offline reported while unattached.
        assert_eq!(
            next_event(&mut rx).await,
            OutboundEvent::status(4711, ThingStatus::Offline)
        );
        f.handler.handle_command("out", ChannelCommand::Off).await;
        next_event(&mut rx).await; // second offline
        assert!(mock.calls_of("write_state").is_empty());

        mock.fire_attach();
        // Attach produces an online status, then the replayed Off lands.
        loop {
            match next_event(&mut rx).await {
                OutboundEvent::StateUpdate { value, .. } => {
                    assert_eq!(value, ChannelValue::OnOff(false));
                    break;
                }
                OutboundEvent::StatusUpdate { .. } => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(mock.calls_of("write_state"), vec!["false"]);
    }

    #[tokio::test]
    async fn dispose_closes_and_evicts_all_channels() {
        let f = fixture(vec![
            definition("out", DeclaredChannelType::DigitalOutput, Some(0)),
            definition("vin", DeclaredChannelType::VoltageInput, Some(1)),
        ]);
        f.handler.initialize().await;
        let out = f.driver.channel_for(4711, ChannelKind::DigitalOutput, Some(0)).unwrap();
        let vin = f.driver.channel_for(4711, ChannelKind::VoltageInput, Some(1)).unwrap();

        f.handler.dispose().await;
        // Disposal runs on the registry worker; give it a turn.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(out.close_count(), 1);
        assert_eq!(vin.close_count(), 1);

        // Disposing again is a no-op.
        f.handler.dispose().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(out.close_count(), 1);
    }

    #[tokio::test]
    async fn command_for_channel_that_failed_setup_retries_resolution() {
        let f = fixture(vec![definition("late", DeclaredChannelType::AnalogInput, Some(0))]);
        f.handler.initialize().await;
        assert_eq!(f.driver.construct_count(), 0);

        // Still unresolvable on the command path.
        f.handler.handle_command("late", ChannelCommand::Refresh).await;
        assert_eq!(f.driver.construct_count(), 0);
    }

    #[tokio::test]
    async fn analog_input_with_ratio_sensor_constructs_ratio_handle() {
        let mut def = definition("analog", DeclaredChannelType::AnalogInput, Some(0));
        def.options = ChannelOptions::new().with_number(OPT_SENSOR_TYPE, 11060.0);
        let f = fixture(vec![def]);
        f.handler.initialize().await;
        assert!(f.driver.channel_for(4711, ChannelKind::VoltageRatioInput, Some(0)).is_some());
    }
}
