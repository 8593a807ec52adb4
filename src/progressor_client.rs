use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::constants::{
    CommandTag, CONTROL_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID, PROGRESSOR_SERVICE_UUID,
};
use crate::decoding::{BatteryInfo, ErrorInfo, FirmwareVersion, Response, WeightMeasurement};
use crate::dispatcher::{route, InfoReply, InfoRequest, PendingRequest, Route};
use crate::encoding::{encode_calibration_point, encode_command};
use crate::error::{Error, Result};
use crate::observers::{ConnectionState, Observers};
use crate::stream::StreamState;
use crate::transport::{
    Capability, Central, DisconnectStream, GattCharacteristic, NotificationStream, Peripheral,
};

/// Client for a single Tindeq Progressor.
///
/// Connect, disconnect and command writes are serialized per instance.
/// Weight samples, battery updates, errors and connection state changes are
/// pushed to single-slot callbacks registered with the `on_*` methods.
///
/// Only one info request (`get_battery_voltage`, `get_firmware_version`,
/// `get_error_info`) may be outstanding at a time. The protocol carries no
/// request id, so a reply is matched to whichever request is waiting; a
/// second request fails with [`Error::RequestInFlight`] until the first one
/// completes or times out.
pub struct ProgressorClient {
    central: Arc<dyn Central>,
    capability: Capability,
    config: ClientConfig,
    shared: Arc<Shared>,
    operation: tokio::sync::Mutex<()>,
}

/// State reachable from the notification and disconnect tasks.
#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    observers: Observers,
}

#[derive(Default)]
struct State {
    connection: ConnectionState,
    stream: StreamState,
    link: Option<Link>,
    pending: Option<PendingRequest>,
}

/// Transport handles owned between a connect and the next disconnect.
/// Filled in step by step during the handshake so a failure can release
/// exactly what was acquired.
#[derive(Default)]
struct Link {
    peripheral: Option<Arc<dyn Peripheral>>,
    disconnect_listener: Option<JoinHandle<()>>,
    opened: bool,
    data: Option<GattCharacteristic>,
    control: Option<GattCharacteristic>,
    subscribed: bool,
    notification_pump: Option<JoinHandle<()>>,
}

impl ProgressorClient {
    pub fn new(central: Arc<dyn Central>, capability: Capability) -> Self {
        Self::with_config(central, capability, ClientConfig::default())
    }

    pub fn with_config(
        central: Arc<dyn Central>,
        capability: Capability,
        config: ClientConfig,
    ) -> Self {
        Self {
            central,
            capability,
            config,
            shared: Arc::new(Shared::default()),
            operation: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether this client was built for a platform with BLE.
    pub fn is_supported(&self) -> bool {
        self.capability.is_available()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state().connection
    }

    pub fn stream_state(&self) -> StreamState {
        self.shared.state().stream
    }

    pub fn on_connection_state_change(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) {
        self.shared.observers.set_connection_state(Arc::new(callback));
    }

    pub fn on_weight(&self, callback: impl Fn(WeightMeasurement) + Send + Sync + 'static) {
        self.shared.observers.set_weight(Arc::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&Error) + Send + Sync + 'static) {
        self.shared.observers.set_error(Arc::new(callback));
    }

    pub fn on_battery(&self, callback: impl Fn(BatteryInfo) + Send + Sync + 'static) {
        self.shared.observers.set_battery(Arc::new(callback));
    }

    /// Find a Progressor, open the link and subscribe to its data
    /// characteristic.
    ///
    /// On failure every handle acquired so far is released, the client is
    /// back in [`ConnectionState::Disconnected`] and the error is also
    /// reported on the error callback.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn connect(&self) -> Result<()> {
        let _operation = self.operation.lock().await;
        {
            let mut state = self.shared.state();
            if state.connection != ConnectionState::Disconnected {
                return Err(Error::AlreadyConnected);
            }
            if !self.capability.is_available() {
                return Err(Error::UnsupportedEnvironment);
            }
            state.connection = ConnectionState::Connecting;
        }
        self.shared.set_connection_state(ConnectionState::Connecting);
        info!("Connecting to Progressor...");

        let mut link = Link::default();
        match self.establish(&mut link).await {
            Ok(()) => {
                {
                    let mut state = self.shared.state();
                    state.link = Some(link);
                    state.stream = StreamState::Idle;
                }
                self.shared.set_connection_state(ConnectionState::Connected);
                info!("Connected!");
                Ok(())
            }
            Err(error) => {
                warn!("Connection failed: {error}");
                link.release().await;
                self.shared.set_connection_state(ConnectionState::Disconnected);
                self.shared.observers.error(&error);
                Err(error)
            }
        }
    }

    async fn establish(&self, link: &mut Link) -> Result<()> {
        let filter = self.config.device_filter();
        let peripheral = self.central.select_peripheral(&filter).await?;
        debug!(id = %peripheral.id(), "Selected peripheral");
        link.peripheral = Some(Arc::clone(&peripheral));

        let events = peripheral.disconnect_events().await?;
        link.disconnect_listener = Some(tokio::spawn(listen_for_disconnect(
            Arc::clone(&self.shared),
            events,
        )));

        with_timeout("connect", self.config.connect_timeout, peripheral.connect()).await?;
        link.opened = true;

        debug!("Discovering services...");
        let services = with_timeout(
            "discover services",
            self.config.discovery_timeout,
            peripheral.discover_services(),
        )
        .await?;
        if !services.contains(&PROGRESSOR_SERVICE_UUID) {
            return Err(Error::ServiceNotFound(PROGRESSOR_SERVICE_UUID));
        }

        let data = with_timeout(
            "resolve data characteristic",
            self.config.discovery_timeout,
            peripheral.characteristic(PROGRESSOR_SERVICE_UUID, DATA_CHARACTERISTIC_UUID),
        )
        .await?;
        link.data = Some(data);
        let control = with_timeout(
            "resolve control characteristic",
            self.config.discovery_timeout,
            peripheral.characteristic(PROGRESSOR_SERVICE_UUID, CONTROL_CHARACTERISTIC_UUID),
        )
        .await?;
        link.control = Some(control);

        with_timeout(
            "subscribe",
            self.config.write_timeout,
            peripheral.subscribe(&data),
        )
        .await?;
        link.subscribed = true;

        let notifications = peripheral.notifications(&data).await?;
        link.notification_pump = Some(tokio::spawn(pump_notifications(
            Arc::clone(&self.shared),
            notifications,
        )));
        Ok(())
    }

    /// Stop streaming if needed, close the link and release every handle.
    /// A no-op when already disconnected.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn disconnect(&self) -> Result<()> {
        let _operation = self.operation.lock().await;
        let stream = {
            let mut state = self.shared.state();
            if state.connection == ConnectionState::Disconnected {
                return Ok(());
            }
            state.connection = ConnectionState::Disconnecting;
            state.stream
        };
        self.shared.set_connection_state(ConnectionState::Disconnecting);
        info!("Disconnecting from Progressor...");

        if stream.is_active() {
            // Best effort; the link is closed regardless.
            if let Err(error) = self
                .send(&encode_command(CommandTag::StopWeightMeasurement, &[]))
                .await
            {
                warn!("Could not stop streaming before disconnect: {error}");
            }
        }

        let (link, pending) = {
            let mut state = self.shared.state();
            state.stream = StreamState::Idle;
            (state.link.take(), state.pending.take())
        };
        if let Some(pending) = pending {
            pending.fail(Error::NotConnected);
        }
        if let Some(link) = link {
            link.release().await;
        }

        self.shared.set_connection_state(ConnectionState::Disconnected);
        info!("Disconnected");
        Ok(())
    }

    /// Zero the load cell.
    pub async fn tare(&self) -> Result<()> {
        self.command(CommandTag::Tare).await
    }

    pub async fn start_streaming(&self) -> Result<()> {
        let _operation = self.operation.lock().await;
        {
            let state = self.shared.state();
            if state.connection != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            state.stream.check_start()?;
        }

        self.send(&encode_command(CommandTag::StartWeightMeasurement, &[]))
            .await?;
        self.shared.set_stream_state(StreamState::Streaming);
        Ok(())
    }

    /// Stop forwarding samples without telling the device.
    pub fn pause_streaming(&self) -> Result<()> {
        self.shared.state().stream.pause()?;
        debug!("Streaming paused");
        Ok(())
    }

    /// Forward samples again. Samples dropped while paused are not replayed.
    pub fn resume_streaming(&self) -> Result<()> {
        self.shared.state().stream.resume()?;
        debug!("Streaming resumed");
        Ok(())
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        let _operation = self.operation.lock().await;
        if !self.shared.state().stream.is_active() {
            return Ok(());
        }

        self.send(&encode_command(CommandTag::StopWeightMeasurement, &[]))
            .await?;
        self.shared.set_stream_state(StreamState::Idle);
        Ok(())
    }

    /// Start a peak rate-of-force-development measurement.
    pub async fn start_peak_rfd(&self) -> Result<()> {
        self.command(CommandTag::StartPeakRfdMeasurement).await
    }

    pub async fn start_peak_rfd_series(&self) -> Result<()> {
        self.command(CommandTag::StartPeakRfdMeasurementSeries).await
    }

    /// Record a calibration point for a known reference load.
    pub async fn add_calibration_point(&self, reference_kg: f32) -> Result<()> {
        let _operation = self.operation.lock().await;
        self.shared.ensure_connected()?;
        self.send(&encode_calibration_point(reference_kg)).await
    }

    pub async fn save_calibration(&self) -> Result<()> {
        self.command(CommandTag::SaveCalibration).await
    }

    pub async fn clear_error_info(&self) -> Result<()> {
        self.command(CommandTag::ClearErrorInfo).await
    }

    /// Put the device to sleep. The device drops the link afterwards, which
    /// arrives as an unsolicited disconnect.
    pub async fn enter_sleep(&self) -> Result<()> {
        self.command(CommandTag::Sleep).await
    }

    /// Ask for the battery voltage. The reading is also pushed to the battery
    /// callback.
    pub async fn get_battery_voltage(&self) -> Result<BatteryInfo> {
        self.request(InfoRequest::Battery, CommandTag::GetBatteryVoltage)
            .await?
            .into_battery()
    }

    pub async fn get_firmware_version(&self) -> Result<FirmwareVersion> {
        self.request(InfoRequest::Firmware, CommandTag::GetAppVersion)
            .await?
            .into_firmware()
    }

    pub async fn get_error_info(&self) -> Result<ErrorInfo> {
        self.request(InfoRequest::ErrorInfo, CommandTag::GetErrorInfo)
            .await?
            .into_error_info()
    }

    async fn command(&self, tag: CommandTag) -> Result<()> {
        let _operation = self.operation.lock().await;
        self.shared.ensure_connected()?;
        self.send(&encode_command(tag, &[])).await
    }

    /// Install the one-shot slot, write the query and wait for the reply.
    async fn request(&self, kind: InfoRequest, tag: CommandTag) -> Result<InfoReply> {
        let reply = {
            let _operation = self.operation.lock().await;
            let reply = {
                let mut state = self.shared.state();
                if state.connection != ConnectionState::Connected {
                    return Err(Error::NotConnected);
                }
                if let Some(pending) = &state.pending {
                    return Err(Error::RequestInFlight(pending.kind.name()));
                }
                let (pending, reply) = PendingRequest::new(kind);
                state.pending = Some(pending);
                reply
            };

            if let Err(error) = self.send(&encode_command(tag, &[])).await {
                self.shared.state().pending = None;
                return Err(error);
            }
            reply
        };

        let duration = self.config.response_timeout;
        match timeout(duration, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::DeviceDisconnected),
            Err(_) => {
                self.shared.clear_abandoned_request();
                Err(Error::Timeout {
                    operation: kind.name(),
                    duration,
                })
            }
        }
    }

    /// Write one encoded frame to the control characteristic. Transport
    /// failures are also reported on the error callback.
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let (peripheral, control) = self.shared.control()?;
        trace!("Writing command: {:02x?}", frame);

        let result = with_timeout(
            "write command",
            self.config.write_timeout,
            peripheral.write(&control, frame),
        )
        .await;
        if let Err(error) = &result {
            self.shared.observers.error(error);
        }
        result
    }
}

impl Drop for ProgressorClient {
    fn drop(&mut self) {
        if let Some(link) = self.shared.state().link.take() {
            link.abort_tasks();
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_connection_state(&self, connection: ConnectionState) {
        {
            let mut state = self.state();
            state.connection = connection;
            if connection != ConnectionState::Connected {
                state.stream = StreamState::Idle;
            }
        }
        self.observers.connection_state(connection);
    }

    /// Only applies while connected; a disconnect that raced the write wins.
    fn set_stream_state(&self, stream: StreamState) {
        let mut state = self.state();
        if state.connection == ConnectionState::Connected {
            state.stream = stream;
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state().connection {
            ConnectionState::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    fn control(&self) -> Result<(Arc<dyn Peripheral>, GattCharacteristic)> {
        let state = self.state();
        let link = state.link.as_ref().ok_or(Error::NotConnected)?;
        match (&link.peripheral, link.control) {
            (Some(peripheral), Some(control)) => Ok((Arc::clone(peripheral), control)),
            _ => Err(Error::NotConnected),
        }
    }

    fn clear_abandoned_request(&self) {
        self.state().clear_abandoned_request();
    }

    /// Decode one notification and route it. Runs on the notification task,
    /// one frame at a time.
    fn handle_notification(&self, value: &[u8]) {
        let response = match Response::try_from(value) {
            Ok(response) => response,
            Err(error) => {
                warn!("Failed to decode notification {:02x?}: {error}", value);
                self.observers.error(&error);
                return;
            }
        };
        response.log();

        let (routed, pending) = self.state().route(response);

        match routed {
            Ok(Route::Deliver(batch)) => self.observers.weights(&batch),
            Ok(Route::Discard(count)) => trace!(count, "Dropped samples while not streaming"),
            Ok(Route::Resolve(reply)) => {
                let battery = match &reply {
                    InfoReply::Battery(info) => Some(*info),
                    _ => None,
                };
                if let Some(pending) = pending {
                    debug!("Resolved {} request", pending.kind.name());
                    pending.resolve(reply);
                }
                if let Some(info) = battery {
                    self.observers.battery(info);
                }
            }
            Ok(Route::Battery(info)) => self.observers.battery(info),
            Ok(Route::Warning(error)) => self.observers.error(&error),
            Ok(Route::Ignore) => {}
            Err(error) => self.observers.error(&error),
        }
    }

    /// Peripheral dropped the link. Returns true once the event was acted on.
    async fn handle_unsolicited_disconnect(&self) -> bool {
        let (link, pending) = {
            let mut state = self.state();
            if state.connection != ConnectionState::Connected {
                debug!("Ignoring disconnect event while {:?}", state.connection);
                return false;
            }
            state.connection = ConnectionState::Disconnected;
            state.stream = StreamState::Idle;
            (state.link.take(), state.pending.take())
        };
        warn!("Progressor disconnected unexpectedly");

        if let Some(pending) = pending {
            pending.fail(Error::DeviceDisconnected);
        }
        if let Some(link) = link {
            link.release().await;
        }

        self.observers
            .connection_state(ConnectionState::Disconnected);
        self.observers.error(&Error::DeviceDisconnected);
        true
    }
}

impl State {
    /// Route one response against the current stream state and request slot.
    /// A request the response resolves is taken out of the slot under the
    /// same lock, so it is always the one the reply was shaped for.
    fn route(&mut self, response: Response) -> (Result<Route>, Option<PendingRequest>) {
        self.clear_abandoned_request();

        let routed = route(response, self.stream, self.pending.as_ref().map(|p| p.kind));
        let pending = match &routed {
            Ok(Route::Resolve(_)) => self.pending.take(),
            _ => None,
        };
        (routed, pending)
    }

    fn clear_abandoned_request(&mut self) {
        if self
            .pending
            .as_ref()
            .is_some_and(PendingRequest::is_abandoned)
        {
            self.pending = None;
        }
    }
}

impl Link {
    /// Undo the handshake: stop the notification task, unsubscribe and close
    /// the link if it is still up, then drop the disconnect listener.
    async fn release(mut self) {
        if let Some(pump) = self.notification_pump.take() {
            pump.abort();
        }

        if let Some(peripheral) = self.peripheral.take() {
            if self.opened && peripheral.is_connected().await {
                if let (true, Some(data)) = (self.subscribed, self.data.as_ref()) {
                    if let Err(error) = peripheral.unsubscribe(data).await {
                        warn!("Failed to unsubscribe: {error}");
                    }
                }
                if let Err(error) = peripheral.disconnect().await {
                    warn!("Failed to close link: {error}");
                }
            }
        }

        // Last: on the unsolicited path this is the task running release().
        if let Some(listener) = self.disconnect_listener.take() {
            listener.abort();
        }
    }

    fn abort_tasks(mut self) {
        if let Some(pump) = self.notification_pump.take() {
            pump.abort();
        }
        if let Some(listener) = self.disconnect_listener.take() {
            listener.abort();
        }
    }
}

async fn pump_notifications(shared: Arc<Shared>, mut notifications: NotificationStream) {
    while let Some(value) = notifications.next().await {
        shared.handle_notification(&value);
    }
    debug!("Notification stream ended");
}

async fn listen_for_disconnect(shared: Arc<Shared>, mut events: DisconnectStream) {
    while events.next().await.is_some() {
        if shared.handle_unsolicited_disconnect().await {
            break;
        }
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            duration,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery_reply() -> Response {
        Response::CommandResponse(4200u16.to_le_bytes().to_vec())
    }

    #[test]
    fn resolving_takes_the_request_the_reply_was_routed_for() {
        let (pending, _reply) = PendingRequest::new(InfoRequest::Battery);
        let mut state = State {
            pending: Some(pending),
            ..State::default()
        };

        let (routed, taken) = state.route(battery_reply());

        assert!(matches!(routed, Ok(Route::Resolve(InfoReply::Battery(_)))));
        assert_eq!(taken.map(|p| p.kind), Some(InfoRequest::Battery));
        assert!(state.pending.is_none());
    }

    #[test]
    fn reply_never_reaches_a_request_of_another_kind() {
        let (pending, _reply) = PendingRequest::new(InfoRequest::Firmware);
        let mut state = State {
            pending: Some(pending),
            ..State::default()
        };

        let (routed, taken) = state.route(battery_reply());

        assert!(matches!(routed, Ok(Route::Ignore)));
        assert!(taken.is_none());
        assert_eq!(state.pending.as_ref().map(|p| p.kind), Some(InfoRequest::Firmware));
    }

    #[test]
    fn abandoned_request_is_dropped_before_routing() {
        let (pending, reply) = PendingRequest::new(InfoRequest::Battery);
        drop(reply);
        let mut state = State {
            pending: Some(pending),
            ..State::default()
        };

        let (routed, taken) = state.route(battery_reply());

        assert!(matches!(routed, Ok(Route::Battery(info)) if info.percentage == 100));
        assert!(taken.is_none());
        assert!(state.pending.is_none());
    }
}
