use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PeripheralStruct};
use futures::stream::{Stream, StreamExt};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DeviceFilter;
use crate::error::{Error, Result};
use crate::transport::{
    Capability, Central, DisconnectStream, GattCharacteristic, NotificationStream, Peripheral,
};

/// btleplug-backed [`Central`]: scans the first adapter for a Progressor.
pub struct ProgressorScanner {
    manager: Manager,
}

impl ProgressorScanner {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    /// Probe once for a usable adapter.
    pub async fn probe() -> Capability {
        let Ok(manager) = Manager::new().await else {
            return Capability::Unavailable;
        };
        match manager.adapters().await {
            Ok(adapters) if !adapters.is_empty() => Capability::Available,
            _ => Capability::Unavailable,
        }
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::UnsupportedEnvironment)
    }

    async fn create_progressor_stream(
        &self,
        central: Arc<Adapter>,
        filter: DeviceFilter,
    ) -> Result<Pin<Box<dyn Stream<Item = PeripheralStruct> + Send>>> {
        let events = central.events().await?;
        let stream = events.filter_map(move |event| {
            let central = Arc::clone(&central);
            let filter = filter.clone();

            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let peripheral = central.peripheral(&id).await.ok()?;
                        Self::is_progressor(&peripheral, &filter)
                            .await
                            .then_some(peripheral)
                    }
                    _ => None,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn is_progressor(peripheral: &PeripheralStruct, filter: &DeviceFilter) -> bool {
        peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .is_some_and(|props| filter.matches(props.local_name.as_deref(), &props.services))
    }

    async fn find_known(central: &Adapter, filter: &DeviceFilter) -> Result<Option<PeripheralStruct>> {
        for peripheral in central.peripherals().await? {
            if Self::is_progressor(&peripheral, filter).await {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Central for ProgressorScanner {
    async fn select_peripheral(&self, filter: &DeviceFilter) -> Result<Arc<dyn Peripheral>> {
        let central = Arc::new(self.adapter().await?);
        central.start_scan(ScanFilter::default()).await?;
        info!("Scanning for {}...", filter.name_prefix);

        let found = match Self::find_known(&central, filter).await? {
            Some(peripheral) => Some(peripheral),
            None => {
                let mut progressors = self
                    .create_progressor_stream(Arc::clone(&central), filter.clone())
                    .await?;
                timeout(filter.timeout, progressors.next())
                    .await
                    .ok()
                    .flatten()
            }
        };

        if let Err(error) = central.stop_scan().await {
            warn!("Failed to stop scan: {error}");
        }

        let peripheral = found.ok_or(Error::DeviceNotFound(filter.timeout))?;
        Ok(Arc::new(ProgressorPeripheral::new(central, peripheral)))
    }
}

/// btleplug-backed [`Peripheral`].
pub struct ProgressorPeripheral {
    central: Arc<Adapter>,
    peripheral: PeripheralStruct,
}

impl ProgressorPeripheral {
    pub fn new(central: Arc<Adapter>, peripheral: PeripheralStruct) -> Self {
        Self {
            central,
            peripheral,
        }
    }

    fn find_characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service)
            .ok_or(Error::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl Peripheral for ProgressorPeripheral {
    fn id(&self) -> String {
        format!("{:?}", self.peripheral.id())
            .trim_start_matches("PeripheralId(")
            .trim_end_matches(')')
            .to_string()
    }

    async fn disconnect_events(&self) -> Result<DisconnectStream> {
        let mut events = self.central.events().await?;
        let id = self.peripheral.id();

        Ok(Box::pin(stream! {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event {
                    if disconnected == id {
                        yield ();
                    }
                }
            }
        }))
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match timeout(Duration::from_millis(200), self.peripheral.is_connected()).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(_)) => false,
            Err(_) => false,
        }
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        self.peripheral.discover_services().await?;
        let services = self.peripheral.services();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
            }
        }
        Ok(services.into_iter().map(|service| service.uuid).collect())
    }

    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<GattCharacteristic> {
        let characteristic = self.find_characteristic(service, uuid)?;
        Ok(GattCharacteristic {
            service: characteristic.service_uuid,
            uuid: characteristic.uuid,
        })
    }

    async fn subscribe(&self, characteristic: &GattCharacteristic) -> Result<()> {
        let characteristic =
            self.find_characteristic(characteristic.service, characteristic.uuid)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &GattCharacteristic) -> Result<()> {
        let characteristic =
            self.find_characteristic(characteristic.service, characteristic.uuid)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream> {
        let uuid = characteristic.uuid;
        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.filter_map(move |notification| async move {
            (notification.uuid == uuid).then_some(notification.value)
        })))
    }

    async fn write(&self, characteristic: &GattCharacteristic, value: &[u8]) -> Result<()> {
        let characteristic =
            self.find_characteristic(characteristic.service, characteristic.uuid)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
