//! The GATT seam between [`crate::ProgressorClient`] and a BLE stack.
//!
//! [`crate::progressor_scanner`] implements these traits over btleplug and
//! [`crate::mock`] implements them in memory.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::config::DeviceFilter;
use crate::error::Result;

/// Raw characteristic values pushed by the peripheral.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Yields once each time the peripheral drops the link.
pub type DisconnectStream = Pin<Box<dyn Stream<Item = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Whether the platform can do BLE at all. Decided once and handed to the
/// client at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Available,
    Unavailable,
}

impl Capability {
    pub fn is_available(self) -> bool {
        self == Capability::Available
    }
}

#[async_trait]
pub trait Central: Send + Sync {
    /// Scan until a peripheral matching `filter` shows up.
    async fn select_peripheral(&self, filter: &DeviceFilter) -> Result<Arc<dyn Peripheral>>;
}

#[async_trait]
pub trait Peripheral: Send + Sync {
    fn id(&self) -> String;

    /// Register interest in peripheral-initiated disconnects. Dropping the
    /// stream unregisters it.
    async fn disconnect_events(&self) -> Result<DisconnectStream>;

    async fn connect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Discover services and return their UUIDs.
    async fn discover_services(&self) -> Result<Vec<Uuid>>;

    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<GattCharacteristic>;

    async fn subscribe(&self, characteristic: &GattCharacteristic) -> Result<()>;

    async fn unsubscribe(&self, characteristic: &GattCharacteristic) -> Result<()>;

    /// Notifications for one characteristic, in arrival order.
    async fn notifications(&self, characteristic: &GattCharacteristic)
        -> Result<NotificationStream>;

    async fn write(&self, characteristic: &GattCharacteristic, value: &[u8]) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
