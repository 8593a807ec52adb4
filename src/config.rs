//! Client configuration.

use std::time::Duration;

use uuid::Uuid;

use crate::constants::{DEVICE_NAME_PREFIX, PROGRESSOR_SERVICE_UUID};

/// Timeouts and device selection for a [`crate::ProgressorClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to scan for a matching peripheral.
    pub scan_timeout: Duration,
    /// Timeout for opening the link.
    pub connect_timeout: Duration,
    /// Timeout for service and characteristic resolution.
    pub discovery_timeout: Duration,
    /// Timeout for a single control write.
    pub write_timeout: Duration,
    /// How long a one-shot info request waits for its reply.
    pub response_timeout: Duration,
    /// Advertised name prefix that identifies a Progressor.
    pub name_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            name_prefix: DEVICE_NAME_PREFIX.to_string(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub(crate) fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            name_prefix: self.name_prefix.clone(),
            service: PROGRESSOR_SERVICE_UUID,
            timeout: self.scan_timeout,
        }
    }
}

/// What a [`crate::transport::Central`] should look for when selecting a
/// peripheral. A peripheral matches on name prefix or advertised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub name_prefix: String,
    pub service: Uuid,
    pub timeout: Duration,
}

impl DeviceFilter {
    pub fn matches(&self, local_name: Option<&str>, services: &[Uuid]) -> bool {
        local_name.is_some_and(|name| name.starts_with(&self.name_prefix))
            || services.contains(&self.service)
    }
}
