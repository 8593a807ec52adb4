//! Error types for the Progressor client.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the codec, the connection state machine and the
/// transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No usable Bluetooth adapter on this platform.
    #[error("Bluetooth is not supported on this platform")]
    UnsupportedEnvironment,

    #[error("Already connected or connecting")]
    AlreadyConnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Already streaming")]
    AlreadyStreaming,

    #[error("Not currently streaming")]
    NotStreaming,

    #[error("Not currently paused")]
    NotPaused,

    /// The peripheral dropped the link without being asked to.
    #[error("Device disconnected")]
    DeviceDisconnected,

    #[error("Response too short: expected at least 2 bytes, got {actual}")]
    FrameTooShort { actual: usize },

    #[error("Response data incomplete: declared {declared} payload bytes, got {available}")]
    FrameIncomplete { declared: usize, available: usize },

    #[error("Invalid {what} data length: {actual} bytes")]
    InvalidLength { what: &'static str, actual: usize },

    /// Underlying link failure.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No Progressor found within {0:?}")]
    DeviceNotFound(Duration),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// Another info request is still waiting for its reply.
    #[error("A {0} request is already in flight")]
    RequestInFlight(&'static str),

    /// A reply was matched to a request of another kind.
    #[error("Received a reply that does not answer the {0} request")]
    UnexpectedReply(&'static str),

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// Warning pushed by the device, delivered on the error channel.
    #[error("Low battery warning")]
    LowBattery,
}

impl Error {
    /// True for wrong-state errors raised before anything touches the link.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedEnvironment
                | Error::AlreadyConnected
                | Error::NotConnected
                | Error::AlreadyStreaming
                | Error::NotStreaming
                | Error::NotPaused
                | Error::RequestInFlight(_)
        )
    }
}

impl From<btleplug::Error> for Error {
    fn from(error: btleplug::Error) -> Self {
        Error::Transport(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
