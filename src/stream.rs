use crate::error::{Error, Result};

/// Whether weight samples reach the consumer.
///
/// Pause and resume are a client-side gate: the device keeps streaming, and
/// samples arriving while paused are dropped, not buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    Paused,
}

impl StreamState {
    pub(crate) fn check_start(self) -> Result<()> {
        match self {
            StreamState::Idle => Ok(()),
            StreamState::Streaming | StreamState::Paused => Err(Error::AlreadyStreaming),
        }
    }

    pub(crate) fn pause(&mut self) -> Result<()> {
        match self {
            StreamState::Streaming => {
                *self = StreamState::Paused;
                Ok(())
            }
            _ => Err(Error::NotStreaming),
        }
    }

    pub(crate) fn resume(&mut self) -> Result<()> {
        match self {
            StreamState::Paused => {
                *self = StreamState::Streaming;
                Ok(())
            }
            _ => Err(Error::NotPaused),
        }
    }

    pub fn is_active(self) -> bool {
        self != StreamState::Idle
    }

    pub fn forwards_samples(self) -> bool {
        self == StreamState::Streaming
    }
}
