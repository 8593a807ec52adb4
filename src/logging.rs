use tracing_subscriber::EnvFilter;

use crate::decoding::Response;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A subscriber may already be installed by an embedding application.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

impl Response {
    pub(crate) fn log(&self) {
        match self {
            Response::CommandResponse(payload) => {
                tracing::trace!(len = payload.len(), "command response: {:02x?}", payload)
            }
            Response::Weight(batch) => match batch.last() {
                Some(latest) => tracing::trace!(
                    count = batch.len(),
                    "weight batch, latest {} kg at {} ms",
                    latest.weight,
                    latest.timestamp
                ),
                None => tracing::trace!("empty weight batch"),
            },
            Response::RfdPeak(payload) => tracing::debug!("RFD peak: {:02x?}", payload),
            Response::RfdPeakSeries(payload) => {
                tracing::debug!("RFD peak series: {:02x?}", payload)
            }
            Response::LowBatteryWarning => tracing::warn!("low battery warning"),
            Response::Unknown { tag, payload } => {
                tracing::warn!(tag, "unknown response tag, payload: {:02x?}", payload)
            }
        }
    }
}
