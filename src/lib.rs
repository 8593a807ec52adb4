//! Client for the Tindeq Progressor force gauge over Bluetooth LE.
//!
//! ```no_run
//! # async fn demo() -> rust_tindeq::Result<()> {
//! use std::sync::Arc;
//! use rust_tindeq::{ProgressorClient, ProgressorScanner};
//!
//! let capability = ProgressorScanner::probe().await;
//! let scanner = Arc::new(ProgressorScanner::new().await?);
//! let client = ProgressorClient::new(scanner, capability);
//!
//! client.on_weight(|m| println!("{:.2} kg @ {} ms", m.weight, m.timestamp));
//! client.connect().await?;
//! client.tare().await?;
//! client.start_streaming().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod decoding;
pub(crate) mod dispatcher;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod mock;
pub mod observers;
pub mod progressor_client;
pub mod progressor_scanner;
pub mod stream;
pub mod transport;

pub use config::ClientConfig;
pub use decoding::{BatteryInfo, ErrorInfo, FirmwareVersion, WeightMeasurement};
pub use error::{Error, Result};
pub use observers::ConnectionState;
pub use progressor_client::ProgressorClient;
pub use progressor_scanner::ProgressorScanner;
pub use stream::StreamState;
pub use transport::Capability;
