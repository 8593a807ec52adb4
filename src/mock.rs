//! In-memory Progressor for tests and the `--simulate` demo.
//!
//! [`MockPeripheral`] implements [`Peripheral`] without any BLE hardware:
//!
//! - **Failure injection**: fail a chosen handshake step or every write
//! - **Scripted replies**: frames emitted right after a given command is written
//! - **Event injection**: push raw notifications or drop the link from the
//!   peripheral side
//! - **Simulated hang**: weight batches following a realistic pull while the
//!   start command is in effect

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::channel::mpsc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DeviceFilter;
use crate::constants::{CommandTag, ResponseTag, PROGRESSOR_SERVICE_UUID, WEIGHT_RECORD_LEN};
use crate::decoding::WeightMeasurement;
use crate::error::{Error, Result};
use crate::transport::{
    Central, DisconnectStream, GattCharacteristic, NotificationStream, Peripheral,
};

/// Hands out one shared [`MockPeripheral`].
pub struct MockCentral {
    peripheral: Arc<MockPeripheral>,
    absent: AtomicBool,
}

impl MockCentral {
    pub fn new(peripheral: Arc<MockPeripheral>) -> Self {
        Self {
            peripheral,
            absent: AtomicBool::new(false),
        }
    }

    /// Make the next scans find nothing.
    pub fn set_absent(&self, absent: bool) {
        self.absent.store(absent, Ordering::SeqCst);
    }
}

#[async_trait]
impl Central for MockCentral {
    async fn select_peripheral(&self, filter: &DeviceFilter) -> Result<Arc<dyn Peripheral>> {
        if self.absent.load(Ordering::SeqCst) || !filter.matches(Some(&self.peripheral.name), &[]) {
            return Err(Error::DeviceNotFound(filter.timeout));
        }
        Ok(Arc::clone(&self.peripheral) as Arc<dyn Peripheral>)
    }
}

/// Handshake steps that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    Connect,
    DiscoverServices,
    Characteristic,
    Subscribe,
    Write,
}

pub struct MockPeripheral {
    name: String,
    services: Mutex<Vec<Uuid>>,
    fail_at: Mutex<Option<MockStep>>,
    connected: AtomicBool,
    subscribed: AtomicBool,
    streaming: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    replies: Mutex<HashMap<u8, Vec<Vec<u8>>>>,
    notifications: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    disconnects: broadcast::Sender<()>,
}

impl std::fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("name", &self.name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("streaming", &self.streaming.load(Ordering::Relaxed))
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPeripheral {
    pub fn new(name: &str) -> Self {
        let (disconnects, _) = broadcast::channel(4);
        Self {
            name: name.to_string(),
            services: Mutex::new(vec![PROGRESSOR_SERVICE_UUID]),
            fail_at: Mutex::new(None),
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            notifications: Mutex::new(None),
            disconnects,
        }
    }

    /// A device that answers battery (3850 mV) and firmware (2.0.4) queries.
    pub fn progressor() -> Self {
        let device = Self::new("Progressor_7125");
        device.reply_to(
            CommandTag::GetBatteryVoltage,
            command_response(&3850u16.to_le_bytes()),
        );
        device.reply_to(CommandTag::GetAppVersion, command_response(&[2, 0, 4]));
        device.reply_to(CommandTag::GetErrorInfo, command_response(b"no errors"));
        device
    }

    pub fn fail_at(&self, step: Option<MockStep>) {
        *lock(&self.fail_at) = step;
    }

    pub fn set_services(&self, services: Vec<Uuid>) {
        *lock(&self.services) = services;
    }

    /// Emit `frame` every time a command with `tag` is written.
    pub fn reply_to(&self, tag: CommandTag, frame: Vec<u8>) {
        lock(&self.replies).entry(tag.into()).or_default().push(frame);
    }

    /// Push a raw notification. Returns false if nobody is subscribed.
    pub fn emit(&self, value: Vec<u8>) -> bool {
        match lock(&self.notifications).as_ref() {
            Some(sender) => sender.unbounded_send(value).is_ok(),
            None => false,
        }
    }

    pub fn emit_weights(&self, batch: &[WeightMeasurement]) -> bool {
        self.emit(weight_frame(batch))
    }

    /// Drop the link from the peripheral side.
    pub fn drop_link(&self) {
        self.close();
        let _ = self.disconnects.send(());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    pub fn written_tags(&self) -> Vec<u8> {
        lock(&self.writes).iter().map(|frame| frame[0]).collect()
    }

    pub fn is_link_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Whether the last start/stop command written was a start.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Emit a [`HangProfile`] batch every `interval` while streaming.
    pub fn simulate_hang(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let device = Arc::clone(self);
        tokio::spawn(async move {
            let mut profile = HangProfile::new(interval);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if device.is_streaming() {
                    device.emit_weights(&profile.next_batch());
                }
            }
        })
    }

    fn check(&self, step: MockStep) -> Result<()> {
        match *lock(&self.fail_at) {
            Some(failing) if failing == step => {
                Err(Error::Transport(format!("mock failure at {step:?}")))
            }
            _ => Ok(()),
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribed.store(false, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        lock(&self.notifications).take();
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn id(&self) -> String {
        self.name.clone()
    }

    async fn disconnect_events(&self) -> Result<DisconnectStream> {
        let mut events = self.disconnects.subscribe();
        Ok(Box::pin(stream! {
            loop {
                match events.recv().await {
                    Ok(()) => yield (),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn connect(&self) -> Result<()> {
        self.check(MockStep::Connect)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.is_link_open()
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        self.check(MockStep::DiscoverServices)?;
        Ok(lock(&self.services).clone())
    }

    async fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<GattCharacteristic> {
        if self.check(MockStep::Characteristic).is_err() {
            return Err(Error::CharacteristicNotFound(uuid));
        }
        Ok(GattCharacteristic { service, uuid })
    }

    async fn subscribe(&self, _characteristic: &GattCharacteristic) -> Result<()> {
        self.check(MockStep::Subscribe)?;
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: &GattCharacteristic) -> Result<()> {
        self.subscribed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn notifications(
        &self,
        _characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream> {
        let (sender, receiver) = mpsc::unbounded();
        *lock(&self.notifications) = Some(sender);
        Ok(Box::pin(receiver))
    }

    async fn write(&self, _characteristic: &GattCharacteristic, value: &[u8]) -> Result<()> {
        if !self.is_link_open() {
            return Err(Error::Transport("mock link is closed".into()));
        }
        self.check(MockStep::Write)?;
        lock(&self.writes).push(value.to_vec());

        let tag = value.first().copied().unwrap_or_default();
        if tag == u8::from(CommandTag::StartWeightMeasurement) {
            self.streaming.store(true, Ordering::SeqCst);
        } else if tag == u8::from(CommandTag::StopWeightMeasurement) {
            self.streaming.store(false, Ordering::SeqCst);
        }

        let replies = lock(&self.replies).get(&tag).cloned().unwrap_or_default();
        for reply in replies {
            self.emit(reply);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.close();
        // Like a real stack, a requested disconnect is announced too.
        let _ = self.disconnects.send(());
        Ok(())
    }
}

/// Weight notification frame for `batch`. A frame holds at most 31 samples.
pub fn weight_frame(batch: &[WeightMeasurement]) -> Vec<u8> {
    let length = u8::try_from(batch.len() * WEIGHT_RECORD_LEN)
        .expect("weight batch does not fit in one frame");
    let mut frame = vec![ResponseTag::WeightMeasurement.into(), length];
    for measurement in batch {
        frame.extend_from_slice(&measurement.weight.to_le_bytes());
        frame.extend_from_slice(&measurement.timestamp.to_le_bytes());
    }
    frame
}

/// Generic command response frame carrying `payload`.
pub fn command_response(payload: &[u8]) -> Vec<u8> {
    let length = u8::try_from(payload.len()).expect("payload does not fit in one frame");
    let mut frame = vec![ResponseTag::CommandResponse.into(), length];
    frame.extend_from_slice(payload);
    frame
}

/// A simulated hang: ramp up over 1s, hold around 30 kg until 5s, release by
/// 6s, then rest near zero.
///
/// Time is the device clock, so batches stay contiguous regardless of how
/// late a tick fires.
pub struct HangProfile {
    spacing_ms: u32,
    next_timestamp: u32,
}

impl HangProfile {
    pub const BATCH_LEN: usize = 15;

    /// Samples are spaced so that one batch covers `batch_interval`.
    pub fn new(batch_interval: Duration) -> Self {
        let spacing_ms = (batch_interval.as_millis() / Self::BATCH_LEN as u128).max(1) as u32;
        Self {
            spacing_ms,
            next_timestamp: 0,
        }
    }

    /// Weight at `t` seconds into the hang; `noise` is in `[0, 1)`.
    pub fn weight_at(t: f32, noise: f32) -> f32 {
        let weight = if t < 1.0 {
            t * 30.0
        } else if t < 5.0 {
            30.0 + (t * 5.0).sin() * 5.0 + noise * 2.0
        } else if t < 6.0 {
            30.0 * (1.0 - (t - 5.0))
        } else {
            noise * 0.5
        };
        weight.max(0.0)
    }

    pub fn next_batch(&mut self) -> Vec<WeightMeasurement> {
        (0..Self::BATCH_LEN)
            .map(|_| {
                let timestamp = self.next_timestamp;
                self.next_timestamp += self.spacing_ms;
                WeightMeasurement {
                    weight: Self::weight_at(timestamp as f32 / 1000.0, rand::random::<f32>()),
                    timestamp,
                }
            })
            .collect()
    }
}

impl Default for HangProfile {
    fn default() -> Self {
        Self::new(Duration::from_millis(150))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::decoding::{decode_frame, parse_weight_batch};

    #[test]
    fn hang_profile_shape() {
        assert_eq!(HangProfile::weight_at(0.0, 0.5), 0.0);
        assert_eq!(HangProfile::weight_at(0.5, 0.5), 15.0);
        let hold = HangProfile::weight_at(3.0, 0.5);
        assert!((24.0..=37.0).contains(&hold));
        assert!(HangProfile::weight_at(5.5, 0.0) < 16.0);
        assert!(HangProfile::weight_at(10.0, 0.99) < 0.5);
    }

    #[test]
    fn batches_are_ordered_and_decodable() {
        let mut profile = HangProfile::default();
        let batch = profile.next_batch();
        assert_eq!(batch.len(), HangProfile::BATCH_LEN);
        assert!(batch.windows(2).all(|w| w[1].timestamp - w[0].timestamp == 10));
        assert_eq!(profile.next_batch()[0].timestamp, 150);

        let frame = weight_frame(&batch);
        let decoded = parse_weight_batch(decode_frame(&frame).unwrap().payload).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn largest_batch_fills_one_frame() {
        let batch = vec![
            WeightMeasurement {
                weight: 1.0,
                timestamp: 0,
            };
            31
        ];
        assert_eq!(weight_frame(&batch)[1], 248);
    }

    #[test]
    #[should_panic(expected = "weight batch does not fit in one frame")]
    fn oversized_batch_is_refused() {
        let batch = vec![
            WeightMeasurement {
                weight: 1.0,
                timestamp: 0,
            };
            32
        ];
        weight_frame(&batch);
    }

    #[tokio::test]
    async fn write_triggers_scripted_reply() {
        let device = MockPeripheral::progressor();
        device.connect().await.unwrap();
        let data = GattCharacteristic {
            service: PROGRESSOR_SERVICE_UUID,
            uuid: Uuid::nil(),
        };
        let mut notifications = device.notifications(&data).await.unwrap();

        device.write(&data, &[111, 0]).await.unwrap();

        assert_eq!(
            notifications.next().await,
            Some(command_response(&3850u16.to_le_bytes()))
        );
        assert_eq!(device.written_tags(), vec![111]);
    }

    #[tokio::test]
    async fn failure_injection_hits_only_that_step() {
        let device = MockPeripheral::new("Progressor_1");
        device.fail_at(Some(MockStep::Subscribe));
        device.connect().await.unwrap();
        let data = GattCharacteristic {
            service: PROGRESSOR_SERVICE_UUID,
            uuid: Uuid::nil(),
        };
        assert!(matches!(
            device.subscribe(&data).await,
            Err(Error::Transport(_))
        ));
        assert!(!device.is_subscribed());
    }
}
