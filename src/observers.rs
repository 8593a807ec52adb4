use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::decoding::{BatteryInfo, WeightMeasurement};
use crate::error::Error;

/// Connection lifecycle of a [`crate::ProgressorClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

pub type ConnectionStateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type WeightCallback = Arc<dyn Fn(WeightMeasurement) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
pub type BatteryCallback = Arc<dyn Fn(BatteryInfo) + Send + Sync>;

/// One slot per event kind; registering again replaces the previous callback.
///
/// Callbacks are cloned out of the slot before being invoked so they may call
/// back into the client.
#[derive(Default)]
pub(crate) struct Observers {
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    connection_state: Option<ConnectionStateCallback>,
    weight: Option<WeightCallback>,
    error: Option<ErrorCallback>,
    battery: Option<BatteryCallback>,
}

impl Observers {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_connection_state(&self, callback: ConnectionStateCallback) {
        self.slots().connection_state = Some(callback);
    }

    pub(crate) fn set_weight(&self, callback: WeightCallback) {
        self.slots().weight = Some(callback);
    }

    pub(crate) fn set_error(&self, callback: ErrorCallback) {
        self.slots().error = Some(callback);
    }

    pub(crate) fn set_battery(&self, callback: BatteryCallback) {
        self.slots().battery = Some(callback);
    }

    pub(crate) fn connection_state(&self, state: ConnectionState) {
        let callback = self.slots().connection_state.clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    pub(crate) fn weights(&self, batch: &[WeightMeasurement]) {
        let callback = self.slots().weight.clone();
        if let Some(callback) = callback {
            for measurement in batch {
                callback(*measurement);
            }
        }
    }

    /// Errors with nobody listening still leave a trace in the log.
    pub(crate) fn error(&self, error: &Error) {
        let callback = self.slots().error.clone();
        match callback {
            Some(callback) => callback(error),
            None => tracing::error!("Progressor client error: {error}"),
        }
    }

    pub(crate) fn battery(&self, battery: BatteryInfo) {
        let callback = self.slots().battery.clone();
        if let Some(callback) = callback {
            callback(battery);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn last_registration_wins() {
        let observers = Observers::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        observers.set_battery(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&second);
        observers.set_battery(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        observers.battery(BatteryInfo {
            voltage: 4000,
            percentage: 83,
        });
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weights_are_delivered_one_by_one_in_order() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observers.set_weight(Arc::new(move |m| sink.lock().unwrap().push(m.timestamp)));

        let batch: Vec<_> = (0..3)
            .map(|t| WeightMeasurement {
                weight: 1.0,
                timestamp: t,
            })
            .collect();
        observers.weights(&batch);

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn empty_slots_are_harmless() {
        let observers = Observers::default();
        observers.connection_state(ConnectionState::Connected);
        observers.error(&Error::LowBattery);
        observers.weights(&[]);
    }
}
