//! Loopback bus for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels. Cloned handles share one
//! set of subscribers, so a test publishes through its handle while the
//! listener consumes through another.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Bus, BusConnection, BusError, Subscription};

#[derive(Debug, Default)]
struct BusState {
    subscribers: Vec<(String, mpsc::UnboundedSender<String>)>,
    unavailable: bool,
    connects: usize,
}

impl BusState {
    fn prune(&mut self) {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
    }
}

/// In-process pub/sub bus.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    state: Arc<Mutex<BusState>>,
}

impl LoopbackBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every live subscriber of `channel`.
    ///
    /// Returns the number of subscribers reached, like Redis `PUBLISH`.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        let payload = payload.into();
        let mut state = self.state.lock();
        state.prune();
        let mut delivered = 0;
        for (name, tx) in &state.subscribers {
            if name == channel && tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state
            .subscribers
            .iter()
            .filter(|(name, _)| name == channel)
            .count()
    }

    /// Drop every subscription, as if the server went away.
    pub fn disconnect_all(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Connection attempts made so far, including failed ones.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }
}

impl Bus for LoopbackBus {
    type Connection = LoopbackConnection;

    fn endpoint(&self) -> String {
        "loopback".to_string()
    }

    async fn connect(&self) -> Result<LoopbackConnection, BusError> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.unavailable {
            return Err(BusError::Connect("loopback bus unavailable".to_string()));
        }
        Ok(LoopbackConnection { bus: self.clone() })
    }
}

/// Open loopback connection.
#[derive(Debug)]
pub struct LoopbackConnection {
    bus: LoopbackBus,
}

impl BusConnection for LoopbackConnection {
    type Subscription = LoopbackSubscription;

    async fn subscribe(self, channel: &str) -> Result<LoopbackSubscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bus
            .state
            .lock()
            .subscribers
            .push((channel.to_string(), tx));
        Ok(LoopbackSubscription { rx })
    }
}

/// Live loopback subscription.
#[derive(Debug)]
pub struct LoopbackSubscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription for LoopbackSubscription {
    async fn next_payload(&mut self) -> Option<Result<String, BusError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(mut self) {
        self.rx.close();
    }
}
