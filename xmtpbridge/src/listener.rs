//! Bus listener: consumes relay requests from the bus channel and feeds
//! them to the relay pipeline one at a time.
//!
//! Connection state moves through
//! `Disconnected → Connecting → Connected → Subscribed → Disconnecting → Disconnected`.
//! Losing an established subscription drops straight back to
//! `Disconnected`, after which the reconnect policy decides whether to try
//! again or idle until shutdown.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use xmtpbridge_proto::request;
use xmtpbridge_proto::result::RelayResult;
use xmtpbridge_proto::status::ListenerStatus;

use crate::bus::{Bus, BusConnection, BusError, Subscription};
use crate::config::{BusConfig, ReconnectConfig};
use crate::network::ClientFactory;
use crate::relay::Relay;

type SubscriptionOf<B> = <<B as Bus>::Connection as BusConnection>::Subscription;

/// Bus connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No connection.
    Disconnected,
    /// Opening a connection.
    Connecting,
    /// Connection open, not yet subscribed.
    Connected,
    /// Receiving from the channel.
    Subscribed,
    /// Releasing the subscription during shutdown.
    Disconnecting,
}

/// How a subscription stopped delivering.
enum Ended {
    Shutdown,
    Lost,
}

/// Consumes the request channel until stopped.
pub struct BusListener<B: Bus, F: ClientFactory> {
    bus: B,
    relay: Arc<Relay<F>>,
    channel: String,
    reconnect: ReconnectConfig,
    state: Mutex<ListenerState>,
    shutdown: watch::Sender<bool>,
}

impl<B: Bus, F: ClientFactory> BusListener<B, F> {
    /// Create a listener on `config.channel` that relays through `relay`.
    pub fn new(bus: B, relay: Arc<Relay<F>>, config: &BusConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bus,
            relay,
            channel: config.channel.clone(),
            reconnect: config.reconnect.clone(),
            state: Mutex::new(ListenerState::Disconnected),
            shutdown,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    /// Snapshot of the listener for health reporting.
    pub fn status(&self) -> ListenerStatus {
        let connected = matches!(
            self.state(),
            ListenerState::Connected | ListenerState::Subscribed
        );
        ListenerStatus::now(connected, self.channel.as_str())
    }

    /// Ask [`run`](Self::run) to unsubscribe and return.
    ///
    /// Idempotent, and harmless if `run` was never called.
    pub fn stop(&self) {
        let first = self.shutdown.send_if_modified(|stopped| {
            let was_stopped = *stopped;
            *stopped = true;
            !was_stopped
        });
        if first {
            tracing::info!(channel = %self.channel, "bus listener stopping");
        }
    }

    /// Connect, subscribe and process messages until [`stop`](Self::stop).
    ///
    /// An in-flight relay always completes before shutdown is observed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the first connection or subscription fails.
    /// Failures after that are handled by the reconnect policy.
    pub async fn run(&self) -> Result<(), BusError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        let mut subscription = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                self.set_state(ListenerState::Disconnected);
                return Ok(());
            }
            opened = self.open() => opened?,
        };
        loop {
            match self.consume(&mut subscription, &mut shutdown).await {
                Ended::Shutdown => {
                    self.set_state(ListenerState::Disconnecting);
                    subscription.close().await;
                    self.set_state(ListenerState::Disconnected);
                    tracing::info!(channel = %self.channel, "unsubscribed from bus");
                    return Ok(());
                }
                Ended::Lost => {
                    self.set_state(ListenerState::Disconnected);
                    tracing::warn!(
                        channel = %self.channel,
                        endpoint = %self.bus.endpoint(),
                        "bus connection lost"
                    );
                    match self.reconnect(&mut shutdown).await {
                        Some(restored) => subscription = restored,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Decode one payload and relay it.
    ///
    /// Returns `None` when the payload is not a valid request; the relay is
    /// not invoked for it.
    pub async fn handle_payload(&self, raw: &str) -> Option<RelayResult> {
        let request = match request::decode(raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "dropping malformed bus message");
                return None;
            }
        };

        tracing::info!(
            recipient = %request.recipient_address,
            len = request.message.len(),
            "relaying message"
        );
        let result = self.relay.relay(&request).await;
        match &result {
            RelayResult::Sent { message_id } => {
                tracing::info!(
                    recipient = %request.recipient_address,
                    message_id = %message_id,
                    "message relayed"
                );
            }
            RelayResult::Failed { error } => {
                tracing::error!(
                    recipient = %request.recipient_address,
                    error = %error,
                    "relay failed"
                );
            }
        }
        Some(result)
    }

    fn set_state(&self, state: ListenerState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "bus listener state");
        }
    }

    async fn open(&self) -> Result<SubscriptionOf<B>, BusError> {
        self.set_state(ListenerState::Connecting);
        let connection = match self.bus.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_state(ListenerState::Disconnected);
                return Err(e);
            }
        };
        self.set_state(ListenerState::Connected);

        match connection.subscribe(&self.channel).await {
            Ok(subscription) => {
                self.set_state(ListenerState::Subscribed);
                tracing::info!(
                    channel = %self.channel,
                    endpoint = %self.bus.endpoint(),
                    "subscribed to bus channel"
                );
                Ok(subscription)
            }
            Err(e) => {
                self.set_state(ListenerState::Disconnected);
                Err(e)
            }
        }
    }

    async fn consume(
        &self,
        subscription: &mut SubscriptionOf<B>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Ended {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ended::Shutdown,
                next = subscription.next_payload() => match next {
                    None => return Ended::Lost,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "dropping undecodable bus payload");
                    }
                    Some(Ok(payload)) => {
                        self.handle_payload(&payload).await;
                    }
                },
            }
        }
    }

    /// Re-establish the subscription. `None` means shutdown was requested
    /// first (or reconnecting is disabled and shutdown eventually came).
    async fn reconnect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<SubscriptionOf<B>> {
        if *shutdown.borrow_and_update() {
            return None;
        }
        if !self.reconnect.enabled {
            tracing::warn!(channel = %self.channel, "reconnect disabled, idling until shutdown");
            let _ = shutdown.changed().await;
            return None;
        }

        let mut attempt: u32 = 0;
        loop {
            let delay = self.reconnect.backoff(attempt);
            tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    self.set_state(ListenerState::Disconnected);
                    return None;
                }
                opened = self.open() => opened,
            };
            match opened {
                Ok(subscription) => {
                    tracing::info!(channel = %self.channel, attempt, "bus subscription restored");
                    return Some(subscription);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        next_delay = ?self.reconnect.backoff(attempt.saturating_add(1)),
                        "bus reconnect failed"
                    );
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
