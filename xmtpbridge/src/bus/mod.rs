//! Pub/sub bus abstraction.
//!
//! The bridge only ever consumes from the bus. Defines the [`Bus`],
//! [`BusConnection`] and [`Subscription`] traits that each backend
//! satisfies:
//! - [`redis::RedisBus`]: Redis pub/sub
//! - [`loopback::LoopbackBus`]: in-process channels for testing

pub mod loopback;
pub mod redis;

use std::future::Future;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus URL could not be used.
    #[error("invalid bus url: {0}")]
    InvalidUrl(String),

    /// Opening the connection failed.
    #[error("failed to connect to bus: {0}")]
    Connect(String),

    /// The subscribe command was rejected or failed.
    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe {
        /// Channel that was requested.
        channel: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// A delivered payload was not UTF-8 text.
    #[error("undecodable bus payload: {0}")]
    Payload(String),
}

/// A bus that connections can be opened against.
pub trait Bus: Send + Sync {
    /// Open connection type.
    type Connection: BusConnection;

    /// Endpoint description safe to log (no credentials).
    fn endpoint(&self) -> String;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, BusError>> + Send;
}

/// An open, not yet subscribed connection.
pub trait BusConnection: Send {
    /// Subscription type produced by [`subscribe`](Self::subscribe).
    type Subscription: Subscription;

    /// Subscribe to `channel`, turning the connection into a payload stream.
    fn subscribe(
        self,
        channel: &str,
    ) -> impl Future<Output = Result<Self::Subscription, BusError>> + Send;
}

/// A live subscription yielding payloads in delivery order.
pub trait Subscription: Send {
    /// Next payload. `None` means the connection was lost.
    fn next_payload(&mut self) -> impl Future<Output = Option<Result<String, BusError>>> + Send;

    /// Unsubscribe and disconnect.
    fn close(self) -> impl Future<Output = ()> + Send;
}
