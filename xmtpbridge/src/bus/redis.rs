//! Redis pub/sub bus.
//!
//! [`RedisBus`] wraps a `redis::Client`. Each [`connect`](Bus::connect)
//! opens a dedicated pub/sub connection; subscribing converts it into a
//! message stream. Dropping the stream closes the socket and the server
//! discards the subscription with it.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use super::{Bus, BusConnection, BusError, Subscription};

type MessageStream = Pin<Box<dyn Stream<Item = ::redis::Msg> + Send>>;

/// Bus backed by a Redis server.
#[derive(Debug, Clone)]
pub struct RedisBus {
    client: ::redis::Client,
    endpoint: String,
}

impl RedisBus {
    /// Create a bus for `url`. No connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidUrl`] if the URL is not a usable Redis URL.
    pub fn open(url: &str) -> Result<Self, BusError> {
        let client =
            ::redis::Client::open(url).map_err(|e| BusError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: redact_url(url),
        })
    }
}

impl Bus for RedisBus {
    type Connection = RedisConnection;

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn connect(&self) -> Result<RedisConnection, BusError> {
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        tracing::debug!(endpoint = %self.endpoint, "redis pub/sub connection opened");
        Ok(RedisConnection { pubsub })
    }
}

/// Open Redis pub/sub connection.
pub struct RedisConnection {
    pubsub: ::redis::aio::PubSub,
}

impl BusConnection for RedisConnection {
    type Subscription = RedisSubscription;

    async fn subscribe(mut self, channel: &str) -> Result<RedisSubscription, BusError> {
        self.pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(RedisSubscription {
            messages: Box::pin(self.pubsub.into_on_message()),
        })
    }
}

/// Live Redis subscription.
pub struct RedisSubscription {
    messages: MessageStream,
}

impl Subscription for RedisSubscription {
    async fn next_payload(&mut self) -> Option<Result<String, BusError>> {
        let msg = self.messages.next().await?;
        Some(
            msg.get_payload::<String>()
                .map_err(|e| BusError::Payload(e.to_string())),
        )
    }

    /// Closes the socket; the server drops the subscription with it.
    async fn close(self) {
        drop(self.messages);
    }
}

/// Strip the password (and username) from a URL for logging.
///
/// Input that does not parse as a URL is replaced entirely.
#[must_use]
pub fn redact_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return "<invalid url>".to_string();
    };
    if parsed.password().is_some() {
        let _ = parsed.set_password(Some("***"));
    }
    if !parsed.username().is_empty() {
        let _ = parsed.set_username("***");
    }
    parsed.to_string()
}
