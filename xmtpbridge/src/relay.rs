//! Relay pipeline: turns one [`RelayRequest`] into one network send.
//!
//! Resolution order for the target conversation:
//! 1. Sync the client's conversation list.
//! 2. Find the recipient's inbox (inbox cache, then a scan of every member
//!    of every conversation, matching identifiers case-insensitively and
//!    skipping the bridge's own inbox).
//! 3. Look up the DM with that inbox.
//! 4. Failing that, ask the network whether the address can be messaged and,
//!    if so, create a DM directly from the address.
//!
//! A request addressed to the bridge itself is refused before step 1 runs.
//!
//! [`Relay::relay`] never returns an error; every failure becomes
//! [`RelayResult::Failed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use xmtpbridge_proto::request::RelayRequest;
use xmtpbridge_proto::result::RelayResult;

use crate::client::{ClientLifecycle, InitError};
use crate::network::{
    ClientFactory, Conversation, Identifier, InboxId, MessagingClient, NetworkError,
};

/// Default upper bound on a single relay.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that stop a relay. Converted to [`RelayResult::Failed`] at the
/// pipeline boundary.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request had no recipient.
    #[error("recipient address is empty")]
    EmptyRecipient,

    /// The request is addressed to the bridge's own identity.
    #[error("recipient {0} is the bridge's own address")]
    OwnAddress(String),

    /// The messaging client could not be built.
    #[error(transparent)]
    Init(#[from] InitError),

    /// Syncing the conversation list failed.
    #[error("failed to sync conversations: {0}")]
    Sync(#[source] NetworkError),

    /// Listing conversations or members failed.
    #[error("failed to look up conversation for {address}: {source}")]
    Lookup {
        /// Recipient address.
        address: String,
        /// Underlying error.
        source: NetworkError,
    },

    /// The capability check itself failed.
    #[error("failed to check whether {address} can receive messages: {source}")]
    CapabilityCheck {
        /// Recipient address.
        address: String,
        /// Underlying error.
        source: NetworkError,
    },

    /// The network reports the address cannot receive messages.
    #[error("recipient {0} cannot receive messages on this network")]
    CannotMessage(String),

    /// Creating a new DM with the address failed.
    #[error("failed to create conversation with {address}: {source}")]
    CreateConversation {
        /// Recipient address.
        address: String,
        /// Underlying error.
        source: NetworkError,
    },

    /// The send itself failed.
    #[error("failed to send message to {address}: {source}")]
    Send {
        /// Recipient address.
        address: String,
        /// Underlying error.
        source: NetworkError,
    },

    /// The relay did not finish within the configured bound.
    #[error("relay to {address} timed out after {timeout:?}")]
    Timeout {
        /// Recipient address.
        address: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },
}

/// Tunables for the relay pipeline.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound on one relay; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Remember address → inbox mappings between relays.
    pub inbox_cache: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_RELAY_TIMEOUT),
            inbox_cache: true,
        }
    }
}

/// Address → inbox mappings learned from earlier relays.
#[derive(Debug, Default)]
pub struct InboxCache {
    entries: Mutex<HashMap<String, InboxId>>,
}

impl InboxCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached inbox for `address`.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<InboxId> {
        self.entries.lock().get(&address.to_lowercase()).cloned()
    }

    /// Remember that `address` routes to `inbox`.
    pub fn insert(&self, address: &str, inbox: InboxId) {
        self.entries.lock().insert(address.to_lowercase(), inbox);
    }

    /// Forget `address`.
    pub fn remove(&self, address: &str) {
        self.entries.lock().remove(&address.to_lowercase());
    }

    /// Number of cached mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The relay pipeline.
pub struct Relay<F: ClientFactory> {
    clients: Arc<ClientLifecycle<F>>,
    cache: Option<InboxCache>,
    timeout: Option<Duration>,
}

impl<F: ClientFactory> Relay<F> {
    /// Create a pipeline that sends through `clients`.
    pub fn new(clients: Arc<ClientLifecycle<F>>, config: &RelayConfig) -> Self {
        Self {
            clients,
            cache: config.inbox_cache.then(InboxCache::new),
            timeout: config.timeout,
        }
    }

    /// The client lifecycle this pipeline sends through.
    pub const fn clients(&self) -> &Arc<ClientLifecycle<F>> {
        &self.clients
    }

    /// The inbox cache, when enabled.
    pub const fn inbox_cache(&self) -> Option<&InboxCache> {
        self.cache.as_ref()
    }

    /// Relay one request. Never fails; errors are reported in the result.
    pub async fn relay(&self, request: &RelayRequest) -> RelayResult {
        let address = request.recipient_address.trim();
        let outcome = match self.timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.try_relay(address, &request.message)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RelayError::Timeout {
                        address: address.to_string(),
                        timeout,
                    }),
                }
            }
            None => self.try_relay(address, &request.message).await,
        };

        match outcome {
            Ok(message_id) => RelayResult::sent(message_id),
            Err(e) => RelayResult::failed(e.to_string()),
        }
    }

    /// Relay one request, surfacing the error.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] describing the first step that failed.
    pub async fn try_relay(&self, address: &str, message: &str) -> Result<String, RelayError> {
        if address.is_empty() {
            return Err(RelayError::EmptyRecipient);
        }

        let client = self.clients.get_or_create().await?;
        if client.identifier().matches_address(address) {
            return Err(RelayError::OwnAddress(address.to_string()));
        }
        client
            .sync_conversations()
            .await
            .map_err(RelayError::Sync)?;

        let conversation = match self.find_existing(client.as_ref(), address).await? {
            Some(conversation) => {
                tracing::debug!(
                    address,
                    conversation_id = conversation.id(),
                    "using existing conversation"
                );
                conversation
            }
            None => self.create_conversation(client.as_ref(), address).await?,
        };

        conversation
            .send_text(message)
            .await
            .map_err(|source| RelayError::Send {
                address: address.to_string(),
                source,
            })
    }

    /// Steps 2–3: resolve the inbox and look up the DM with it.
    async fn find_existing(
        &self,
        client: &F::Client,
        address: &str,
    ) -> Result<Option<<F::Client as MessagingClient>::Conversation>, RelayError> {
        let lookup_err = |source| RelayError::Lookup {
            address: address.to_string(),
            source,
        };

        if let Some(cache) = &self.cache {
            if let Some(inbox) = cache.get(address) {
                if let Some(dm) = client.dm_by_inbox_id(&inbox).await.map_err(lookup_err)? {
                    return Ok(Some(dm));
                }
                tracing::debug!(address, inbox_id = %inbox, "cached inbox has no conversation, rescanning");
                cache.remove(address);
            }
        }

        let Some(inbox) = find_inbox_id(client, address)
            .await
            .map_err(lookup_err)?
        else {
            tracing::debug!(address, "no inbox found in existing conversations");
            return Ok(None);
        };

        let dm = client.dm_by_inbox_id(&inbox).await.map_err(lookup_err)?;
        if let (Some(cache), Some(_)) = (&self.cache, &dm) {
            cache.insert(address, inbox);
        }
        Ok(dm)
    }

    /// Step 4: capability check, then create a DM from the raw address.
    async fn create_conversation(
        &self,
        client: &F::Client,
        address: &str,
    ) -> Result<<F::Client as MessagingClient>::Conversation, RelayError> {
        let identifier = Identifier::ethereum(address);

        let reachable = client
            .can_message(&identifier)
            .await
            .map_err(|source| RelayError::CapabilityCheck {
                address: address.to_string(),
                source,
            })?;
        if !reachable {
            return Err(RelayError::CannotMessage(address.to_string()));
        }

        tracing::info!(address, "creating new conversation");
        let conversation =
            client
                .create_dm(&identifier)
                .await
                .map_err(|source| RelayError::CreateConversation {
                    address: address.to_string(),
                    source,
                })?;

        if let Some(cache) = &self.cache {
            if let Some(inbox) = peer_inbox(client, &conversation).await {
                cache.insert(address, inbox);
            }
        }
        Ok(conversation)
    }
}

/// Scan every conversation's members for one whose identifiers include
/// `address`. The client's own inbox never matches.
///
/// # Errors
///
/// Returns [`NetworkError`] if listing conversations or members fails.
pub async fn find_inbox_id<C: MessagingClient>(
    client: &C,
    address: &str,
) -> Result<Option<InboxId>, NetworkError> {
    let own = client.inbox_id();
    for conversation in client.list_conversations().await? {
        for member in conversation.members().await? {
            if member.inbox_id == *own {
                continue;
            }
            if member
                .identifiers
                .iter()
                .any(|identifier| identifier.matches_address(address))
            {
                return Ok(Some(member.inbox_id));
            }
        }
    }
    Ok(None)
}

/// The member of a freshly created DM that is not the client itself.
async fn peer_inbox<C: MessagingClient>(
    client: &C,
    conversation: &C::Conversation,
) -> Option<InboxId> {
    let own = client.inbox_id();
    conversation
        .members()
        .await
        .ok()?
        .into_iter()
        .map(|m| m.inbox_id)
        .find(|inbox| inbox != own)
}
