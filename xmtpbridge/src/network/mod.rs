//! Messaging network abstraction for the bridge.
//!
//! Defines the traits the relay pipeline drives:
//! - [`ClientFactory`]: authenticates a [`Signer`] and opens a client
//! - [`MessagingClient`]: conversation sync, lookup, capability check, creation
//! - [`Conversation`]: member listing and sending
//!
//! Concrete implementations:
//! - [`loopback::LoopbackNetwork`]: in-process network for tests and `local` runs
//!
//! The network separates *addresses* (wallet identities) from *inboxes*
//! (routing identities). A conversation is keyed by inboxes, so sending to an
//! address first has to discover which inbox the address belongs to.

pub mod loopback;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;

use crate::crypto::DbEncryptionKey;
use crate::crypto::signer::Signer;

/// Routing identity of a participant in the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InboxId(String);

impl InboxId {
    /// Wraps a network-assigned inbox id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this inbox id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of external identifier attached to an inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// Externally-owned Ethereum account.
    Ethereum,
}

/// External identity (e.g. a wallet address) that can be linked to an inbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// What kind of identity this is.
    pub kind: IdentifierKind,
    /// Identity value. Ethereum addresses are stored lowercase.
    pub value: String,
}

impl Identifier {
    /// Ethereum identifier for `address`, normalized to lowercase.
    pub fn ethereum(address: impl AsRef<str>) -> Self {
        Self {
            kind: IdentifierKind::Ethereum,
            value: address.as_ref().trim().to_lowercase(),
        }
    }

    /// Case-insensitive comparison against a raw address.
    #[must_use]
    pub fn matches_address(&self, address: &str) -> bool {
        self.kind == IdentifierKind::Ethereum && self.value.eq_ignore_ascii_case(address.trim())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A conversation member and the identities linked to its inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member's inbox.
    pub inbox_id: InboxId,
    /// External identifiers known for that inbox.
    pub identifiers: Vec<Identifier>,
}

/// Network environment the client connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkEnv {
    /// A node on the local machine.
    Local,
    /// The shared development network.
    Dev,
    /// The production network.
    Production,
}

impl NetworkEnv {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for NetworkEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a network environment name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network environment {0:?} (expected local, dev or production)")]
pub struct UnknownEnv(pub String);

impl FromStr for NetworkEnv {
    type Err = UnknownEnv;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" | "development" => Ok(Self::Dev),
            "production" | "prod" => Ok(Self::Production),
            other => Err(UnknownEnv(other.to_string())),
        }
    }
}

/// Everything besides the signer that a client needs to start.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Network environment.
    pub env: NetworkEnv,
    /// Path of the local state database.
    pub db_path: PathBuf,
    /// Key the local state database is encrypted with.
    pub db_encryption_key: DbEncryptionKey,
}

/// Errors reported by the messaging network.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The network could not be reached or rejected the request.
    #[error("network request failed: {0}")]
    Request(String),

    /// The identity's signature was not accepted.
    #[error("identity authentication failed: {0}")]
    Authentication(String),

    /// No inbox is registered for the identifier.
    #[error("no inbox registered for {0}")]
    NoInbox(Identifier),

    /// The conversation does not exist (or is not visible to this client).
    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

/// A conversation the client participates in.
pub trait Conversation: Send + Sync {
    /// Network id of the conversation.
    fn id(&self) -> &str;

    /// List the members of the conversation with their linked identifiers.
    fn members(&self) -> impl Future<Output = Result<Vec<Member>, NetworkError>> + Send;

    /// Send a text message, returning the network-assigned message id.
    fn send_text(&self, text: &str) -> impl Future<Output = Result<String, NetworkError>> + Send;
}

/// An authenticated session with the messaging network.
///
/// Conversation listing and DM lookup read the client's local view, which
/// is only refreshed by [`MessagingClient::sync_conversations`].
pub trait MessagingClient: Send + Sync {
    /// Conversation handle type.
    type Conversation: Conversation;

    /// Inbox of this client's own identity.
    fn inbox_id(&self) -> &InboxId;

    /// External identity the client authenticated as.
    fn identifier(&self) -> &Identifier;

    /// Pull the latest conversation list from the network into the local view.
    fn sync_conversations(&self) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// All conversations in the local view.
    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<Self::Conversation>, NetworkError>> + Send;

    /// The one-to-one conversation with `inbox_id`, if the local view has one.
    fn dm_by_inbox_id(
        &self,
        inbox_id: &InboxId,
    ) -> impl Future<Output = Result<Option<Self::Conversation>, NetworkError>> + Send;

    /// Ask the network whether `identifier` can receive messages.
    fn can_message(
        &self,
        identifier: &Identifier,
    ) -> impl Future<Output = Result<bool, NetworkError>> + Send;

    /// Create (or return the existing) one-to-one conversation with `identifier`.
    fn create_dm(
        &self,
        identifier: &Identifier,
    ) -> impl Future<Output = Result<Self::Conversation, NetworkError>> + Send;

    /// Disconnect from the network. Further calls fail with [`NetworkError::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

/// Builds authenticated clients.
pub trait ClientFactory: Send + Sync {
    /// Client type produced by this factory.
    type Client: MessagingClient;

    /// Authenticate `signer` and open a client with `options`.
    fn connect(
        &self,
        signer: Signer,
        options: ClientOptions,
    ) -> impl Future<Output = Result<Self::Client, NetworkError>> + Send;
}
