//! Loopback messaging network.
//!
//! An in-process stand-in for the messaging network. [`LoopbackNetwork`] is
//! cheap to clone; every clone shares the same inbox registry and
//! conversation set, so a test can hold one handle to seed recipients and
//! inspect delivered messages while the bridge connects through another.
//!
//! Clients authenticate by signing a registration challenge. The network
//! recovers the signer's address from the signature and assigns the address
//! an inbox (the keccak-256 hash of the lowercase address).
//!
//! Each client keeps its own view of the conversation set that is only
//! refreshed by [`MessagingClient::sync_conversations`], mirroring the stale
//! local state a real client has between syncs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    ClientFactory, ClientOptions, Conversation, Identifier, InboxId, Member, MessagingClient,
    NetworkEnv, NetworkError,
};
use crate::crypto::keccak256;
use crate::crypto::signer::{Signer, recover_address};

/// A message delivered into a loopback conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Network-assigned message id.
    pub id: String,
    /// Conversation the message was sent in.
    pub conversation_id: String,
    /// Inbox of the sender.
    pub sender: InboxId,
    /// Message text.
    pub text: String,
}

/// Counters for calls made against the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Client constructions attempted.
    pub connects: usize,
    /// Conversation syncs performed.
    pub syncs: usize,
    /// Capability checks performed.
    pub can_message_checks: usize,
    /// DM creations attempted.
    pub dm_create_attempts: usize,
    /// Messages successfully sent.
    pub sends: usize,
    /// Clients closed.
    pub closes: usize,
}

#[derive(Debug)]
struct ConversationRecord {
    id: String,
    members: Vec<InboxId>,
    is_dm: bool,
}

impl ConversationRecord {
    fn is_dm_between(&self, a: &InboxId, b: &InboxId) -> bool {
        self.is_dm && a != b && self.members.contains(a) && self.members.contains(b)
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_connects: u32,
    create_dm_fails: bool,
    sync_fails: bool,
    send_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct NetworkState {
    inboxes: HashMap<String, InboxId>,
    identities: HashMap<InboxId, Vec<Identifier>>,
    conversations: Vec<ConversationRecord>,
    messages: Vec<SentMessage>,
    stats: NetworkStats,
    faults: Faults,
}

impl NetworkState {
    fn register(&mut self, address: &str) -> InboxId {
        let identifier = Identifier::ethereum(address);
        if let Some(inbox) = self.inboxes.get(&identifier.value) {
            return inbox.clone();
        }
        let inbox = InboxId::new(hex::encode(keccak256(identifier.value.as_bytes())));
        self.inboxes.insert(identifier.value.clone(), inbox.clone());
        self.identities
            .entry(inbox.clone())
            .or_default()
            .push(identifier);
        inbox
    }

    fn insert_conversation(&mut self, members: Vec<InboxId>, is_dm: bool) -> String {
        let id = Uuid::now_v7().to_string();
        self.conversations.push(ConversationRecord {
            id: id.clone(),
            members,
            is_dm,
        });
        id
    }

    fn find_dm(&self, a: &InboxId, b: &InboxId) -> Option<&ConversationRecord> {
        self.conversations.iter().find(|c| c.is_dm_between(a, b))
    }
}

/// Shared in-process messaging network.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` as a reachable identity and return its inbox.
    ///
    /// Registering the same address twice (in any letter case) returns the
    /// same inbox.
    pub fn register_identity(&self, address: &str) -> InboxId {
        self.state.lock().register(address)
    }

    /// Inbox registered for `address`, if any.
    #[must_use]
    pub fn inbox_for(&self, address: &str) -> Option<InboxId> {
        let key = Identifier::ethereum(address).value;
        self.state.lock().inboxes.get(&key).cloned()
    }

    /// Seed a one-to-one conversation between two inboxes, returning its id.
    ///
    /// An existing DM between the pair is reused.
    pub fn create_dm_between(&self, a: &InboxId, b: &InboxId) -> String {
        let mut state = self.state.lock();
        if let Some(existing) = state.find_dm(a, b) {
            return existing.id.clone();
        }
        state.insert_conversation(vec![a.clone(), b.clone()], true)
    }

    /// Seed a group conversation, returning its id.
    pub fn create_group(&self, members: &[InboxId]) -> String {
        self.state
            .lock()
            .insert_conversation(members.to_vec(), false)
    }

    /// All messages delivered into `conversation_id`, oldest first.
    #[must_use]
    pub fn messages_in(&self, conversation_id: &str) -> Vec<SentMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// All messages delivered into DMs that include `address`'s inbox.
    #[must_use]
    pub fn messages_to(&self, address: &str) -> Vec<SentMessage> {
        let state = self.state.lock();
        let Some(inbox) = state.inboxes.get(&Identifier::ethereum(address).value) else {
            return Vec::new();
        };
        let dm_ids: Vec<&str> = state
            .conversations
            .iter()
            .filter(|c| c.is_dm && c.members.contains(inbox))
            .map(|c| c.id.as_str())
            .collect();
        state
            .messages
            .iter()
            .filter(|m| dm_ids.contains(&m.conversation_id.as_str()) && m.sender != *inbox)
            .cloned()
            .collect()
    }

    /// Number of conversations on the network.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.state.lock().conversations.len()
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        self.state.lock().stats
    }

    /// Make the next `count` client constructions fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().faults.failing_connects = count;
    }

    /// Make DM creation fail (after the capability check).
    pub fn set_create_dm_fails(&self, fails: bool) {
        self.state.lock().faults.create_dm_fails = fails;
    }

    /// Make conversation syncs fail.
    pub fn set_sync_fails(&self, fails: bool) {
        self.state.lock().faults.sync_fails = fails;
    }

    /// Delay every send by `delay`.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.state.lock().faults.send_delay = delay;
    }
}

/// Text a client signs to prove control of its address.
fn registration_challenge(env: NetworkEnv, address: &str) -> String {
    format!("loopback inbox registration\nenv: {env}\naddress: {address}")
}

impl ClientFactory for LoopbackNetwork {
    type Client = LoopbackClient;

    async fn connect(
        &self,
        signer: Signer,
        options: ClientOptions,
    ) -> Result<LoopbackClient, NetworkError> {
        {
            let mut state = self.state.lock();
            state.stats.connects += 1;
            if state.faults.failing_connects > 0 {
                state.faults.failing_connects -= 1;
                return Err(NetworkError::Request(
                    "loopback network refused connection".to_string(),
                ));
            }
        }

        let challenge = registration_challenge(options.env, signer.address());
        let signature = signer
            .sign(challenge.as_bytes())
            .await
            .map_err(|e| NetworkError::Authentication(e.to_string()))?;
        let recovered = recover_address(challenge.as_bytes(), &signature)
            .map_err(|e| NetworkError::Authentication(e.to_string()))?;
        if recovered != signer.address() {
            return Err(NetworkError::Authentication(format!(
                "signature recovered {recovered}, expected {}",
                signer.address()
            )));
        }

        let inbox_id = self.register_identity(&recovered);
        tracing::debug!(inbox_id = %inbox_id, env = %options.env, "loopback client registered");

        Ok(LoopbackClient {
            network: self.clone(),
            identifier: Identifier::ethereum(&recovered),
            inbox_id,
            env: options.env,
            view: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Client session on a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackClient {
    network: LoopbackNetwork,
    identifier: Identifier,
    inbox_id: InboxId,
    env: NetworkEnv,
    /// Conversation ids visible locally as of the last sync.
    view: Mutex<Vec<String>>,
    closed: Arc<AtomicBool>,
}

impl LoopbackClient {
    /// Environment this client was opened against.
    #[must_use]
    pub const fn env(&self) -> NetworkEnv {
        self.env
    }

    /// Whether [`MessagingClient::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), NetworkError> {
        if self.is_closed() {
            Err(NetworkError::Closed)
        } else {
            Ok(())
        }
    }

    fn handle(&self, id: String) -> LoopbackConversation {
        LoopbackConversation {
            network: self.network.clone(),
            id,
            sender: self.inbox_id.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl MessagingClient for LoopbackClient {
    type Conversation = LoopbackConversation;

    fn inbox_id(&self) -> &InboxId {
        &self.inbox_id
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    async fn sync_conversations(&self) -> Result<(), NetworkError> {
        self.ensure_open()?;
        let ids: Vec<String> = {
            let mut state = self.network.state.lock();
            state.stats.syncs += 1;
            if state.faults.sync_fails {
                return Err(NetworkError::Request("conversation sync failed".to_string()));
            }
            state
                .conversations
                .iter()
                .filter(|c| c.members.contains(&self.inbox_id))
                .map(|c| c.id.clone())
                .collect()
        };
        *self.view.lock() = ids;
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<LoopbackConversation>, NetworkError> {
        self.ensure_open()?;
        let ids = self.view.lock().clone();
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }

    async fn dm_by_inbox_id(
        &self,
        inbox_id: &InboxId,
    ) -> Result<Option<LoopbackConversation>, NetworkError> {
        self.ensure_open()?;
        if *inbox_id == self.inbox_id {
            return Ok(None);
        }
        let view = self.view.lock().clone();
        let found = {
            let state = self.network.state.lock();
            state
                .conversations
                .iter()
                .find(|c| view.contains(&c.id) && c.is_dm_between(&self.inbox_id, inbox_id))
                .map(|c| c.id.clone())
        };
        Ok(found.map(|id| self.handle(id)))
    }

    async fn can_message(&self, identifier: &Identifier) -> Result<bool, NetworkError> {
        self.ensure_open()?;
        let mut state = self.network.state.lock();
        state.stats.can_message_checks += 1;
        Ok(state.inboxes.contains_key(&identifier.value))
    }

    async fn create_dm(&self, identifier: &Identifier) -> Result<LoopbackConversation, NetworkError> {
        self.ensure_open()?;
        let id = {
            let mut state = self.network.state.lock();
            state.stats.dm_create_attempts += 1;
            if state.faults.create_dm_fails {
                return Err(NetworkError::Request("dm creation rejected".to_string()));
            }
            let Some(peer) = state.inboxes.get(&identifier.value).cloned() else {
                return Err(NetworkError::NoInbox(identifier.clone()));
            };
            if peer == self.inbox_id {
                return Err(NetworkError::Request(
                    "cannot open a conversation with the client's own inbox".to_string(),
                ));
            }
            match state.find_dm(&self.inbox_id, &peer) {
                Some(existing) => existing.id.clone(),
                None => state.insert_conversation(vec![self.inbox_id.clone(), peer], true),
            }
        };
        {
            let mut view = self.view.lock();
            if !view.contains(&id) {
                view.push(id.clone());
            }
        }
        Ok(self.handle(id))
    }

    async fn close(&self) -> Result<(), NetworkError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.state.lock().stats.closes += 1;
        }
        Ok(())
    }
}

/// Handle to a conversation on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackConversation {
    network: LoopbackNetwork,
    id: String,
    sender: InboxId,
    closed: Arc<AtomicBool>,
}

impl Conversation for LoopbackConversation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn members(&self) -> Result<Vec<Member>, NetworkError> {
        let state = self.network.state.lock();
        let record = state
            .conversations
            .iter()
            .find(|c| c.id == self.id)
            .ok_or_else(|| NetworkError::ConversationNotFound(self.id.clone()))?;
        Ok(record
            .members
            .iter()
            .map(|inbox| Member {
                inbox_id: inbox.clone(),
                identifiers: state.identities.get(inbox).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn send_text(&self, text: &str) -> Result<String, NetworkError> {
        let delay = self.network.state.lock().faults.send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }

        let mut state = self.network.state.lock();
        if !state.conversations.iter().any(|c| c.id == self.id) {
            return Err(NetworkError::ConversationNotFound(self.id.clone()));
        }
        let id = Uuid::now_v7().to_string();
        state.messages.push(SentMessage {
            id: id.clone(),
            conversation_id: self.id.clone(),
            sender: self.sender.clone(),
            text: text.to_string(),
        });
        state.stats.sends += 1;
        Ok(id)
    }
}
