//! Messaging client lifecycle.
//!
//! [`ClientLifecycle`] owns the client settings and the single long-lived
//! client handle. The handle is built at most once per lifecycle: the
//! "ensure initialized" step is serialized behind an async mutex, so two
//! relays arriving before construction finishes still produce one client.
//! A failed construction leaves the cache empty and the next call retries.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::crypto::signer::{Signer, SignerError};
use crate::crypto::{DbEncryptionKey, KeyError};
use crate::network::{ClientFactory, ClientOptions, MessagingClient, NetworkEnv, NetworkError};

/// Errors raised while constructing the messaging client.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The signing key could not be turned into a signer.
    #[error("failed to build signer: {0}")]
    Signer(#[from] SignerError),

    /// The database encryption key could not be decoded.
    #[error("failed to decode database encryption key: {0}")]
    EncryptionKey(#[from] KeyError),

    /// The network refused or failed the connection.
    #[error("failed to connect messaging client: {0}")]
    Connect(#[from] NetworkError),
}

/// Settings the messaging client is built from.
///
/// Secrets are kept as the text they were configured with and zeroized on drop.
#[derive(Clone)]
pub struct ClientSettings {
    /// Hex signing key, `0x` prefix optional.
    pub private_key: Zeroizing<String>,
    /// Hex database encryption key.
    pub db_encryption_key: Zeroizing<String>,
    /// Network environment.
    pub env: NetworkEnv,
    /// Local state database path.
    pub db_path: PathBuf,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("env", &self.env)
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

/// Owner of the process-wide messaging client handle.
pub struct ClientLifecycle<F: ClientFactory> {
    factory: F,
    settings: ClientSettings,
    handle: Mutex<Option<Arc<F::Client>>>,
}

impl<F: ClientFactory> ClientLifecycle<F> {
    /// Create a lifecycle that will build clients with `factory`.
    pub fn new(factory: F, settings: ClientSettings) -> Self {
        Self {
            factory,
            settings,
            handle: Mutex::new(None),
        }
    }

    /// Network environment the client is built for.
    pub const fn env(&self) -> NetworkEnv {
        self.settings.env
    }

    /// Return the cached client, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] if the signer, encryption key, or connection
    /// fails. Nothing is cached on failure.
    pub async fn get_or_create(&self) -> Result<Arc<F::Client>, InitError> {
        let mut guard = self.handle.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }

        let signer = Signer::from_private_key(&self.settings.private_key)?;
        let db_encryption_key = DbEncryptionKey::from_hex(&self.settings.db_encryption_key)?;
        let options = ClientOptions {
            env: self.settings.env,
            db_path: self.settings.db_path.clone(),
            db_encryption_key,
        };

        let address = signer.address().to_string();
        tracing::info!(
            address = %address,
            env = %self.settings.env,
            db_path = %self.settings.db_path.display(),
            "creating messaging client"
        );

        let client = Arc::new(self.factory.connect(signer, options).await?);
        tracing::info!(address = %address, inbox_id = %client.inbox_id(), "messaging client ready");

        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Whether a client handle is currently cached.
    pub async fn is_initialized(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Disconnect and drop the cached client.
    ///
    /// Safe to call when no client was ever built. A later
    /// [`get_or_create`](Self::get_or_create) builds a fresh client.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] if the client reports a failure while
    /// disconnecting. The handle is dropped either way.
    pub async fn close(&self) -> Result<(), NetworkError> {
        let Some(client) = self.handle.lock().await.take() else {
            return Ok(());
        };
        tracing::info!(inbox_id = %client.inbox_id(), "closing messaging client");
        client.close().await
    }
}
