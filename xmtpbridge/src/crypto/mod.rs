//! Key material for the bridge's network identity.
//!
//! Holds the two secrets the messaging client is built from: the wallet
//! signing key (wrapped by [`signer::Signer`]) and the local database
//! encryption key ([`DbEncryptionKey`]). Both are zeroized on drop.

pub mod signer;

use sha3::{Digest, Keccak256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of the local database encryption key.
pub const DB_ENCRYPTION_KEY_LEN: usize = 32;

/// Errors that can occur when decoding or using key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The value was not valid hexadecimal.
    #[error("invalid hex in {what}: {source}")]
    InvalidHex {
        /// Which key was being decoded.
        what: &'static str,
        /// Underlying decode error.
        source: hex::FromHexError,
    },

    /// The decoded key had the wrong length.
    #[error("{what} must be {expected} bytes, got {actual}")]
    WrongLength {
        /// Which key was being decoded.
        what: &'static str,
        /// Required length in bytes.
        expected: usize,
        /// Decoded length in bytes.
        actual: usize,
    },
}

/// Encryption key for the messaging client's local state database.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DbEncryptionKey([u8; DB_ENCRYPTION_KEY_LEN]);

impl DbEncryptionKey {
    /// Decodes the key from hex, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the value is not hex or does not decode to
    /// exactly [`DB_ENCRYPTION_KEY_LEN`] bytes.
    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        let bytes = zeroize::Zeroizing::new(decode_hex(value, "database encryption key")?);
        if bytes.len() != DB_ENCRYPTION_KEY_LEN {
            return Err(KeyError::WrongLength {
                what: "database encryption key",
                expected: DB_ENCRYPTION_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; DB_ENCRYPTION_KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Raw key bytes, for handing to the client constructor.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DB_ENCRYPTION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DbEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DbEncryptionKey(..)")
    }
}

/// Decodes hex text, trimming whitespace and an optional `0x`/`0X` prefix.
pub(crate) fn decode_hex(value: &str, what: &'static str) -> Result<Vec<u8>, KeyError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|source| KeyError::InvalidHex { what, source })
}

/// Keccak-256 digest.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Digest signed for an EIP-191 "personal message".
#[must_use]
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}
