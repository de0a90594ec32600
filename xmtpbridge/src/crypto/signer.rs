//! Wallet signer for authenticating with the messaging network.
//!
//! Wraps a secp256k1 private key. The identity is the Ethereum address of
//! the key (last 20 bytes of the keccak-256 hash of the uncompressed public
//! key), and signatures are EIP-191 personal-message signatures in the
//! 65-byte `r || s || v` layout wallets produce.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroizing;

use super::{KeyError, decode_hex, keccak256, personal_message_hash};
use crate::network::Identifier;

/// Length of an encoded recoverable signature.
pub const SIGNATURE_LEN: usize = 65;

/// Errors that can occur when building a signer or signing.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The private key text could not be decoded.
    #[error("invalid private key: {0}")]
    Key(#[from] KeyError),

    /// The private key bytes are not a valid secp256k1 scalar.
    #[error("private key is not a valid secp256k1 scalar")]
    InvalidScalar,

    /// The underlying ECDSA operation failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A signature could not be parsed or recovered.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// Signing identity of the bridge.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: String,
}

impl Signer {
    /// Build a signer from a hex private key.
    ///
    /// The key may be given with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Key`] if the text is not 32 bytes of hex, or
    /// [`SignerError::InvalidScalar`] if the bytes are zero or out of range.
    pub fn from_private_key(raw: &str) -> Result<Self, SignerError> {
        let bytes = Zeroizing::new(decode_hex(&normalize_prefix(raw), "private key")?);
        if bytes.len() != 32 {
            return Err(KeyError::WrongLength {
                what: "private key",
                expected: 32,
                actual: bytes.len(),
            }
            .into());
        }
        let key = SigningKey::from_slice(&bytes).map_err(|_| SignerError::InvalidScalar)?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Lowercase `0x`-prefixed Ethereum address of this key.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Network identifier for this key.
    #[must_use]
    pub fn identity(&self) -> Identifier {
        Identifier::ethereum(&self.address)
    }

    /// Produce an EIP-191 signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Signing`] if the ECDSA library rejects the digest.
    pub async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let digest = personal_message_hash(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(&signature.to_bytes());
        out.push(27 + recovery_id.to_byte());
        Ok(out)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Recover the lowercase address that produced an EIP-191 `signature` over `message`.
///
/// Accepts `v` as either 0/1 or 27/28.
///
/// # Errors
///
/// Returns [`SignerError::InvalidSignature`] if the signature is malformed or
/// no public key can be recovered from it.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<String, SignerError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SignerError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let v = signature[64];
    let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| SignerError::InvalidSignature(format!("bad recovery byte {v}")))?;

    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        trimmed.to_string()
    } else {
        format!("0x{trimmed}")
    }
}

fn address_of(key: &VerifyingKey) -> String {
    let point = k256::PublicKey::from(key).to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag.
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}
