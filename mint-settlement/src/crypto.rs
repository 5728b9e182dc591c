//! Key material and hashing
//!
//! This module provides:
//! - Solana keypair loading (JSON byte-array files), signing, verification
//! - Base58 public key parsing
//! - SHA-256 hashing

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair as SolanaKeypair, Signature, Signer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Parse a base58 address
pub fn parse_pubkey(address: &str) -> Result<Pubkey> {
    Pubkey::from_str(address)
        .map_err(|e| Error::Configuration(format!("Invalid address {:?}: {}", address, e)))
}

/// Check `signature` over `message` against `public_key`
pub fn verify_signature(public_key: &Pubkey, message: &[u8], signature: &Signature) -> Result<()> {
    if signature.verify(public_key.as_ref(), message) {
        Ok(())
    } else {
        Err(Error::Signing(format!(
            "Signature {} does not verify for {}",
            signature, public_key
        )))
    }
}

/// Ed25519 signing key. Never printed: `Debug` shows only the public key.
pub struct Keypair {
    inner: SolanaKeypair,
}

impl Keypair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            inner: SolanaKeypair::new(),
        }
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: SolanaKeypair::new_from_array(*seed),
        }
    }

    /// From 64 bytes: secret seed followed by public key (Solana layout).
    /// Fails if the public half does not match the secret.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(Error::Configuration(format!(
                "Keypair must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        let inner = SolanaKeypair::try_from(bytes)
            .map_err(|e| Error::Configuration(format!("Invalid keypair: {}", e)))?;
        if inner.pubkey().as_ref() != &bytes[32..] {
            return Err(Error::Configuration(
                "Keypair public half does not match its secret".to_string(),
            ));
        }
        Ok(Self { inner })
    }

    /// Load a JSON array-of-bytes keypair file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read keypair {}: {}", path.display(), e))
        })?;
        let bytes: Vec<u8> = serde_json::from_str(&content).map_err(|e| {
            Error::Configuration(format!("Malformed keypair {}: {}", path.display(), e))
        })?;
        Self::from_keypair_bytes(&bytes)
    }

    /// Public key
    pub fn public_key(&self) -> Pubkey {
        self.inner.pubkey()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.inner.sign_message(message)
    }

    pub(crate) fn signer(&self) -> &SolanaKeypair {
        &self.inner
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
