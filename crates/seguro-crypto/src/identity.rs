//! Long-term X25519 identity keys.
//!
//! The public half is what clients publish to the relay's key registry, as
//! standard base64. Private key storage is the caller's concern.

use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use seguro_proto::validate::{b64, unb64};

pub const PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key length: expected 32, got {0}")]
    InvalidLength(usize),
    #[error("key is not valid base64")]
    Encoding,
}

/// An endpoint's X25519 key pair. The secret zeroizes on drop.
pub struct IdentityKeys {
    secret: StaticSecret,
    public: PublicKey,
}

impl IdentityKeys {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Secret bytes for persisting the identity across runs.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn public_b64(&self) -> String {
        b64(self.public.as_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("public", &self.public_b64())
            .finish_non_exhaustive()
    }
}

/// Parses a base64 public key as published to the relay.
pub fn parse_public_key(encoded: &str) -> Result<[u8; 32], KeyError> {
    let bytes = unb64("pubkey", encoded).map_err(|_| KeyError::Encoding)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}
