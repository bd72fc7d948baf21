//! Box and secret-box capabilities.
//!
//! Endpoints only depend on the two traits. The shipped implementations use
//! X25519 + HKDF-SHA256 + ChaCha20Poly1305; every ciphertext is the random
//! 12-byte nonce followed by the AEAD output.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::identity::IdentityKeys;

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

const BOX_INFO: &[u8] = b"seguro_box_v1_key";
const GROUP_AAD: &[u8] = b"seguro_group_v1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext too short")]
    Truncated,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("invalid key bytes")]
    InvalidKeyBytes,
}

/// Authenticated encryption between two long-term key pairs.
pub trait PublicBox {
    fn seal(&self, peer_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn open(&self, peer_public: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Authenticated encryption under a shared symmetric key.
pub trait SecretBox {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Static-static X25519 box bound to one identity.
///
/// Both directions of a pair derive the same key: the HKDF salt is the two
/// public keys in sorted order.
pub struct CurveBox<'a> {
    secret: &'a StaticSecret,
    own_public: [u8; 32],
}

impl<'a> CurveBox<'a> {
    pub fn new(identity: &'a IdentityKeys) -> Self {
        Self {
            secret: identity.secret(),
            own_public: identity.public_bytes(),
        }
    }

    fn pair_key(&self, peer_public: &[u8; 32]) -> Result<(Zeroizing<[u8; KEY_LEN]>, [u8; 64]), CryptoError> {
        let shared = self
            .secret
            .diffie_hellman(&X25519PublicKey::from(*peer_public));
        // Low-order peer points give an all-zero secret.
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKeyBytes);
        }

        let (lo, hi) = if self.own_public <= *peer_public {
            (&self.own_public, peer_public)
        } else {
            (peer_public, &self.own_public)
        };
        let mut salt = [0u8; 64];
        salt[..32].copy_from_slice(lo);
        salt[32..].copy_from_slice(hi);

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(BOX_INFO, key.as_mut())
            .map_err(|_| CryptoError::EncryptFailed)?;
        Ok((key, salt))
    }
}

impl PublicBox for CurveBox<'_> {
    fn seal(&self, peer_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (key, salt) = self.pair_key(peer_public)?;
        seal_with(&key, plaintext, &salt)
    }

    fn open(&self, peer_public: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (key, salt) = self.pair_key(peer_public)?;
        open_with(&key, ciphertext, &salt)
    }
}

/// Symmetric key shared by every member of one group.
#[derive(Clone)]
pub struct GroupKey(Zeroizing<[u8; KEY_LEN]>);

impl GroupKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyBytes)?;
        Ok(Self(Zeroizing::new(arr)))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GroupKey(..)")
    }
}

impl SecretBox for GroupKey {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal_with(&self.0, plaintext, GROUP_AAD)
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open_with(&self.0, ciphertext, GROUP_AAD)
    }
}

fn seal_with(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

fn open_with(key: &[u8; KEY_LEN], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce, ct) = sealed.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad })
        .map_err(|_| CryptoError::DecryptFailed)
}
