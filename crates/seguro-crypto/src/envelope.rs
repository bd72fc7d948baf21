//! Envelope formats carried inside relay blobs.
//!
//! A blob is standard base64 of a JSON object whose `type` field selects one
//! of the three envelope kinds. Binary fields inside the object are base64 too.

use serde::{Deserialize, Serialize};

use seguro_proto::validate::{b64, unb64};

use crate::boxes::{CryptoError, CurveBox, GroupKey, PublicBox, SecretBox};
use crate::identity::{parse_public_key, IdentityKeys, KeyError};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Encoding(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("expected {expected} envelope, got {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Pairwise message. The recipient opens it with its own secret and
    /// `sender_pub`.
    Direct {
        sender_pub: String,
        ciphertext: String,
    },
    /// Control-plane message handing a group's symmetric key to one member.
    GroupKeyDistribution {
        group_id: String,
        sender_pub: String,
        key_ciphertext: String,
    },
    /// Group message under the shared group key. Carries no sender identity;
    /// receivers rely on the relay's `from` field.
    GroupCiphertext { ciphertext: String },
}

impl Envelope {
    pub fn seal_direct(
        sender: &IdentityKeys,
        recipient_pub: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Self, EnvelopeError> {
        let ct = CurveBox::new(sender).seal(recipient_pub, plaintext)?;
        Ok(Envelope::Direct {
            sender_pub: sender.public_b64(),
            ciphertext: b64(&ct),
        })
    }

    pub fn seal_group_key(
        sender: &IdentityKeys,
        recipient_pub: &[u8; 32],
        group_id: &str,
        key: &GroupKey,
    ) -> Result<Self, EnvelopeError> {
        let ct = CurveBox::new(sender).seal(recipient_pub, key.as_bytes())?;
        Ok(Envelope::GroupKeyDistribution {
            group_id: group_id.to_owned(),
            sender_pub: sender.public_b64(),
            key_ciphertext: b64(&ct),
        })
    }

    pub fn seal_group(key: &GroupKey, plaintext: &[u8]) -> Result<Self, EnvelopeError> {
        let ct = key.seal(plaintext)?;
        Ok(Envelope::GroupCiphertext {
            ciphertext: b64(&ct),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Direct { .. } => "direct",
            Envelope::GroupKeyDistribution { .. } => "group_key_distribution",
            Envelope::GroupCiphertext { .. } => "group_ciphertext",
        }
    }

    pub fn to_blob(&self) -> Result<String, EnvelopeError> {
        let json = serde_json::to_vec(self).map_err(|e| EnvelopeError::Encoding(e.to_string()))?;
        Ok(b64(&json))
    }

    pub fn from_blob(blob: &str) -> Result<Self, EnvelopeError> {
        let json = unb64("blob", blob).map_err(|e| EnvelopeError::Encoding(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| EnvelopeError::Encoding(e.to_string()))
    }

    pub fn open_direct(&self, recipient: &IdentityKeys) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Envelope::Direct {
                sender_pub,
                ciphertext,
            } => {
                let peer = parse_public_key(sender_pub)?;
                let ct = decode_field("ciphertext", ciphertext)?;
                Ok(CurveBox::new(recipient).open(&peer, &ct)?)
            }
            other => Err(other.wrong_kind("direct")),
        }
    }

    /// Returns the group id and the key it distributes.
    pub fn open_group_key(
        &self,
        recipient: &IdentityKeys,
    ) -> Result<(String, GroupKey), EnvelopeError> {
        match self {
            Envelope::GroupKeyDistribution {
                group_id,
                sender_pub,
                key_ciphertext,
            } => {
                let peer = parse_public_key(sender_pub)?;
                let ct = decode_field("key_ciphertext", key_ciphertext)?;
                let raw = zeroize::Zeroizing::new(CurveBox::new(recipient).open(&peer, &ct)?);
                Ok((group_id.clone(), GroupKey::from_slice(&raw)?))
            }
            other => Err(other.wrong_kind("group_key_distribution")),
        }
    }

    pub fn open_group(&self, key: &GroupKey) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Envelope::GroupCiphertext { ciphertext } => {
                let ct = decode_field("ciphertext", ciphertext)?;
                Ok(key.open(&ct)?)
            }
            other => Err(other.wrong_kind("group_ciphertext")),
        }
    }

    fn wrong_kind(&self, expected: &'static str) -> EnvelopeError {
        EnvelopeError::WrongKind {
            expected,
            found: self.kind(),
        }
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    unb64(field, value).map_err(|e| EnvelopeError::Encoding(e.to_string()))
}
