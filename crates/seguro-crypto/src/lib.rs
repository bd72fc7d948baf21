//! End-to-end protocol spoken between seguro endpoints.
//!
//! The relay only ever sees base64 blobs. This crate defines what is inside
//! them: `direct` envelopes sealed pairwise with a public-key box,
//! `group_key_distribution` envelopes that hand out a group's symmetric key,
//! and `group_ciphertext` envelopes sealed under that key.

#![forbid(unsafe_code)]

pub mod boxes;
pub mod envelope;
pub mod identity;
pub mod session;

#[cfg(test)]
mod proptests;

pub use boxes::{CryptoError, CurveBox, GroupKey, PublicBox, SecretBox};
pub use envelope::{Envelope, EnvelopeError};
pub use identity::{IdentityKeys, KeyError};
pub use session::{Inbound, Session, SessionError};
