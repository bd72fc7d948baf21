//! Endpoint side of seguro: a typed client for the relay's HTTP API and a
//! chat client that keeps all crypto on this side of the wire.

#![forbid(unsafe_code)]

pub mod chat;
pub mod http;

pub use chat::{ChatClient, ChatError};
pub use http::{ClientError, RelayClient};
