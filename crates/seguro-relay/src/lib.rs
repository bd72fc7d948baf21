pub mod api;
pub mod config;
pub mod connections;
pub mod delivery;
pub mod error;
pub mod groups;
pub mod keys;
pub mod line;
pub mod mailbox;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod tls;
pub mod ws;

#[cfg(test)]
mod delivery_props;

pub use error::RelayError;
pub use relay::Relay;
pub use server::RelayServer;
