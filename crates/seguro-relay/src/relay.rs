//! The relay's operation table, shared by every transport binding.
//!
//! Inputs are validated here, before any state is touched. Transports only
//! translate between their wire format and these calls.

use seguro_proto::{
    validate::{check_base64, check_id, unb64},
    Meta, MessageRecord, WireError,
};
use std::sync::Arc;
use tracing::debug;

use crate::config::ServerConfig;
use crate::connections::{Connection, ConnectionRegistry, Registration};
use crate::delivery::{Delivery, DeliveryEngine, DeliveryLimits, Outgoing};
use crate::error::RelayError;
use crate::groups::{Group, GroupDirectory};
use crate::keys::KeyRegistry;
use crate::mailbox::MailboxMap;
use crate::metrics::RelayMetrics;

const PUBLIC_KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct Relay {
    keys: KeyRegistry,
    connections: ConnectionRegistry,
    delivery: DeliveryEngine,
    groups: GroupDirectory,
    metrics: Arc<RelayMetrics>,
    max_blob_size: usize,
    history_limit_default: usize,
}

impl Relay {
    pub async fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let keys = match &config.key_mirror_path {
            Some(path) => KeyRegistry::with_mirror(path).await,
            None => KeyRegistry::new(),
        };
        let metrics = Arc::new(RelayMetrics::new()?);
        Ok(Self::with_parts(config, keys, metrics))
    }

    fn with_parts(config: &ServerConfig, keys: KeyRegistry, metrics: Arc<RelayMetrics>) -> Self {
        let mailboxes: MailboxMap = Arc::default();
        let connections = ConnectionRegistry::new(mailboxes.clone());
        let limits = DeliveryLimits {
            max_history: config.max_history_per_client,
            max_pending: config.max_pending_per_client,
            history_limit_max: config.history_limit_max,
        };
        let delivery = DeliveryEngine::new(mailboxes, connections.clone(), limits, Arc::clone(&metrics));
        let groups = GroupDirectory::new(delivery.clone());

        Self {
            keys,
            connections,
            delivery,
            groups,
            metrics,
            max_blob_size: config.max_blob_size,
            history_limit_default: config.history_limit_default,
        }
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub async fn publish_key(&self, client_id: &str, pubkey: &str) -> Result<(), RelayError> {
        self.reject(check_id("client_id", client_id))?;
        let raw = self.reject(unb64("pubkey", pubkey))?;
        if raw.len() != PUBLIC_KEY_LEN {
            self.metrics.error_counts.inc();
            return Err(RelayError::InvalidInput(format!(
                "invalid key encoding: expected {PUBLIC_KEY_LEN} bytes, got {}",
                raw.len()
            )));
        }
        self.keys.publish(client_id, pubkey).await;
        Ok(())
    }

    pub fn get_key(&self, client_id: &str) -> Result<String, RelayError> {
        self.reject(check_id("client_id", client_id))?;
        self.keys
            .lookup(client_id)
            .ok_or_else(|| RelayError::NotFound(format!("key for {client_id}")))
    }

    pub fn list_clients(&self, exclude: Option<&str>) -> Vec<String> {
        self.keys.list(exclude)
    }

    pub fn send_dm(&self, to: &str, from: &str, blob: &str, meta: Option<Meta>) -> Result<Delivery, RelayError> {
        self.reject(check_id("to", to))?;
        self.reject(check_id("from", from))?;
        self.check_blob(blob)?;
        Ok(self
            .delivery
            .deliver(to, Outgoing::direct(from, blob, meta.unwrap_or_default())))
    }

    pub fn fetch_pending(&self, client_id: &str, peek: bool) -> Result<Vec<MessageRecord>, RelayError> {
        self.reject(check_id("client_id", client_id))?;
        Ok(self.delivery.fetch_pending(client_id, peek))
    }

    pub fn fetch_history(
        &self,
        client_id: &str,
        since_id: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, RelayError> {
        self.reject(check_id("client_id", client_id))?;
        let limit = limit.unwrap_or(self.history_limit_default);
        Ok(self.delivery.fetch_history(client_id, since_id, limit))
    }

    pub fn create_group(&self, group_id: &str, members: Vec<String>, admin: &str) -> Result<Arc<Group>, RelayError> {
        self.reject(check_id("group_id", group_id))?;
        self.reject(check_id("admin", admin))?;
        for member in &members {
            self.reject(check_id("members", member))?;
        }
        let group = self.groups.create(Group::new(group_id, members, admin));
        if group.is_err() {
            self.metrics.error_counts.inc();
        }
        group
    }

    pub fn members_of(&self, group_id: &str) -> Result<Arc<Group>, RelayError> {
        self.groups.members_of(group_id)
    }

    pub fn list_groups(&self, member: &str) -> Result<Vec<String>, RelayError> {
        self.reject(check_id("member", member))?;
        Ok(self.groups.groups_for(member))
    }

    /// Returns how many members the message was delivered to.
    pub fn send_group_message(&self, group_id: &str, from: &str, blob: &str) -> Result<usize, RelayError> {
        self.reject(check_id("group_id", group_id))?;
        self.reject(check_id("from", from))?;
        self.check_blob(blob)?;
        let deliveries = self.groups.fanout(group_id, from, blob).map_err(|e| {
            self.metrics.error_counts.inc();
            e
        })?;
        self.metrics.fanout_recipients.observe(deliveries.len() as f64);
        Ok(deliveries.len())
    }

    /// Drops the live connection for `client_id`, if any. Always succeeds.
    pub fn disconnect(&self, client_id: &str) -> Result<(), RelayError> {
        self.reject(check_id("client_id", client_id))?;
        let had_connection = self.connections.disconnect(client_id);
        debug!(client_id, had_connection, "disconnect");
        Ok(())
    }

    /// Handshake for a push channel. Pending entries move into the returned
    /// queue.
    pub fn register(&self, client_id: &str) -> Result<Registration, RelayError> {
        self.reject(check_id("client_id", client_id))?;
        Ok(self.connections.register(client_id))
    }

    pub fn unregister(&self, connection: &Connection) -> bool {
        self.connections.unregister(connection)
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.connections.is_connected(client_id)
    }

    /// Refreshes the gauges and renders every metric family.
    pub fn export_metrics(&self) -> Result<String, prometheus::Error> {
        self.metrics.published_keys.set(self.keys.len() as f64);
        self.metrics.live_connections.set(self.connections.len() as f64);
        self.metrics.pending_messages.set(self.delivery.pending_total() as f64);
        self.metrics.groups.set(self.groups.len() as f64);
        self.metrics.export_prometheus()
    }

    fn check_blob(&self, blob: &str) -> Result<(), RelayError> {
        if blob.len() > self.max_blob_size {
            return self.reject(Err(WireError::TooLarge {
                field: "blob",
                max: self.max_blob_size,
            }));
        }
        self.reject(check_base64("blob", blob))
    }

    fn reject<T>(&self, result: Result<T, WireError>) -> Result<T, RelayError> {
        result.map_err(|e| {
            self.metrics.error_counts.inc();
            RelayError::from(e)
        })
    }
}

#[cfg(test)]
impl Relay {
    pub(crate) fn for_tests(config: &ServerConfig) -> Self {
        let metrics = Arc::new(RelayMetrics::new().expect("metrics registry"));
        Self::with_parts(config, KeyRegistry::new(), metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    #[tokio::test]
    async fn publish_rejects_bad_keys() {
        let relay = Relay::for_tests(&ServerConfig::default());
        assert!(matches!(
            relay.publish_key("alice", "not-base64").await,
            Err(RelayError::InvalidInput(_))
        ));
        assert!(matches!(
            relay.publish_key("alice", "Zm9v").await,
            Err(RelayError::InvalidInput(_))
        ));
        assert!(relay.publish_key("alice", KEY).await.is_ok());
        assert_eq!(relay.get_key("alice").unwrap(), KEY);
    }

    #[test]
    fn invalid_dm_leaves_no_trace() {
        let relay = Relay::for_tests(&ServerConfig::default());
        assert!(relay.send_dm("alice", "bob", "%%%", None).is_err());
        assert!(relay.send_dm("", "bob", "Zm9v", None).is_err());
        assert!(relay.fetch_history("alice", None, None).unwrap().is_empty());
    }

    #[test]
    fn oversized_blob_is_rejected() {
        let config = ServerConfig {
            max_blob_size: 8,
            ..ServerConfig::default()
        };
        let relay = Relay::for_tests(&config);
        assert!(relay.send_dm("alice", "bob", "Zm9vYmFyYmF6", None).is_err());
        assert!(relay.send_dm("alice", "bob", "Zm9v", None).is_ok());
    }

    #[test]
    fn unknown_key_is_not_found() {
        let relay = Relay::for_tests(&ServerConfig::default());
        assert!(matches!(relay.get_key("nobody"), Err(RelayError::NotFound(_))));
    }
}
