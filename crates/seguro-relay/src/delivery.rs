use seguro_proto::{Meta, MessageKind, MessageRecord};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

use crate::connections::ConnectionRegistry;
use crate::mailbox::{Mailbox, MailboxMap};
use crate::metrics::RelayMetrics;

#[derive(Debug, Clone, Copy)]
pub struct DeliveryLimits {
    pub max_history: usize,
    pub max_pending: usize,
    pub history_limit_max: usize,
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            max_pending: 1_000,
            history_limit_max: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Pushed,
    Queued,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub entry: MessageRecord,
    pub route: Route,
}

/// What to deliver, before the recipient's sequence id is assigned.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub from: String,
    pub blob: String,
    pub meta: Meta,
    pub group_id: Option<String>,
}

impl Outgoing {
    pub fn direct(from: impl Into<String>, blob: impl Into<String>, meta: Meta) -> Self {
        Self {
            from: from.into(),
            blob: blob.into(),
            meta,
            group_id: None,
        }
    }

    pub fn group(group_id: impl Into<String>, from: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            blob: blob.into(),
            meta: Meta::new(),
            group_id: Some(group_id.into()),
        }
    }
}

#[derive(Clone)]
pub struct DeliveryEngine {
    mailboxes: MailboxMap,
    connections: ConnectionRegistry,
    limits: DeliveryLimits,
    metrics: Arc<RelayMetrics>,
}

impl DeliveryEngine {
    pub fn new(
        mailboxes: MailboxMap,
        connections: ConnectionRegistry,
        limits: DeliveryLimits,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            mailboxes,
            connections,
            limits,
            metrics,
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Stamps `message` for `recipient`, records it in history and then
    /// either pushes it to the live connection or queues it.
    ///
    /// If the connection turns out to be closed it is unregistered and the
    /// entry is queued instead. Once a push succeeds, a later socket write
    /// failure loses the message on that channel; history still has it.
    pub fn deliver(&self, recipient: &str, message: Outgoing) -> Delivery {
        let mut mailbox = self
            .mailboxes
            .entry(recipient.to_owned())
            .or_insert_with(Mailbox::new);

        let entry = MessageRecord {
            id: mailbox.next_sequence(),
            ts: unix_now(),
            from: message.from,
            blob: message.blob,
            meta: message.meta,
            kind: if message.group_id.is_some() {
                MessageKind::Group
            } else {
                MessageKind::Dm
            },
            group_id: message.group_id,
        };

        let evicted = mailbox.record(entry.clone(), self.limits.max_history);
        if evicted > 0 {
            self.metrics.history_evicted.inc_by(evicted as f64);
        }

        let unsent = match self.connections.get(recipient) {
            Some(connection) => match connection.push(entry.clone()) {
                Ok(()) => None,
                Err(_) => {
                    warn!(recipient, connection = connection.id, "push channel closed, queueing instead");
                    self.connections.unregister(&connection);
                    Some(entry.clone())
                }
            },
            None => Some(entry.clone()),
        };

        let route = match unsent {
            None => {
                self.metrics.messages_pushed.inc();
                Route::Pushed
            }
            Some(unsent) => {
                if let Some(dropped) = mailbox.enqueue(unsent, self.limits.max_pending) {
                    warn!(recipient, dropped = dropped.id, "pending queue full, dropped oldest entry");
                    self.metrics.pending_dropped.inc();
                }
                self.metrics.messages_queued.inc();
                Route::Queued
            }
        };
        drop(mailbox);

        debug!(recipient, id = entry.id, ?route, "delivered");
        Delivery { entry, route }
    }

    /// Pending entries for `client_id`, oldest first. Consumes them unless
    /// `peek` is set.
    pub fn fetch_pending(&self, client_id: &str, peek: bool) -> Vec<MessageRecord> {
        let Some(mut mailbox) = self.mailboxes.get_mut(client_id) else {
            return Vec::new();
        };
        if peek {
            return mailbox.peek_pending();
        }
        let drained = mailbox.drain_pending();
        drop(mailbox);

        self.metrics.messages_fetched.inc_by(drained.len() as f64);
        drained
    }

    /// History entries newer than `since_id`, oldest first, at most `limit`
    /// (clamped to `1..=history_limit_max`). Never mutates.
    pub fn fetch_history(&self, client_id: &str, since_id: Option<u64>, limit: usize) -> Vec<MessageRecord> {
        let limit = limit.clamp(1, self.limits.history_limit_max);
        match self.mailboxes.get(client_id) {
            Some(mailbox) => mailbox.history_since(since_id, limit),
            None => Vec::new(),
        }
    }

    pub fn limits(&self) -> DeliveryLimits {
        self.limits
    }

    pub fn pending_total(&self) -> usize {
        self.mailboxes.iter().map(|e| e.value().pending_len()).sum()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::Outbound;

    fn engine(limits: DeliveryLimits) -> DeliveryEngine {
        let mailboxes: MailboxMap = Arc::default();
        let connections = ConnectionRegistry::new(mailboxes.clone());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        DeliveryEngine::new(mailboxes, connections, limits, metrics)
    }

    fn dm(from: &str, blob: &str) -> Outgoing {
        Outgoing::direct(from, blob, Meta::new())
    }

    #[test]
    fn offline_recipient_gets_queued() {
        let engine = engine(DeliveryLimits::default());
        let d = engine.deliver("alice", dm("bob", "Zm9v"));
        assert_eq!(d.route, Route::Queued);
        assert_eq!(d.entry.id, 1);
        assert_eq!(d.entry.kind, MessageKind::Dm);

        let pending = engine.fetch_pending("alice", false);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from, "bob");
        assert_eq!(pending[0].blob, "Zm9v");
    }

    #[test]
    fn online_recipient_gets_pushed_and_history() {
        let engine = engine(DeliveryLimits::default());
        let mut reg = engine.connections().register("alice");

        let d = engine.deliver("alice", dm("bob", "Zm9v"));
        assert_eq!(d.route, Route::Pushed);
        assert!(matches!(reg.outbound.try_recv(), Ok(Outbound::Deliver(m)) if m.id == 1));
        assert!(engine.fetch_pending("alice", true).is_empty());
        assert_eq!(engine.fetch_history("alice", None, 10).len(), 1);
    }

    #[test]
    fn dead_channel_falls_back_to_pending() {
        let engine = engine(DeliveryLimits::default());
        let reg = engine.connections().register("alice");
        drop(reg.outbound);

        let d = engine.deliver("alice", dm("bob", "Zm9v"));
        assert_eq!(d.route, Route::Queued);
        assert!(!engine.connections().is_connected("alice"));
        assert_eq!(engine.metrics.messages_pushed.get(), 0.0);
        assert_eq!(engine.metrics.messages_queued.get(), 1.0);
        assert_eq!(engine.fetch_pending("alice", false).len(), 1);
    }

    #[test]
    fn history_limit_is_clamped() {
        let engine = engine(DeliveryLimits {
            history_limit_max: 3,
            ..DeliveryLimits::default()
        });
        for _ in 0..5 {
            engine.deliver("alice", dm("bob", "Zm9v"));
        }
        assert_eq!(engine.fetch_history("alice", None, 0).len(), 1);
        assert_eq!(engine.fetch_history("alice", None, 100).len(), 3);
    }

    #[test]
    fn pending_overflow_keeps_newest() {
        let engine = engine(DeliveryLimits {
            max_pending: 2,
            ..DeliveryLimits::default()
        });
        for _ in 0..4 {
            engine.deliver("alice", dm("bob", "Zm9v"));
        }
        let ids: Vec<u64> = engine.fetch_pending("alice", false).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4]);
        // Dropped entries are still in history.
        assert_eq!(engine.fetch_history("alice", None, 10).len(), 4);
    }

    #[test]
    fn unknown_client_has_nothing() {
        let engine = engine(DeliveryLimits::default());
        assert!(engine.fetch_pending("ghost", false).is_empty());
        assert!(engine.fetch_history("ghost", Some(3), 10).is_empty());
    }
}
