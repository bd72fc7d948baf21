//! Live push connections, at most one per client id.
//!
//! A connection is just the sending half of an unbounded channel. The
//! transport task that owns the receiving half writes frames to the socket
//! and calls [`ConnectionRegistry::unregister`] when the socket goes away.

use dashmap::DashMap;
use seguro_proto::MessageRecord;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::mailbox::{Mailbox, MailboxMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer handshake for the same client id took over.
    Replaced,
    /// The client asked to disconnect.
    Disconnected,
}

#[derive(Debug)]
pub enum Outbound {
    Deliver(MessageRecord),
    Close(CloseReason),
}

/// The transport task behind a connection has dropped its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("push channel closed")]
pub struct ChannelClosed;

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: u64,
    pub client_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Hands a record to the transport task. Fails only when that task is
    /// gone.
    pub fn push(&self, entry: MessageRecord) -> Result<(), ChannelClosed> {
        self.tx
            .send(Outbound::Deliver(entry))
            .map_err(|_| ChannelClosed)
    }

    fn close(&self, reason: CloseReason) {
        let _ = self.tx.send(Outbound::Close(reason));
    }
}

/// Result of a handshake: the connection handle plus the queue the transport
/// drains. `drained` counts the pending entries already waiting in it.
pub struct Registration {
    pub connection: Connection,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub drained: usize,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, Connection>>,
    mailboxes: MailboxMap,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new(mailboxes: MailboxMap) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            mailboxes,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a live connection for `client_id` and moves every pending
    /// entry into its queue, in order. A previous connection for the same
    /// id is told to close.
    pub fn register(&self, client_id: &str) -> Registration {
        let (tx, outbound) = mpsc::unbounded_channel();
        let connection = Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            client_id: client_id.to_owned(),
            tx,
        };

        // Mailbox entry first, then the connection entry. `deliver` takes
        // them in the same order, so no entry can land in pending after the
        // drain while this connection is live.
        let mut mailbox = self
            .mailboxes
            .entry(client_id.to_owned())
            .or_insert_with(Mailbox::new);
        let pending = mailbox.drain_pending();
        let drained = pending.len();
        for entry in pending {
            // The receiver is still in our hands, this cannot fail.
            let _ = connection.push(entry);
        }
        let previous = self
            .connections
            .insert(client_id.to_owned(), connection.clone());
        drop(mailbox);

        if let Some(previous) = previous {
            info!(client_id, old = previous.id, new = connection.id, "connection replaced");
            previous.close(CloseReason::Replaced);
        }
        debug!(client_id, connection = connection.id, drained, "connection registered");

        Registration {
            connection,
            outbound,
            drained,
        }
    }

    /// Removes `connection` if it is still the registered one for its id.
    /// Returns whether anything was removed.
    pub fn unregister(&self, connection: &Connection) -> bool {
        let removed = self
            .connections
            .remove_if(&connection.client_id, |_, current| current.id == connection.id)
            .is_some();
        if removed {
            debug!(client_id = %connection.client_id, connection = connection.id, "connection unregistered");
        }
        removed
    }

    /// Drops whatever connection is registered for `client_id`. Idempotent.
    pub fn disconnect(&self, client_id: &str) -> bool {
        match self.connections.remove(client_id) {
            Some((_, connection)) => {
                connection.close(CloseReason::Disconnected);
                info!(client_id, connection = connection.id, "client disconnected");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Connection> {
        self.connections.get(client_id).map(|c| c.value().clone())
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.connections.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
