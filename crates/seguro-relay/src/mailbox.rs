use seguro_proto::MessageRecord;
use std::{collections::VecDeque, sync::Arc};

/// Per-recipient store: the consumable pending queue, the cursor-addressed
/// history and the sequence counter shared by both.
///
/// The counter lives outside the two queues so evicting history never lets
/// an id be handed out twice.
#[derive(Debug)]
pub struct Mailbox {
    pub pending: VecDeque<MessageRecord>,
    pub history: VecDeque<MessageRecord>,
    pub next_sequence: u64,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            history: VecDeque::new(),
            next_sequence: 1,
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Appends to history, evicting the oldest entries beyond `max_history`.
    /// Returns how many were evicted.
    pub fn record(&mut self, entry: MessageRecord, max_history: usize) -> usize {
        self.history.push_back(entry);
        let mut evicted = 0;
        while self.history.len() > max_history {
            self.history.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Queues for a later pull. When the queue is full the oldest entry is
    /// dropped and returned.
    pub fn enqueue(&mut self, entry: MessageRecord, max_pending: usize) -> Option<MessageRecord> {
        self.pending.push_back(entry);
        if self.pending.len() > max_pending {
            self.pending.pop_front()
        } else {
            None
        }
    }

    pub fn drain_pending(&mut self) -> Vec<MessageRecord> {
        self.pending.drain(..).collect()
    }

    pub fn peek_pending(&self) -> Vec<MessageRecord> {
        self.pending.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Earliest `limit` history entries with `id > since`, oldest first.
    pub fn history_since(&self, since: Option<u64>, limit: usize) -> Vec<MessageRecord> {
        // History ids are ascending, so the cut point is a binary search.
        let start = match since {
            Some(since) => self.history.partition_point(|m| m.id <= since),
            None => 0,
        };
        self.history.range(start..).take(limit).cloned().collect()
    }
}

pub type MailboxMap = Arc<dashmap::DashMap<String, Mailbox>>;
