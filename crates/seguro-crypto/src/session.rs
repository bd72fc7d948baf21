//! Endpoint-side conversation state.
//!
//! A `Session` turns outgoing text into blobs and incoming relay records into
//! visible chat lines. It never fails on inbound data: anything it cannot
//! open becomes an undecryptable placeholder and processing continues.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use seguro_proto::MessageRecord;
use tracing::{debug, warn};

use crate::boxes::GroupKey;
use crate::envelope::{Envelope, EnvelopeError};
use crate::identity::IdentityKeys;

pub const UNDECRYPTABLE: &str = "[undecryptable message]";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    #[error("no key for group {0} yet")]
    MissingGroupKey(String),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Private,
    Group,
}

/// One visible line. `from` is `None` for local notices.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub ts: f64,
    pub from: Option<String>,
    pub text: String,
}

#[derive(Debug)]
pub struct Conversation {
    pub kind: ConversationKind,
    pub lines: Vec<ChatLine>,
    group_key: Option<GroupKey>,
}

impl Conversation {
    fn new(kind: ConversationKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
            group_key: None,
        }
    }
}

/// What an inbound record turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Chat {
        conversation: String,
        from: String,
        text: String,
    },
    /// A group key arrived. The distribution itself is never shown.
    GroupJoined { group_id: String, from: String },
    Undecryptable {
        conversation: String,
        from: String,
        reason: String,
    },
}

/// A sealed group key addressed to one member.
#[derive(Debug, Clone)]
pub struct KeyDistribution {
    pub member: String,
    pub blob: String,
}

pub struct Session {
    client_id: String,
    identity: IdentityKeys,
    conversations: BTreeMap<String, Conversation>,
    cursor: u64,
}

impl Session {
    pub fn new(client_id: impl Into<String>, identity: IdentityKeys) -> Self {
        Self {
            client_id: client_id.into(),
            identity,
            conversations: BTreeMap::new(),
            cursor: 0,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn identity(&self) -> &IdentityKeys {
        &self.identity
    }

    /// Highest record id seen so far; pass as `since_id` when syncing history.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn conversation(&self, name: &str) -> Option<&Conversation> {
        self.conversations.get(name)
    }

    pub fn has_group_key(&self, group_id: &str) -> bool {
        self.conversations
            .get(group_id)
            .is_some_and(|c| c.group_key.is_some())
    }

    pub fn seal_direct(
        &mut self,
        peer: &str,
        peer_public: &[u8; 32],
        text: &str,
    ) -> Result<String, SessionError> {
        let blob = Envelope::seal_direct(&self.identity, peer_public, text.as_bytes())?.to_blob()?;
        let me = self.client_id.clone();
        self.push_line(peer, ConversationKind::Private, Some(me), text.to_owned());
        Ok(blob)
    }

    /// Generates a fresh key for `group_id` and seals it to every member
    /// except this endpoint.
    pub fn group_key_distributions(
        &mut self,
        group_id: &str,
        members: &[(String, [u8; 32])],
    ) -> Result<Vec<KeyDistribution>, SessionError> {
        let key = GroupKey::generate();
        let mut out = Vec::with_capacity(members.len());
        for (member, public) in members {
            if *member == self.client_id {
                continue;
            }
            let blob = Envelope::seal_group_key(&self.identity, public, group_id, &key)?.to_blob()?;
            out.push(KeyDistribution {
                member: member.clone(),
                blob,
            });
        }

        let conv = self
            .conversations
            .entry(group_id.to_owned())
            .or_insert_with(|| Conversation::new(ConversationKind::Group));
        conv.group_key = Some(key);
        conv.lines.push(ChatLine {
            ts: unix_now(),
            from: None,
            text: format!("created group {group_id}"),
        });
        Ok(out)
    }

    pub fn seal_group(&mut self, group_id: &str, text: &str) -> Result<String, SessionError> {
        let conv = self
            .conversations
            .get_mut(group_id)
            .filter(|c| c.kind == ConversationKind::Group)
            .ok_or_else(|| SessionError::UnknownGroup(group_id.to_owned()))?;
        let key = conv
            .group_key
            .as_ref()
            .ok_or_else(|| SessionError::MissingGroupKey(group_id.to_owned()))?;

        let blob = Envelope::seal_group(key, text.as_bytes())?.to_blob()?;
        conv.lines.push(ChatLine {
            ts: unix_now(),
            from: Some(self.client_id.clone()),
            text: text.to_owned(),
        });
        Ok(blob)
    }

    /// Opens one relay record and appends the result to its conversation.
    pub fn open(&mut self, record: &MessageRecord) -> Inbound {
        self.cursor = self.cursor.max(record.id);

        let (conversation, kind) = match (&record.group_id, record.is_group()) {
            (Some(group_id), true) => (group_id.clone(), ConversationKind::Group),
            _ => (record.from.clone(), ConversationKind::Private),
        };

        let inbound = match self.open_envelope(record, &conversation) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(from = %record.from, id = record.id, error = %err, "undecryptable message");
                Inbound::Undecryptable {
                    conversation: conversation.clone(),
                    from: record.from.clone(),
                    reason: err.to_string(),
                }
            }
        };

        match &inbound {
            Inbound::Chat { from, text, .. } => {
                let line = (Some(from.clone()), text.clone());
                self.push_line_at(record.ts, &conversation, kind, line);
            }
            Inbound::GroupJoined { group_id, from } => {
                let notice = format!("joined group {group_id} (key from {from})");
                self.push_line_at(record.ts, group_id, ConversationKind::Group, (None, notice));
            }
            Inbound::Undecryptable { from, .. } => {
                let line = (Some(from.clone()), UNDECRYPTABLE.to_owned());
                self.push_line_at(record.ts, &conversation, kind, line);
            }
        }
        inbound
    }

    /// Opens every record newer than the cursor, in order.
    pub fn ingest<'a, I>(&mut self, records: I) -> Vec<Inbound>
    where
        I: IntoIterator<Item = &'a MessageRecord>,
    {
        let mut out = Vec::new();
        for record in records {
            if record.id <= self.cursor {
                debug!(id = record.id, cursor = self.cursor, "skipping already seen record");
                continue;
            }
            out.push(self.open(record));
        }
        out
    }

    fn open_envelope(
        &mut self,
        record: &MessageRecord,
        conversation: &str,
    ) -> Result<Inbound, SessionError> {
        let envelope = Envelope::from_blob(&record.blob)?;
        match envelope {
            Envelope::Direct { .. } => {
                let bytes = envelope.open_direct(&self.identity)?;
                Ok(Inbound::Chat {
                    conversation: conversation.to_owned(),
                    from: record.from.clone(),
                    text: utf8(bytes)?,
                })
            }
            Envelope::GroupKeyDistribution { .. } => {
                let (group_id, key) = envelope.open_group_key(&self.identity)?;
                let conv = self
                    .conversations
                    .entry(group_id.clone())
                    .or_insert_with(|| Conversation::new(ConversationKind::Group));
                conv.kind = ConversationKind::Group;
                conv.group_key = Some(key);
                Ok(Inbound::GroupJoined {
                    group_id,
                    from: record.from.clone(),
                })
            }
            Envelope::GroupCiphertext { .. } => {
                let key = self
                    .conversations
                    .get(conversation)
                    .and_then(|c| c.group_key.as_ref())
                    .ok_or_else(|| SessionError::MissingGroupKey(conversation.to_owned()))?;
                let bytes = envelope.open_group(key)?;
                Ok(Inbound::Chat {
                    conversation: conversation.to_owned(),
                    from: record.from.clone(),
                    text: utf8(bytes)?,
                })
            }
        }
    }

    fn push_line(&mut self, conversation: &str, kind: ConversationKind, from: Option<String>, text: String) {
        self.push_line_at(unix_now(), conversation, kind, (from, text));
    }

    fn push_line_at(
        &mut self,
        ts: f64,
        conversation: &str,
        kind: ConversationKind,
        (from, text): (Option<String>, String),
    ) {
        self.conversations
            .entry(conversation.to_owned())
            .or_insert_with(|| Conversation::new(kind))
            .lines
            .push(ChatLine { ts, from, text });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("cursor", &self.cursor)
            .field("conversations", &self.conversations.len())
            .finish()
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String, SessionError> {
    String::from_utf8(bytes)
        .map_err(|_| SessionError::Envelope(EnvelopeError::Encoding("plaintext is not utf-8".into())))
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
