use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached by the sender. Opaque to the relay.
pub type Meta = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Dm,
    Group,
}

/// A message as stored for, and handed to, exactly one recipient.
///
/// `id` is the recipient-local sequence number. Two recipients of the same
/// group message see unrelated ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    /// Unix time in seconds.
    pub ts: f64,
    pub from: String,
    /// Base64 ciphertext, never decoded by the relay.
    pub blob: String,
    #[serde(default)]
    pub meta: Meta,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl MessageRecord {
    pub fn is_group(&self) -> bool {
        self.kind == MessageKind::Group
    }
}
