//! Request and response bodies for the three relay bindings.
//!
//! HTTP bodies mirror the JSON the HTTP API accepts; `LineRequest` /
//! `LineResponse` are the newline-delimited objects of the TLS line protocol;
//! `ClientFrame` / `ServerFrame` travel over the WebSocket push channel.

use serde::{Deserialize, Serialize};

use crate::records::{Meta, MessageRecord};

// ---------- HTTP ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishKeyIn {
    pub client_id: String,
    pub pubkey_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOut {
    pub client_id: String,
    pub pubkey: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientsOut {
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDmIn {
    pub to: String,
    pub from: String,
    pub blob: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesOut {
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Pending,
    History,
}

/// Query string of `GET /messages`. `peek` only applies to pending mode,
/// `since_id` and `limit` only to history mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchQuery {
    pub client_id: String,
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub peek: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupIn {
    pub group_id: String,
    pub members: Vec<String>,
    pub admin: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupsOut {
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGroupIn {
    pub from: String,
    pub blob: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectIn {
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOut {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusOut {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            reason: None,
        }
    }
}

// ---------- Line protocol ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

/// One request line. Older client spellings are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineRequest {
    PublishKey {
        client_id: String,
        #[serde(alias = "pubkey_b64")]
        pubkey: String,
    },
    GetKey {
        client_id: String,
    },
    #[serde(alias = "list_all")]
    ListClients {
        #[serde(default)]
        client_id: Option<String>,
    },
    #[serde(alias = "send_blob")]
    SendDm {
        to: String,
        from: String,
        blob: String,
        #[serde(default)]
        meta: Option<Meta>,
    },
    #[serde(alias = "fetch_blobs")]
    FetchPending {
        client_id: String,
        #[serde(default)]
        peek: bool,
    },
    FetchHistory {
        client_id: String,
        #[serde(default)]
        since_id: Option<u64>,
        #[serde(default)]
        limit: Option<usize>,
    },
    CreateGroup {
        group_id: String,
        members: Vec<String>,
        admin: String,
    },
    ListGroups {
        member: String,
    },
    #[serde(alias = "send_group_blob")]
    SendGroupMessage {
        group_id: String,
        from: String,
        blob: String,
    },
    Disconnect {
        client_id: String,
    },
}

/// One response line: `{"status":"ok", ...}` or `{"status":"error","reason":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageRecord>>,
}

impl LineResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            reason: None,
            message: Some(message.into()),
            client_id: None,
            pubkey: None,
            clients: None,
            groups: None,
            messages: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            reason: Some(reason.into()),
            message: None,
            client_id: None,
            pubkey: None,
            clients: None,
            groups: None,
            messages: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

// ---------- Push channel ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello { client_id: String },
    /// Keep-alive. Anything else the client sends is ignored as well.
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after the hello was accepted. `drained` counts the pending
    /// entries that follow immediately.
    Ready { client_id: String, drained: usize },
    Message { message: MessageRecord },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_request_names_parse() {
        let req: LineRequest =
            serde_json::from_str(r#"{"type":"send_blob","to":"a","from":"b","blob":"Zm9v"}"#)
                .unwrap();
        assert!(matches!(req, LineRequest::SendDm { meta: None, .. }));

        let req: LineRequest =
            serde_json::from_str(r#"{"type":"fetch_blobs","client_id":"a"}"#).unwrap();
        assert!(matches!(req, LineRequest::FetchPending { peek: false, .. }));

        let req: LineRequest = serde_json::from_str(r#"{"type":"list_all"}"#).unwrap();
        assert!(matches!(req, LineRequest::ListClients { client_id: None }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<LineRequest>(r#"{"type":"launch_missiles"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn error_line_omits_empty_fields() {
        let json = serde_json::to_string(&LineResponse::error("group not found")).unwrap();
        assert_eq!(json, r#"{"status":"error","reason":"group not found"}"#);
    }

    #[test]
    fn fetch_query_defaults_to_consuming_pending() {
        let q: FetchQuery = serde_json::from_str(r#"{"client_id":"alice"}"#).unwrap();
        assert_eq!(q.mode, FetchMode::Pending);
        assert!(!q.peek);
        assert!(q.since_id.is_none());
    }
}
