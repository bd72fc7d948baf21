use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};

use seguro_proto::{
    wire::{
        ClientsOut, CreateGroupIn, DisconnectIn, GroupsOut, KeyOut, MessagesOut, PublishKeyIn,
        SendDmIn, SendGroupIn, StatusOut,
    },
    Meta, MessageRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("relay rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    #[error("bad response: {0}")]
    BadResponse(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Rejected { status: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Rejected { status: 409, .. })
    }
}

/// Thin typed wrapper over the relay's HTTP API.
#[derive(Clone)]
pub struct RelayClient {
    base_url: Url,
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = Url::parse(&base_url.into()).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        Ok(Self { base_url, client })
    }

    /// Appends `segments` to the base path. Each one is escaped on its own,
    /// so ids containing `/`, `?` or `#` stay a single segment.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn publish_key(&self, client_id: &str, pubkey_b64: &str) -> Result<(), ClientError> {
        let body = PublishKeyIn {
            client_id: client_id.to_owned(),
            pubkey_b64: pubkey_b64.to_owned(),
        };
        self.post::<_, StatusOut>(&["keys", "publish"], &body).await.map(drop)
    }

    pub async fn get_key(&self, client_id: &str) -> Result<String, ClientError> {
        let out: KeyOut = self.get(&["keys", client_id], &[]).await?;
        Ok(out.pubkey)
    }

    pub async fn list_clients(&self, exclude: Option<&str>) -> Result<Vec<String>, ClientError> {
        let query: Vec<(&str, String)> = exclude.map(|e| ("exclude", e.to_owned())).into_iter().collect();
        let out: ClientsOut = self.get(&["clients"], &query).await?;
        Ok(out.clients)
    }

    pub async fn send_dm(&self, to: &str, from: &str, blob: &str, meta: Option<Meta>) -> Result<(), ClientError> {
        let body = SendDmIn {
            to: to.to_owned(),
            from: from.to_owned(),
            blob: blob.to_owned(),
            meta,
        };
        self.post::<_, StatusOut>(&["messages"], &body).await.map(drop)
    }

    pub async fn fetch_pending(&self, client_id: &str, peek: bool) -> Result<Vec<MessageRecord>, ClientError> {
        let query = [
            ("client_id", client_id.to_owned()),
            ("mode", "pending".to_owned()),
            ("peek", peek.to_string()),
        ];
        let out: MessagesOut = self.get(&["messages"], &query).await?;
        Ok(out.messages)
    }

    pub async fn fetch_history(
        &self,
        client_id: &str,
        since_id: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, ClientError> {
        let mut query = vec![
            ("client_id", client_id.to_owned()),
            ("mode", "history".to_owned()),
        ];
        if let Some(since_id) = since_id {
            query.push(("since_id", since_id.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let out: MessagesOut = self.get(&["messages"], &query).await?;
        Ok(out.messages)
    }

    pub async fn create_group(&self, group_id: &str, members: &[String], admin: &str) -> Result<(), ClientError> {
        let body = CreateGroupIn {
            group_id: group_id.to_owned(),
            members: members.to_vec(),
            admin: admin.to_owned(),
        };
        self.post::<_, StatusOut>(&["groups"], &body).await.map(drop)
    }

    pub async fn list_groups(&self, member: &str) -> Result<Vec<String>, ClientError> {
        let out: GroupsOut = self.get(&["groups"], &[("member", member.to_owned())]).await?;
        Ok(out.groups)
    }

    pub async fn send_group_message(&self, group_id: &str, from: &str, blob: &str) -> Result<(), ClientError> {
        let body = SendGroupIn {
            from: from.to_owned(),
            blob: blob.to_owned(),
        };
        self.post::<_, StatusOut>(&["groups", group_id, "messages"], &body)
            .await
            .map(drop)
    }

    pub async fn disconnect(&self, client_id: &str) -> Result<(), ClientError> {
        let body = DisconnectIn {
            client_id: client_id.to_owned(),
        };
        self.post::<_, StatusOut>(&["disconnect"], &body).await.map(drop)
    }

    async fn get<T: DeserializeOwned>(&self, path: &[&str], query: &[(&str, String)]) -> Result<T, ClientError> {
        let resp = self
            .client
            .get(self.url(path)?)
            .query(query)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &[&str], body: &B) -> Result<T, ClientError> {
        let resp = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if status == StatusCode::OK {
            return resp
                .json::<T>()
                .await
                .map_err(|e| ClientError::BadResponse(e.to_string()));
        }

        let text = resp.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<StatusOut>(&text)
            .ok()
            .and_then(|s| s.reason)
            .unwrap_or(text);
        Err(ClientError::Rejected {
            status: status.as_u16(),
            reason,
        })
    }
}
