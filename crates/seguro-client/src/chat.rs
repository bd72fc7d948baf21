use seguro_crypto::{
    identity::parse_public_key,
    session::{Inbound, Session, SessionError},
    IdentityKeys, KeyError,
};
use tracing::{debug, info, warn};

use crate::http::{ClientError, RelayClient};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Relay(#[from] ClientError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("bad key for {peer}: {source}")]
    PeerKey { peer: String, source: KeyError },
}

/// A chat endpoint: relay client plus local session state.
pub struct ChatClient {
    relay: RelayClient,
    session: Session,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>, identity: IdentityKeys) -> Result<Self, ChatError> {
        Ok(Self {
            relay: RelayClient::new(base_url)?,
            session: Session::new(client_id, identity),
        })
    }

    pub fn client_id(&self) -> &str {
        self.session.client_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    pub async fn publish(&self) -> Result<(), ChatError> {
        let pubkey = self.session.identity().public_b64();
        self.relay.publish_key(self.client_id(), &pubkey).await?;
        Ok(())
    }

    /// Everyone else with a published key.
    pub async fn peers(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.relay.list_clients(Some(self.client_id())).await?)
    }

    pub async fn send_private(&mut self, peer: &str, text: &str) -> Result<(), ChatError> {
        let peer_public = self.peer_key(peer).await?;
        let blob = self.session.seal_direct(peer, &peer_public, text)?;
        let me = self.client_id().to_owned();
        self.relay.send_dm(peer, &me, &blob, None).await?;
        Ok(())
    }

    /// Creates the group on the relay, then hands the group key to every
    /// member with a published key. Returns the members that got one.
    pub async fn create_group(&mut self, group_id: &str, members: &[String]) -> Result<Vec<String>, ChatError> {
        let me = self.client_id().to_owned();
        self.relay.create_group(group_id, members, &me).await?;

        let mut keyed = Vec::with_capacity(members.len());
        for member in members.iter().filter(|m| **m != me) {
            match self.peer_key(member).await {
                Ok(public) => keyed.push((member.clone(), public)),
                Err(ChatError::Relay(e)) if e.is_not_found() => {
                    warn!(group_id, member = %member, "member has no published key, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        let distributions = self.session.group_key_distributions(group_id, &keyed)?;
        let mut sent = Vec::with_capacity(distributions.len());
        for dist in distributions {
            self.relay.send_dm(&dist.member, &me, &dist.blob, None).await?;
            sent.push(dist.member);
        }
        info!(group_id, members = sent.len(), "group key distributed");
        Ok(sent)
    }

    pub async fn send_group(&mut self, group_id: &str, text: &str) -> Result<(), ChatError> {
        let blob = self.session.seal_group(group_id, text)?;
        let me = self.client_id().to_owned();
        self.relay.send_group_message(group_id, &me, &blob).await?;
        Ok(())
    }

    /// Pulls history past the local cursor until caught up.
    pub async fn sync(&mut self) -> Result<Vec<Inbound>, ChatError> {
        let me = self.client_id().to_owned();
        let mut out = Vec::new();
        loop {
            let since = Some(self.session.cursor());
            let batch = self.relay.fetch_history(&me, since, None).await?;
            if batch.is_empty() {
                return Ok(out);
            }
            out.extend(self.session.ingest(&batch));
        }
    }

    /// Consumes pending entries. Anything already seen through history is
    /// skipped by the cursor.
    ///
    /// Pending only holds what no live channel took, so it can skip ids. The
    /// cursor must not jump such a gap: when the new entries do not follow it
    /// directly, the batch is dropped and history is synced instead.
    pub async fn poll_pending(&mut self) -> Result<Vec<Inbound>, ChatError> {
        let me = self.client_id().to_owned();
        let batch = self.relay.fetch_pending(&me, false).await?;

        let cursor = self.session.cursor();
        let contiguous = batch
            .iter()
            .filter(|m| m.id > cursor)
            .zip(cursor + 1..)
            .all(|(m, expected)| m.id == expected);
        if !contiguous {
            debug!(cursor, "pending skips ids, catching up from history");
            return self.sync().await;
        }
        Ok(self.session.ingest(&batch))
    }

    async fn peer_key(&self, peer: &str) -> Result<[u8; 32], ChatError> {
        let encoded = self.relay.get_key(peer).await?;
        parse_public_key(&encoded).map_err(|source| ChatError::PeerKey {
            peer: peer.to_owned(),
            source,
        })
    }
}
