//! Newline-delimited JSON over TLS.
//!
//! Each request line gets exactly one response line. A line that does not
//! parse gets an error response and the connection stays open; `disconnect`
//! is answered and then the connection is closed.

use seguro_proto::wire::{LineRequest, LineResponse};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::watch,
};
use tracing::{debug, info, warn};

use crate::delivery::Route;
use crate::relay::Relay;
use crate::server::shutdown_requested;
use crate::tls::TlsConfig;

pub async fn serve(listener: TcpListener, tls: TlsConfig, relay: Relay, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "line listener accept failed");
                        continue;
                    }
                };
                let acceptor = tls.acceptor().await;
                let relay = relay.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    match acceptor.accept(tcp).await {
                        Ok(stream) => {
                            debug!(%peer, "line connection open");
                            serve_connection(stream, relay, shutdown).await;
                            debug!(%peer, "line connection closed");
                        }
                        Err(e) => debug!(%peer, error = %e, "tls handshake failed"),
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("line listener stopping");
                    return;
                }
            }
        }
    }
}

/// Runs the request loop on an established stream until EOF, a write error,
/// `disconnect`, or shutdown.
pub async fn serve_connection<S>(stream: S, relay: Relay, mut shutdown: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown_requested(&mut shutdown) => return,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "line read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, last) = match serde_json::from_str::<LineRequest>(&line) {
            Ok(request) => {
                let last = matches!(request, LineRequest::Disconnect { .. });
                (dispatch(&relay, request).await, last)
            }
            Err(e) => (LineResponse::error(format!("invalid request: {e}")), false),
        };

        let mut out = match serde_json::to_vec(&response) {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "cannot encode line response");
                return;
            }
        };
        out.push(b'\n');
        if writer.write_all(&out).await.is_err() || writer.flush().await.is_err() {
            return;
        }
        if last {
            let _ = writer.shutdown().await;
            return;
        }
    }
}

pub async fn dispatch(relay: &Relay, request: LineRequest) -> LineResponse {
    let result = match request {
        LineRequest::PublishKey { client_id, pubkey } => relay
            .publish_key(&client_id, &pubkey)
            .await
            .map(|()| LineResponse::ok("key published")),
        LineRequest::GetKey { client_id } => relay.get_key(&client_id).map(|pubkey| LineResponse {
            client_id: Some(client_id),
            pubkey: Some(pubkey),
            ..data()
        }),
        LineRequest::ListClients { client_id } => Ok(LineResponse {
            clients: Some(relay.list_clients(client_id.as_deref())),
            ..data()
        }),
        LineRequest::SendDm {
            to,
            from,
            blob,
            meta,
        } => relay
            .send_dm(&to, &from, &blob, meta)
            .map(|delivery| match delivery.route {
                Route::Pushed => LineResponse::ok("delivered"),
                Route::Queued => LineResponse::ok("queued"),
            }),
        LineRequest::FetchPending { client_id, peek } => {
            relay.fetch_pending(&client_id, peek).map(|messages| LineResponse {
                messages: Some(messages),
                ..data()
            })
        }
        LineRequest::FetchHistory {
            client_id,
            since_id,
            limit,
        } => relay
            .fetch_history(&client_id, since_id, limit)
            .map(|messages| LineResponse {
                messages: Some(messages),
                ..data()
            }),
        LineRequest::CreateGroup {
            group_id,
            members,
            admin,
        } => relay
            .create_group(&group_id, members, &admin)
            .map(|_| LineResponse::ok("group created")),
        LineRequest::ListGroups { member } => relay.list_groups(&member).map(|groups| LineResponse {
            groups: Some(groups),
            ..data()
        }),
        LineRequest::SendGroupMessage {
            group_id,
            from,
            blob,
        } => relay
            .send_group_message(&group_id, &from, &blob)
            .map(|n| LineResponse::ok(format!("delivered to {n} members"))),
        LineRequest::Disconnect { client_id } => relay
            .disconnect(&client_id)
            .map(|()| LineResponse::ok("bye")),
    };

    result.unwrap_or_else(|e| LineResponse::error(e.to_string()))
}

fn data() -> LineResponse {
    LineResponse {
        message: None,
        ..LineResponse::ok("")
    }
}
