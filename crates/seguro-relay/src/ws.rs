//! WebSocket push channel.
//!
//! The client opens with `{"type":"hello","client_id":...}`. The server
//! answers with a `ready` frame, then every pending entry, then every new
//! delivery as it happens. Whatever the client sends afterwards is ignored.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use seguro_proto::wire::{ClientFrame, ServerFrame};

use crate::api::AppState;
use crate::connections::{CloseReason, Outbound, Registration};
use crate::server::shutdown_requested;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_PROTOCOL: u16 = 1002;
const CLOSE_REPLACED: u16 = 4001;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let client_id = match read_hello(&mut stream).await {
        Ok(client_id) => client_id,
        Err(reason) => {
            debug!(reason, "rejecting push channel");
            let _ = sink.send(close(CLOSE_PROTOCOL, reason)).await;
            return;
        }
    };

    let Registration {
        connection,
        mut outbound,
        drained,
    } = match state.relay.register(&client_id) {
        Ok(registration) => registration,
        Err(e) => {
            let _ = sink.send(close(CLOSE_PROTOCOL, e.to_string())).await;
            return;
        }
    };
    info!(client_id = %client_id, connection = connection.id, drained, "push channel open");

    let ready = ServerFrame::Ready {
        client_id: client_id.clone(),
        drained,
    };
    let mut shutdown = state.shutdown.clone();
    let shutting_down = match send_frame(&mut sink, &ready).await {
        Ok(()) => {
            tokio::select! {
                _ = write_loop(&mut sink, &mut outbound) => false,
                _ = read_loop(&mut stream) => false,
                _ = shutdown_requested(&mut shutdown) => true,
            }
        }
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "push channel write failed");
            false
        }
    };

    state.relay.unregister(&connection);
    if shutting_down {
        let _ = sink.send(close(CLOSE_GOING_AWAY, "server shutting down")).await;
    }
    info!(client_id = %client_id, connection = connection.id, "push channel closed");
}

async fn read_hello(stream: &mut SplitStream<WebSocket>) -> Result<String, &'static str> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Hello { client_id }) => Ok(client_id),
                    _ => Err("expected hello"),
                };
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(_) => return Err("expected hello"),
            Err(_) => return Err("read failed"),
        }
    }
    Err("closed before hello")
}

/// Forwards queued deliveries until the queue closes, the registry asks us
/// to close, or a write fails.
async fn write_loop(
    sink: &mut SplitSink<WebSocket, Message>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Deliver(message) => {
                let id = message.id;
                if let Err(e) = send_frame(sink, &ServerFrame::Message { message }).await {
                    // Lost on this channel; history still holds it.
                    warn!(id, error = %e, "push write failed");
                    return;
                }
            }
            Outbound::Close(reason) => {
                let frame = match reason {
                    CloseReason::Replaced => close(CLOSE_REPLACED, "replaced by a newer connection"),
                    CloseReason::Disconnected => close(CLOSE_NORMAL, "disconnected"),
                };
                let _ = sink.send(frame).await;
                return;
            }
        }
    }
}

async fn read_loop(stream: &mut SplitStream<WebSocket>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}

fn close(code: u16, reason: impl Into<std::borrow::Cow<'static, str>>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
