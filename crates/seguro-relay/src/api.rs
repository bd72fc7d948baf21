use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use seguro_proto::wire::{
    ClientsOut, CreateGroupIn, DisconnectIn, FetchMode, FetchQuery, GroupsOut, KeyOut, MessagesOut,
    PublishKeyIn, SendDmIn, SendGroupIn, StatusOut,
};

use crate::{error::RelayError, relay::Relay};

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub shutdown: watch::Receiver<bool>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::TransportFailure(_) => StatusCode::BAD_GATEWAY,
        };
        let body = json!({
            "status": "error",
            "reason": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/keys/publish", post(publish_key))
        .route("/keys/:client_id", get(get_key))
        .route("/clients", get(list_clients))
        .route("/messages", post(send_dm).get(fetch_messages))
        .route("/groups", post(create_group).get(list_groups))
        .route("/groups/:group_id/messages", post(send_group_message))
        .route("/disconnect", post(disconnect))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

// POST /keys/publish
pub async fn publish_key(
    State(state): State<AppState>,
    Json(body): Json<PublishKeyIn>,
) -> Result<Json<StatusOut>, RelayError> {
    state.relay.publish_key(&body.client_id, &body.pubkey_b64).await?;
    Ok(Json(StatusOut::ok()))
}

// GET /keys/{client_id}
pub async fn get_key(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<KeyOut>, RelayError> {
    let pubkey = state.relay.get_key(&client_id)?;
    Ok(Json(KeyOut { client_id, pubkey }))
}

#[derive(Debug, Deserialize)]
pub struct ClientsQuery {
    pub exclude: Option<String>,
}

// GET /clients?exclude=alice
pub async fn list_clients(
    State(state): State<AppState>,
    Query(q): Query<ClientsQuery>,
) -> Json<ClientsOut> {
    Json(ClientsOut {
        clients: state.relay.list_clients(q.exclude.as_deref()),
    })
}

// POST /messages
pub async fn send_dm(
    State(state): State<AppState>,
    Json(body): Json<SendDmIn>,
) -> Result<Json<StatusOut>, RelayError> {
    state
        .relay
        .send_dm(&body.to, &body.from, &body.blob, body.meta)?;
    Ok(Json(StatusOut::ok()))
}

// GET /messages?client_id=alice&mode=pending&peek=true
// GET /messages?client_id=alice&mode=history&since_id=10&limit=50
pub async fn fetch_messages(
    State(state): State<AppState>,
    Query(q): Query<FetchQuery>,
) -> Response {
    if *state.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let result = match q.mode {
        FetchMode::Pending => state.relay.fetch_pending(&q.client_id, q.peek),
        FetchMode::History => state.relay.fetch_history(&q.client_id, q.since_id, q.limit),
    };
    match result {
        Ok(messages) => Json(MessagesOut { messages }).into_response(),
        Err(e) => e.into_response(),
    }
}

// POST /groups
pub async fn create_group(
    State(state): State<AppState>,
    Json(body): Json<CreateGroupIn>,
) -> Result<Json<StatusOut>, RelayError> {
    state
        .relay
        .create_group(&body.group_id, body.members, &body.admin)?;
    Ok(Json(StatusOut::ok()))
}

#[derive(Debug, Deserialize)]
pub struct GroupsQuery {
    pub member: String,
}

// GET /groups?member=alice
pub async fn list_groups(
    State(state): State<AppState>,
    Query(q): Query<GroupsQuery>,
) -> Result<Json<GroupsOut>, RelayError> {
    let groups = state.relay.list_groups(&q.member)?;
    Ok(Json(GroupsOut { groups }))
}

// POST /groups/{group_id}/messages
pub async fn send_group_message(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(body): Json<SendGroupIn>,
) -> Result<Json<StatusOut>, RelayError> {
    state
        .relay
        .send_group_message(&group_id, &body.from, &body.blob)?;
    Ok(Json(StatusOut::ok()))
}

// POST /disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    Json(body): Json<DisconnectIn>,
) -> Result<Json<StatusOut>, RelayError> {
    state.relay.disconnect(&body.client_id)?;
    Ok(Json(StatusOut::ok()))
}

// GET /health
pub async fn get_health(State(_state): State<AppState>) -> Response {
    let response = json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, Json(response)).into_response()
}

// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.relay.export_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
