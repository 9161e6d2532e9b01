//! Streamable HTTP transport: `/mcp` POST/GET/DELETE, `/health` and the
//! sessionless compatibility endpoints.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::protocol::{check_protocol_version, Dispatcher, Outcome, SUPPORTED_VERSIONS};
use crate::session::{Session, SessionManager, SessionState, Subscriber};
use crate::types::*;

use super::framing::{
    accepts_event_stream, error_frame, event_frame, header_str, last_event_id, message_frame,
    parse_body, post_response_mode, Body, ResponseMode, LAST_EVENT_ID_HEADER,
    MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER,
};
use super::stream::{subscriber_stream, StreamItem};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state passed to all handlers via axum State.
pub struct ServerState {
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(sessions: Arc<SessionManager>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sessions,
            dispatcher,
            started_at: Utc::now(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID_HEADER)]);

    Router::new()
        .route("/mcp", post(mcp_post).get(mcp_get).delete(mcp_delete))
        .route("/health", get(handle_health))
        .route("/", post(legacy_post))
        .route("/rpc", post(legacy_post))
        .route("/jsonrpc", post(legacy_post))
        .route("/sse", get(legacy_sse))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Owns the server state and runs the HTTP listener.
pub struct HttpTransport {
    state: Arc<ServerState>,
    config: ServerConfig,
}

impl HttpTransport {
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(config.event_capacity));
        Self {
            state: Arc::new(ServerState::new(sessions, Arc::new(dispatcher))),
            config,
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until Ctrl+C or SIGTERM, then close every session.
    pub async fn run(&self) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.addr)
            .await
            .map_err(McpError::Io)?;

        tracing::info!("HTTP transport listening on {}", self.config.addr);

        let shutdown = CancellationToken::new();
        let sweeper = self.state.sessions.spawn_sweeper(
            self.config.sweep_interval,
            self.config.idle_timeout,
            shutdown.clone(),
        );

        let sessions = self.state.sessions.clone();
        let stop = shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                stop.cancel();
                // Open streams only end once their sessions close.
                sessions.shutdown().await;
            })
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        shutdown.cancel();
        let _ = sweeper.await;
        tracing::info!("HTTP transport stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received terminate signal, shutting down..."),
    }
}

fn error_response(error: &McpError, id: RequestId) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.to_value(id))).into_response()
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
    }
    response
}

/// Replies produced by one POST body.
enum Reply {
    Single(Option<Outcome>),
    Batch(Vec<Outcome>),
}

fn reply_response(reply: Reply, mode: ResponseMode) -> Response {
    let (outcomes, batch) = match reply {
        Reply::Single(outcome) => (outcome.into_iter().collect::<Vec<_>>(), false),
        Reply::Batch(outcomes) => (outcomes, true),
    };
    if outcomes.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }

    match mode {
        ResponseMode::Json => {
            let body = if batch {
                Value::Array(outcomes.into_iter().map(|o| o.message).collect())
            } else {
                outcomes
                    .into_iter()
                    .next()
                    .map(|o| o.message)
                    .unwrap_or_default()
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        ResponseMode::EventStream => {
            let frames = outcomes
                .into_iter()
                .map(|o| Ok::<_, Infallible>(message_frame(&o.message, o.sequence)));
            Sse::new(stream::iter(frames)).into_response()
        }
    }
}

/// Run dispatch on its own task so a disconnecting client cannot cancel it.
async fn dispatch_detached(
    state: &ServerState,
    session: Arc<Session>,
    body: Body,
) -> McpResult<Reply> {
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        match body {
            Body::Single(raw) => Reply::Single(dispatcher.dispatch(&session, raw).await),
            Body::Batch(raw) => Reply::Batch(dispatcher.dispatch_batch(&session, raw).await),
        }
    })
    .await
    .map_err(|e| McpError::InternalError(format!("Dispatch task failed: {e}")))
}

/// POST /mcp - one JSON-RPC message or a batch.
async fn mcp_post(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mode = match post_response_mode(header_str(&headers, header::ACCEPT.as_str())) {
        Ok(mode) => mode,
        Err(e) => return error_response(&e, RequestId::Null),
    };
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(&e, RequestId::Null),
    };

    let Some(session_id) = header_str(&headers, MCP_SESSION_ID_HEADER) else {
        return initialize_session(&state, body, mode).await;
    };

    let session = match state.sessions.get_session(session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(&e, RequestId::Null),
    };
    let version = header_str(&headers, MCP_PROTOCOL_VERSION_HEADER);
    if let Err(e) = check_protocol_version(version, &session.protocol_version()) {
        return error_response(&e, RequestId::Null);
    }

    tracing::debug!("MCP POST: session={session_id}");
    let session_id = session.id().to_string();
    match dispatch_detached(&state, session, body).await {
        Ok(reply) => with_session_header(reply_response(reply, mode), &session_id),
        Err(e) => error_response(&e, RequestId::Null),
    }
}

/// A POST without a session id: only a lone `initialize` is accepted, and it
/// creates the session it runs against.
async fn initialize_session(state: &ServerState, body: Body, mode: ResponseMode) -> Response {
    let raw = match body {
        Body::Single(raw) if raw.get("method").and_then(Value::as_str) == Some("initialize") => {
            raw
        }
        _ => {
            return error_response(
                &McpError::InvalidRequest(
                    "Mcp-Session-Id header required; only initialize may omit it".to_string(),
                ),
                RequestId::Null,
            )
        }
    };

    let requested = raw
        .pointer("/params/protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(MCP_VERSION)
        .to_string();
    let session = state
        .sessions
        .create_session(&requested, ClientCapabilities::default())
        .await;
    let session_id = session.id().to_string();
    let initialized = session.clone();

    let reply = match dispatch_detached(state, session, Body::Single(raw)).await {
        Ok(reply) => reply,
        Err(e) => {
            let _ = state.sessions.close_session(&session_id).await;
            return error_response(&e, RequestId::Null);
        }
    };

    if initialized.state() != SessionState::Active {
        // Initialization failed: no session survives it.
        let _ = state.sessions.close_session(&session_id).await;
        return reply_response(reply, mode);
    }
    with_session_header(reply_response(reply, mode), &session_id)
}

/// GET /mcp - open the session's event stream, optionally resuming.
async fn mcp_get(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !accepts_event_stream(header_str(&headers, header::ACCEPT.as_str())) {
        return error_response(
            &McpError::NotAcceptable("Accept must include text/event-stream".to_string()),
            RequestId::Null,
        );
    }
    let Some(session_id) = header_str(&headers, MCP_SESSION_ID_HEADER) else {
        return error_response(
            &McpError::InvalidRequest(
                "Mcp-Session-Id header required for SSE stream".to_string(),
            ),
            RequestId::Null,
        );
    };
    let session = match state.sessions.get_session(session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(&e, RequestId::Null),
    };
    let version = header_str(&headers, MCP_PROTOCOL_VERSION_HEADER);
    if let Err(e) = check_protocol_version(version, &session.protocol_version()) {
        return error_response(&e, RequestId::Null);
    }
    let cursor = match last_event_id(&headers) {
        Ok(cursor) => cursor,
        Err(e) => return error_response(&e, RequestId::Null),
    };

    let subscriber = match Subscriber::attach(session, cursor) {
        Ok(subscriber) => subscriber,
        Err(e) => {
            tracing::info!(
                "MCP: stream for {session_id} refused ({LAST_EVENT_ID_HEADER}: {cursor:?}): {e}"
            );
            return error_response(&e, RequestId::Null);
        }
    };
    tracing::info!(
        "MCP: SSE stream opened for session {session_id} after event {}",
        subscriber.cursor()
    );

    let frames = subscriber_stream(subscriber).map(|item| {
        Ok::<_, Infallible>(match item {
            StreamItem::Event(event) => event_frame(&event),
            StreamItem::Lagged(error) => error_frame(&error),
        })
    });
    let response = Sse::new(frames)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();
    with_session_header(response, session_id)
}

/// DELETE /mcp - terminate a session.
async fn mcp_delete(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, MCP_SESSION_ID_HEADER) else {
        return error_response(
            &McpError::InvalidRequest("Mcp-Session-Id header required".to_string()),
            RequestId::Null,
        );
    };
    let session = match state.sessions.get_session(session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(&e, RequestId::Null),
    };
    let version = header_str(&headers, MCP_PROTOCOL_VERSION_HEADER);
    if let Err(e) = check_protocol_version(version, &session.protocol_version()) {
        return error_response(&e, RequestId::Null);
    }
    match state.sessions.close_session(session_id).await {
        Ok(()) => {
            tracing::info!("MCP: Session terminated: {session_id}");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(&e, RequestId::Null),
    }
}

fn session_summary(session: &Session) -> Value {
    json!({
        "id": session.id(),
        "state": session.state().as_str(),
        "protocol_version": session.protocol_version(),
        "created_at": session.created_at().to_rfc3339(),
        "client": session.client_info(),
        "client_capabilities": session.client_capabilities(),
        "last_event": session.events().last_sequence(),
    })
}

/// Health check endpoint - no session required.
async fn handle_health(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let sessions = state.sessions.sessions().await;
    Json(json!({
        "status": "ok",
        "service": SERVER_NAME,
        "version": SERVER_VERSION,
        "transport": "streamable-http",
        "protocol_version": MCP_VERSION,
        "supported_versions": SUPPORTED_VERSIONS,
        "sessions": sessions.len(),
        "session_details": sessions.iter().map(|s| session_summary(s)).collect::<Vec<_>>(),
        "started_at": state.started_at.to_rfc3339(),
        "executor": state.dispatcher.executor().describe(),
    }))
}

/// POST /, /rpc, /jsonrpc - sessionless request/response.
async fn legacy_post(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let dispatcher = &state.dispatcher;
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(&e, RequestId::Null),
    };

    let reply = match body {
        Body::Single(raw) => dispatcher.dispatch_stateless(raw).await,
        Body::Batch(items) => {
            let calls = items
                .into_iter()
                .map(|raw| dispatcher.dispatch_stateless(raw));
            let replies: Vec<Value> = futures::future::join_all(calls)
                .await
                .into_iter()
                .flatten()
                .collect();
            (!replies.is_empty()).then_some(Value::Array(replies))
        }
    };

    match reply {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// GET /sse - retired stream endpoint; says where to go and ends.
async fn legacy_sse() -> Response {
    let notice = JsonRpcNotification::new(
        LOG_MESSAGE_METHOD,
        Some(json!({
            "level": "warning",
            "logger": "transport",
            "data": {
                "message": "/sse is deprecated; open GET /mcp with an Mcp-Session-Id header",
                "endpoint": "/mcp"
            }
        })),
    );
    let data = serde_json::to_string(&notice).unwrap_or_default();
    let frame = axum::response::sse::Event::default()
        .event("message")
        .data(data);
    Sse::new(stream::once(async move { Ok::<_, Infallible>(frame) })).into_response()
}
