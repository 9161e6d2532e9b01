//! End-to-end tests for the streamable HTTP endpoint, driven through the
//! router without binding a socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use mailrelay::{
    envelope_recipients, ConnectionReport, EmailOperations, MailResult, Mailer, Message,
    SmtpConfig, TlsMode,
};
use mailrelay_mcp::protocol::Dispatcher;
use mailrelay_mcp::session::SessionManager;
use mailrelay_mcp::tools::MailToolExecutor;
use mailrelay_mcp::transport::{router, ServerState};
use mailrelay_mcp::types::*;

// ─────────────────────── helpers ───────────────────────

/// Records envelope recipients instead of talking to a relay.
struct RecordingMailer {
    sent: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, message: Message, _timeout: Duration) -> MailResult<()> {
        self.sent.lock().unwrap().push(envelope_recipients(&message));
        Ok(())
    }

    async fn verify(&self, _timeout: Duration) -> MailResult<ConnectionReport> {
        Ok(ConnectionReport {
            success: true,
            message: "memory relay".into(),
            server: "memory".into(),
            port: 25,
            tls: TlsMode::None,
            authenticated: false,
        })
    }
}

struct TestServer {
    app: Router,
    state: Arc<ServerState>,
    sent: Arc<Mutex<Vec<Vec<String>>>>,
}

fn server(event_capacity: usize) -> TestServer {
    let config = SmtpConfig {
        user: "relay@example.com".into(),
        port: 25,
        tls: TlsMode::None,
        ..Default::default()
    };
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mailer = RecordingMailer { sent: sent.clone() };
    let executor = MailToolExecutor::new(EmailOperations::new(mailer, config));
    let dispatcher = Dispatcher::new(Arc::new(executor), Duration::from_secs(5));
    let state = Arc::new(ServerState::new(
        Arc::new(SessionManager::new(event_capacity)),
        Arc::new(dispatcher),
    ));
    TestServer {
        app: router(state.clone()),
        state,
        sent,
    }
}

const BOTH: &str = "application/json, text/event-stream";

fn init_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": MCP_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "http-test", "version": "1.0" }
        }
    })
}

fn send_email(id: i64, to: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": "send_email",
            "arguments": { "to": to, "subject": "Hello", "body": "Hi there" }
        }
    })
}

fn post(session: Option<&str>, accept: &str, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, accept);
    if let Some(id) = session {
        builder = builder
            .header("mcp-session-id", id)
            .header("mcp-protocol-version", MCP_VERSION);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_stream(session: &str, last_event_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "text/event-stream")
        .header("mcp-session-id", session)
        .header("mcp-protocol-version", MCP_VERSION);
    if let Some(cursor) = last_event_id {
        builder = builder.header("last-event-id", cursor);
    }
    builder.body(Body::empty()).unwrap()
}

fn delete_session(session: &str, protocol_version: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header("mcp-session-id", session);
    if let Some(version) = protocol_version {
        builder = builder.header("mcp-protocol-version", version);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Accumulates an open SSE body across reads.
struct SseReader {
    body: Body,
    buffer: String,
}

impl SseReader {
    fn new(response: Response) -> Self {
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// Read until `count` events with an `id:` field have arrived in total.
    async fn events(&mut self, count: usize) -> Vec<(u64, Value)> {
        loop {
            let events = parse_events(&self.buffer);
            if events.len() >= count {
                return events;
            }
            let frame = tokio::time::timeout(Duration::from_secs(5), self.body.frame())
                .await
                .expect("timed out waiting for SSE events")
                .expect("stream ended early")
                .unwrap();
            if let Ok(data) = frame.into_data() {
                self.buffer.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
    }

    /// Wait for the server to end the stream.
    async fn closed(&mut self) -> bool {
        let drain = async {
            while let Some(frame) = self.body.frame().await {
                if frame.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), drain).await.is_ok()
    }
}

fn parse_events(buffer: &str) -> Vec<(u64, Value)> {
    buffer
        .split("\n\n")
        .filter_map(|block| {
            let mut id = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("id:") {
                    id = v.trim().parse().ok();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str(v.trim()).ok();
                }
            }
            Some((id?, data?))
        })
        .collect()
}

/// Initialize a session over HTTP and return its id.
async fn open_session(app: &Router) -> String {
    let response = send(app, post(None, BOTH, &init_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers()["mcp-session-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body = json_body(response).await;
    assert_eq!(body["result"]["_meta"]["sessionId"], id.as_str());
    id
}

// ═══════════════════════════════════════════════════════
// SESSION LIFECYCLE
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_session_over_http() {
    let server = server(100);
    let app = &server.app;

    let session = open_session(app).await;
    assert_eq!(server.state.sessions.session_count().await, 1);

    let initialized = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = send(app, post(Some(&session), BOTH, &initialized)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(app, post(Some(&session), BOTH, &send_email(2, "ann@example.com"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["mcp-session-id"], session.as_str());
    let body = json_body(response).await;
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["structuredContent"]["success"], true);
    assert_eq!(
        body["result"]["structuredContent"]["recipients"],
        json!(["ann@example.com"])
    );

    // Replay from the start, then keep receiving live events.
    let response = send(app, get_stream(&session, Some("0"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    let mut stream = SseReader::new(response);

    let events = stream.events(1).await;
    assert_eq!(events[0].0, 1);
    assert_eq!(events[0].1["id"], 2);

    let response = send(app, post(Some(&session), BOTH, &send_email(3, "bob@example.com"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let events = stream.events(2).await;
    assert_eq!(events[1].0, 2);
    assert_eq!(events[1].1["id"], 3);

    let response = send(app, delete_session(&session, Some(MCP_VERSION))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The open stream ends with the session.
    assert!(stream.closed().await, "stream stayed open after DELETE");

    let response = send(app, post(Some(&session), BOTH, &send_email(4, "cy@example.com"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(app, get_stream(&session, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.state.sessions.session_count().await, 0);
    assert_eq!(
        *server.sent.lock().unwrap(),
        vec![vec!["ann@example.com".to_string()], vec!["bob@example.com".to_string()]]
    );
}

#[tokio::test]
async fn test_failed_initialize_creates_no_session() {
    let server = server(100);
    let bad = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "capabilities": {} }
    });

    let response = send(&server.app, post(None, BOTH, &bad)).await;
    assert!(response.headers().get("mcp-session-id").is_none());
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], error_codes::INVALID_PARAMS);
    assert_eq!(server.state.sessions.session_count().await, 0);
}

#[tokio::test]
async fn test_session_header_required() {
    let server = server(100);
    let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

    let response = send(&server.app, post(None, BOTH, &ping)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["data"]["kind"], "INVALID_REQUEST");

    let response = send(&server.app, post(Some("no-such-session"), BOTH, &ping)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await["error"]["code"],
        mcp_error_codes::INVALID_SESSION
    );
}

#[tokio::test]
async fn test_protocol_version_must_match() {
    let server = server(100);
    let session = open_session(&server.app).await;
    let ping = json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" });

    let mismatched = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::ACCEPT, BOTH)
        .header("mcp-session-id", session.as_str())
        .header("mcp-protocol-version", "2024-11-05")
        .body(Body::from(ping.to_string()))
        .unwrap();
    let response = send(&server.app, mismatched).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["data"]["kind"], "INVALID_REQUEST");
    assert!(body["error"]["message"].as_str().unwrap().contains("2024-11-05"));

    let missing = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::ACCEPT, BOTH)
        .header("mcp-session-id", session.as_str())
        .body(Body::from(ping.to_string()))
        .unwrap();
    let response = send(&server.app, missing).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&server.app, delete_session(&session, Some("2024-11-05"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = send(&server.app, delete_session(&session, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(server.state.sessions.session_count().await, 1);

    let response = send(&server.app, delete_session(&session, Some(MCP_VERSION))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.state.sessions.session_count().await, 0);
}

// ═══════════════════════════════════════════════════════
// CONTENT NEGOTIATION AND FRAMING
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_accept_header_is_enforced() {
    let server = server(100);
    let session = open_session(&server.app).await;

    let response = send(&server.app, post(None, "text/html", &init_body())).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    let get = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "application/json")
        .header("mcp-session-id", session.as_str())
        .header("mcp-protocol-version", MCP_VERSION)
        .body(Body::empty())
        .unwrap();
    let response = send(&server.app, get).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_event_stream_reply_carries_sequence() {
    let server = server(100);
    let session = open_session(&server.app).await;

    let response = send(
        &server.app,
        post(Some(&session), "text/event-stream", &send_email(2, "ann@example.com")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let text = text_body(response).await;
    let events = parse_events(&text);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 1);
    assert_eq!(events[0].1["id"], 2);
    assert!(text
        .lines()
        .any(|line| line.starts_with("event:") && line.ends_with("message")));
}

#[tokio::test]
async fn test_batch_over_http() {
    let server = server(100);
    let session = open_session(&server.app).await;
    let batch = json!([
        { "jsonrpc": "2.0", "id": 2, "method": "ping" },
        { "jsonrpc": "2.0", "method": "notifications/initialized" },
        { "jsonrpc": "2.0", "id": 3, "method": "tools/list" }
    ]);

    let response = send(&server.app, post(Some(&session), BOTH, &batch)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let replies = body.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 2);
    assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_malformed_body() {
    let server = server(100);
    let session = open_session(&server.app).await;

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::ACCEPT, BOTH)
        .header("mcp-session-id", session.as_str())
        .header("mcp-protocol-version", MCP_VERSION)
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&server.app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], error_codes::PARSE_ERROR);
    assert_eq!(body["id"], Value::Null);

    let empty_batch = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::ACCEPT, BOTH)
        .header("mcp-session-id", session.as_str())
        .header("mcp-protocol-version", MCP_VERSION)
        .body(Body::from("[]"))
        .unwrap();
    let response = send(&server.app, empty_batch).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["data"]["kind"], "PARSE_ERROR");
}

// ═══════════════════════════════════════════════════════
// RESUMPTION
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_resume_cursor_validation() {
    let server = server(2);
    let session = open_session(&server.app).await;

    for id in 2..=5 {
        let to = format!("user{id}@example.com");
        let response = send(&server.app, post(Some(&session), BOTH, &send_email(id, &to))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&server.app, get_stream(&session, Some("1"))).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(
        json_body(response).await["error"]["data"]["kind"],
        "RESUME_WINDOW_EXCEEDED"
    );

    let response = send(&server.app, get_stream(&session, Some("99"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&server.app, get_stream(&session, Some("abc"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&server.app, get_stream(&session, Some("2"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let events = SseReader::new(response).events(2).await;
    let sequences: Vec<u64> = events.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(sequences, [3, 4]);
}

// ═══════════════════════════════════════════════════════
// HEALTH AND COMPATIBILITY ENDPOINTS
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_health() {
    let server = server(100);
    let session = open_session(&server.app).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = send(&server.app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], SERVER_NAME);
    assert_eq!(body["sessions"], 1);
    let details = &body["session_details"][0];
    assert_eq!(details["id"], session.as_str());
    assert_eq!(details["state"], "active");
    assert_eq!(details["protocol_version"], MCP_VERSION);
    assert_eq!(details["client"]["name"], "http-test");
    assert!(details["created_at"].as_str().is_some());
    assert_eq!(details["last_event"], 0);
    assert_eq!(body["executor"]["smtp_port"], 25);
    assert_eq!(body["executor"]["encrypted"], false);
}

#[tokio::test]
async fn test_legacy_post_endpoints() {
    let server = server(100);

    for uri in ["/", "/rpc", "/jsonrpc"] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }).to_string(),
            ))
            .unwrap();
        let response = send(&server.app, request).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(json_body(response).await["result"], json!({}));
    }

    let request = Request::builder()
        .method("POST")
        .uri("/rpc")
        .body(Body::from(send_email(2, "dee@example.com").to_string()))
        .unwrap();
    let body = json_body(send(&server.app, request).await).await;
    assert_eq!(body["result"]["structuredContent"]["success"], true);

    let request = Request::builder()
        .method("POST")
        .uri("/rpc")
        .body(Body::from(
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string(),
        ))
        .unwrap();
    let response = send(&server.app, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Nothing sessionful was created.
    assert_eq!(server.state.sessions.session_count().await, 0);
}

#[tokio::test]
async fn test_legacy_sse_points_to_mcp() {
    let server = server(100);
    let request = Request::builder().uri("/sse").body(Body::empty()).unwrap();
    let response = send(&server.app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = text_body(response).await;
    assert!(text.contains("deprecated"));
    assert!(text.contains("/mcp"));
}
