//! HTTP body parsing, header helpers and SSE framing.

use axum::http::HeaderMap;
use axum::response::sse::Event as SseEvent;
use serde_json::Value;

use crate::session::Event;
use crate::types::{McpError, McpResult, RequestId};

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

/// A POST body: one message or a batch.
#[derive(Debug)]
pub enum Body {
    Single(Value),
    Batch(Vec<Value>),
}

/// Decode a POST body. Individual messages are validated later.
pub fn parse_body(bytes: &[u8]) -> McpResult<Body> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(McpError::ParseError("Empty message".to_string()));
    }
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| McpError::ParseError(e.to_string()))?;
    match value {
        Value::Array(items) if items.is_empty() => {
            Err(McpError::ParseError("Empty batch".to_string()))
        }
        Value::Array(items) => Ok(Body::Batch(items)),
        other => Ok(Body::Single(other)),
    }
}

/// How a POST reply is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Json,
    EventStream,
}

fn media_types(accept: &str) -> impl Iterator<Item = String> + '_ {
    accept.split(',').map(|part| {
        part.split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    })
}

/// Pick the reply shape from the `Accept` header. JSON wins when both are
/// acceptable.
pub fn post_response_mode(accept: Option<&str>) -> McpResult<ResponseMode> {
    let Some(accept) = accept else {
        return Ok(ResponseMode::Json);
    };
    let mut stream = false;
    for media in media_types(accept) {
        match media.as_str() {
            JSON | "application/*" | "*/*" => return Ok(ResponseMode::Json),
            EVENT_STREAM | "text/*" => stream = true,
            _ => {}
        }
    }
    if stream {
        Ok(ResponseMode::EventStream)
    } else {
        Err(McpError::NotAcceptable(format!(
            "Accept must include {JSON} or {EVENT_STREAM}"
        )))
    }
}

/// Whether a GET may be answered with an event stream.
pub fn accepts_event_stream(accept: Option<&str>) -> bool {
    accept.map_or(true, |accept| {
        media_types(accept).any(|m| matches!(m.as_str(), EVENT_STREAM | "text/*" | "*/*"))
    })
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The resume cursor, if the client sent one.
pub fn last_event_id(headers: &HeaderMap) -> McpResult<Option<u64>> {
    header_str(headers, LAST_EVENT_ID_HEADER)
        .map(|raw| {
            raw.parse().map_err(|_| {
                McpError::InvalidRequest(format!(
                    "Last-Event-ID must be a sequence number, got {raw}"
                ))
            })
        })
        .transpose()
}

/// SSE frame for a logged event.
pub fn event_frame(event: &Event) -> SseEvent {
    SseEvent::default()
        .id(event.sequence.to_string())
        .event("message")
        .data(event.payload.as_ref())
}

/// SSE frame for a reply, carrying its sequence number when it was logged.
pub fn message_frame(message: &Value, sequence: Option<u64>) -> SseEvent {
    let frame = SseEvent::default().event("message").data(message.to_string());
    match sequence {
        Some(sequence) => frame.id(sequence.to_string()),
        None => frame,
    }
}

/// Final SSE frame for a stream that cannot continue.
pub fn error_frame(error: &McpError) -> SseEvent {
    SseEvent::default()
        .event("error")
        .data(error.to_value(RequestId::Null).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_body() {
        assert!(matches!(
            parse_body(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#),
            Ok(Body::Single(_))
        ));
        assert!(matches!(
            parse_body(br#"[{"jsonrpc":"2.0","method":"ping","id":1}]"#),
            Ok(Body::Batch(items)) if items.len() == 1
        ));
        assert!(matches!(parse_body(b"[]"), Err(McpError::ParseError(_))));
        assert!(matches!(parse_body(b"{oops"), Err(McpError::ParseError(_))));
        assert!(matches!(parse_body(b"  "), Err(McpError::ParseError(_))));
    }

    #[test]
    fn test_post_accept_policy() {
        assert_eq!(post_response_mode(None).unwrap(), ResponseMode::Json);
        assert_eq!(
            post_response_mode(Some("application/json, text/event-stream")).unwrap(),
            ResponseMode::Json
        );
        assert_eq!(
            post_response_mode(Some("text/event-stream")).unwrap(),
            ResponseMode::EventStream
        );
        assert_eq!(post_response_mode(Some("*/*")).unwrap(), ResponseMode::Json);
        assert!(matches!(
            post_response_mode(Some("text/html")),
            Err(McpError::NotAcceptable(_))
        ));
    }

    #[test]
    fn test_get_accept_policy() {
        assert!(accepts_event_stream(None));
        assert!(accepts_event_stream(Some("text/event-stream; charset=utf-8")));
        assert!(!accepts_event_stream(Some("application/json")));
    }

    #[test]
    fn test_last_event_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers).unwrap(), None);
        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("42"));
        assert_eq!(last_event_id(&headers).unwrap(), Some(42));
        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("abc"));
        assert!(last_event_id(&headers).is_err());
    }
}
