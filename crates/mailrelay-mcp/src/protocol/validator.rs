//! JSON-RPC message classification and tool argument checks.

use serde_json::{Map, Value};

use crate::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, McpError, McpResult, RequestId,
    JSONRPC_VERSION,
};

/// A message that failed validation, with the id to answer it under.
#[derive(Debug)]
pub struct Rejected {
    pub id: RequestId,
    pub error: McpError,
}

impl Rejected {
    fn new(id: &Option<RequestId>, error: McpError) -> Self {
        Self {
            id: id.clone().unwrap_or(RequestId::Null),
            error,
        }
    }
}

fn request_id(obj: &Map<String, Value>) -> McpResult<Option<RequestId>> {
    match obj.get("id") {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(RequestId::String(s.clone()))),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or_else(|| McpError::ParseError(format!("Request id must be an integer, got {n}"))),
        Some(Value::Null) => Err(McpError::ParseError(
            "Request id must not be null".to_string(),
        )),
        Some(other) => Err(McpError::ParseError(format!(
            "Request id must be a string or integer, got {other}"
        ))),
    }
}

/// Classify one decoded JSON value as a request, notification or client
/// response. Nothing here touches session state.
pub fn validate_message(value: Value) -> Result<JsonRpcMessage, Rejected> {
    let Value::Object(obj) = &value else {
        return Err(Rejected::new(
            &None,
            McpError::ParseError("Message must be a JSON object".to_string()),
        ));
    };
    let id = request_id(obj).map_err(|e| Rejected::new(&None, e))?;

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        other => {
            return Err(Rejected::new(
                &id,
                McpError::ParseError(format!(
                    "Expected jsonrpc version \"{JSONRPC_VERSION}\", got {}",
                    other.map(Value::to_string).unwrap_or_else(|| "nothing".into())
                )),
            ))
        }
    }

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.clone(),
        Some(_) => {
            return Err(Rejected::new(
                &id,
                McpError::ParseError("Method must be a string".to_string()),
            ))
        }
        None if id.is_some() && (obj.contains_key("result") || obj.contains_key("error")) => {
            return serde_json::from_value(value.clone())
                .map_err(|e| Rejected::new(&id, McpError::ParseError(e.to_string())));
        }
        None => {
            return Err(Rejected::new(
                &id,
                McpError::ParseError("Message has neither a method nor a result".to_string()),
            ))
        }
    };

    if method.is_empty() {
        return Err(Rejected::new(
            &id,
            McpError::ParseError("Method name must not be empty".to_string()),
        ));
    }

    let params = obj.get("params").cloned();
    if let Some(p) = &params {
        if !(p.is_object() || p.is_array() || p.is_null()) {
            return Err(Rejected::new(
                &id,
                McpError::InvalidParams("Params must be an object or array".to_string()),
            ));
        }
    }
    let params = params.filter(|p| !p.is_null());

    Ok(match id {
        Some(id) => JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params,
        }),
        None => JsonRpcMessage::Notification(JsonRpcNotification::new(method, params)),
    })
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Check tool arguments against the top level of an `inputSchema`:
/// object shape, required properties and primitive property types.
pub fn validate_arguments(schema: &Value, args: &Value) -> McpResult<()> {
    let Some(args) = args.as_object() else {
        return Err(McpError::InvalidParams(
            "Tool arguments must be an object".to_string(),
        ));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(McpError::InvalidParams(format!(
                    "Missing required argument '{name}'"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in args {
            let expected = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected {
                if !type_matches(expected, value) {
                    return Err(McpError::InvalidParams(format!(
                        "Argument '{name}' must be of type {expected}"
                    )));
                }
            }
        }
    }

    Ok(())
}

/// The protocol version header must match what the session negotiated.
pub fn check_protocol_version(header: Option<&str>, negotiated: &str) -> McpResult<()> {
    match header {
        None => Err(McpError::InvalidRequest(
            "Missing Mcp-Protocol-Version header".to_string(),
        )),
        Some(v) if v == negotiated => Ok(()),
        Some(v) => Err(McpError::VersionMismatch {
            expected: negotiated.to_string(),
            actual: v.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classifies_messages() {
        let req = validate_message(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(_)));

        let note =
            validate_message(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(matches!(note, JsonRpcMessage::Notification(_)));

        let resp = validate_message(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));
    }

    #[test]
    fn test_malformed_is_parse_error() {
        let rejected = validate_message(json!([1, 2])).unwrap_err();
        assert_eq!(rejected.error.kind(), "PARSE_ERROR");
        assert_eq!(rejected.id, RequestId::Null);

        let rejected =
            validate_message(json!({"jsonrpc": "2.0", "id": null, "method": "ping"})).unwrap_err();
        assert_eq!(rejected.error.kind(), "PARSE_ERROR");

        let rejected = validate_message(json!({"jsonrpc": "2.0", "id": 4})).unwrap_err();
        assert_eq!(rejected.error.kind(), "PARSE_ERROR");
        assert_eq!(rejected.id, RequestId::Number(4));
    }

    #[test]
    fn test_wrong_version_and_empty_method() {
        let rejected =
            validate_message(json!({"jsonrpc": "1.0", "id": 2, "method": "ping"})).unwrap_err();
        assert_eq!(rejected.error.kind(), "PARSE_ERROR");
        assert_eq!(rejected.id, RequestId::Number(2));

        let rejected = validate_message(json!({"id": 5, "method": "ping"})).unwrap_err();
        assert_eq!(rejected.error.kind(), "PARSE_ERROR");
        assert_eq!(rejected.id, RequestId::Number(5));

        let rejected =
            validate_message(json!({"jsonrpc": "2.0", "id": 3, "method": ""})).unwrap_err();
        assert_eq!(rejected.error.kind(), "PARSE_ERROR");
    }

    #[test]
    fn test_argument_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "to": { "type": "string" },
                "html": { "type": "boolean" },
                "cc": { "type": "array" }
            },
            "required": ["to"]
        });
        assert!(validate_arguments(&schema, &json!({"to": "a@b.c", "html": true})).is_ok());
        assert!(validate_arguments(&schema, &json!({"html": true})).is_err());
        assert!(validate_arguments(&schema, &json!({"to": 1})).is_err());
        assert!(validate_arguments(&schema, &json!({"to": "x", "cc": "y"})).is_err());
        assert!(validate_arguments(&schema, &json!(["to"])).is_err());
        // Undeclared properties pass through.
        assert!(validate_arguments(&schema, &json!({"to": "x", "extra": 1})).is_ok());
    }

    #[test]
    fn test_protocol_version_header() {
        assert!(check_protocol_version(Some("2025-06-18"), "2025-06-18").is_ok());
        assert!(matches!(
            check_protocol_version(Some("2024-11-05"), "2025-06-18"),
            Err(McpError::VersionMismatch { .. })
        ));
        assert!(matches!(
            check_protocol_version(None, "2025-06-18"),
            Err(McpError::InvalidRequest(_))
        ));
    }
}
