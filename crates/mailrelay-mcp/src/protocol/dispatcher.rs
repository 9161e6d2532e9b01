//! Request dispatcher: validates each message, gates it on session state,
//! correlates request ids and routes to the method handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;

use crate::session::{CallState, EventKind, Session, SessionState};
use crate::tools::ToolExecutor;
use crate::types::*;

use super::methods::{CallFailure, ErasedMethod, MethodContext, MethodTable};
use super::validator::validate_message;

/// The terminal reply to one request.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub id: RequestId,
    /// Serialized JSON-RPC response or error.
    pub message: Value,
    /// Event log position when the reply was also recorded.
    pub sequence: Option<u64>,
}

impl Outcome {
    fn error(id: RequestId, error: &McpError) -> Self {
        Self {
            message: error.to_value(id.clone()),
            id,
            sequence: None,
        }
    }
}

pub struct Dispatcher {
    methods: MethodTable,
    executor: Arc<dyn ToolExecutor>,
    tool_timeout: Duration,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>, tool_timeout: Duration) -> Self {
        Self::with_methods(MethodTable::standard(), executor, tool_timeout)
    }

    pub fn with_methods(
        methods: MethodTable,
        executor: Arc<dyn ToolExecutor>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            methods,
            executor,
            tool_timeout,
        }
    }

    pub fn executor(&self) -> &Arc<dyn ToolExecutor> {
        &self.executor
    }

    fn context(&self, session: Option<Arc<Session>>) -> MethodContext {
        MethodContext {
            session,
            executor: Arc::clone(&self.executor),
            tool_timeout: self.tool_timeout,
        }
    }

    /// Dispatch one message against `session`. Notifications and client
    /// responses yield `None`.
    pub async fn dispatch(&self, session: &Arc<Session>, raw: Value) -> Option<Outcome> {
        let message = match validate_message(raw) {
            Ok(message) => message,
            Err(rejected) => return Some(Outcome::error(rejected.id, &rejected.error)),
        };

        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(session, request).await),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(session, notification);
                None
            }
            other => {
                tracing::debug!("Session {}: ignoring client {}", session.id(), other.label());
                None
            }
        }
    }

    /// Dispatch a batch concurrently. Replies keep the order of the requests
    /// they answer.
    pub async fn dispatch_batch(
        &self,
        session: &Arc<Session>,
        messages: Vec<Value>,
    ) -> Vec<Outcome> {
        let calls = messages.into_iter().map(|raw| async move {
            if raw.get("method").and_then(Value::as_str) == Some("initialize") {
                let id = raw.get("id")?;
                let id = serde_json::from_value(id.clone()).unwrap_or(RequestId::Null);
                return Some(Outcome::error(
                    id,
                    &McpError::InvalidRequest("initialize must not be sent in a batch".to_string()),
                ));
            }
            self.dispatch(session, raw).await
        });
        join_all(calls).await.into_iter().flatten().collect()
    }

    async fn handle_request(&self, session: &Arc<Session>, request: JsonRpcRequest) -> Outcome {
        let id = request.id.clone();

        let method = match self.admit(session, &request.method) {
            Ok(method) => method,
            Err(e) => {
                tracing::debug!("Session {}: {} rejected: {e}", session.id(), request.method);
                return Outcome::error(id, &e);
            }
        };

        let cancel = match session.begin_call(&id, &request.method, request.params.clone()) {
            Ok(cancel) => cancel,
            Err(e) => return Outcome::error(id, &e),
        };

        let ctx = self.context(Some(Arc::clone(session)));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let error = if session.is_closed() {
                    McpError::SessionClosed
                } else {
                    McpError::RequestCancelled
                };
                Err(CallFailure::Failed(error))
            }
            result = Self::invoke(method.as_ref(), &ctx, request.params) => result,
        };

        let (message, executed, state) = match result {
            Ok(value) => (response_value(id.clone(), value), true, CallState::Completed),
            Err(CallFailure::Rejected(e)) => (e.to_value(id.clone()), false, CallState::Failed),
            Err(CallFailure::Failed(e)) => (e.to_value(id.clone()), true, CallState::Failed),
        };

        let sequence = if executed && method.logged() {
            session.record(EventKind::Response, &message)
        } else {
            None
        };
        session.finish_call(&id, state);

        Outcome {
            id,
            message,
            sequence,
        }
    }

    /// Resolve the handler for `name`, enforcing the session state gate.
    fn admit(&self, session: &Session, name: &str) -> McpResult<Arc<dyn ErasedMethod>> {
        if session.is_closed() {
            return Err(McpError::InvalidSession(format!(
                "Session {} is closed",
                session.id()
            )));
        }
        let state = session.state();
        let not_initialized = || {
            McpError::InvalidState(format!(
                "Session is not initialized; call initialize before {name}"
            ))
        };

        let Some(method) = self.methods.get(name) else {
            return Err(if state == SessionState::Initializing {
                not_initialized()
            } else {
                McpError::MethodNotFound(name.to_string())
            });
        };
        if !method.admits(state) {
            return Err(if state == SessionState::Initializing {
                not_initialized()
            } else {
                McpError::InvalidState(format!("{name} is not permitted while session is {state}"))
            });
        }
        Ok(method)
    }

    /// Run a handler, turning a panic into an internal error.
    async fn invoke(
        method: &dyn ErasedMethod,
        ctx: &MethodContext,
        params: Option<Value>,
    ) -> Result<Value, CallFailure> {
        AssertUnwindSafe(method.invoke(ctx, params))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!("Handler for {} panicked", method.name());
                Err(CallFailure::Failed(McpError::InternalError(format!(
                    "Handler for {} panicked",
                    method.name()
                ))))
            })
    }

    fn handle_notification(&self, session: &Session, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                tracing::debug!("Session {}: client initialized", session.id());
            }
            "notifications/cancelled" => {
                let params: Option<CancelRequestParams> = notification
                    .params
                    .and_then(|p| serde_json::from_value(p).ok());
                let Some(params) = params else {
                    tracing::debug!("Session {}: malformed cancellation", session.id());
                    return;
                };
                let Ok(id) = serde_json::from_value::<RequestId>(params.request_id) else {
                    return;
                };
                if session.cancel_call(&id) {
                    tracing::info!(
                        "Session {}: request {id} cancelled ({})",
                        session.id(),
                        params.reason.as_deref().unwrap_or("no reason given")
                    );
                }
            }
            other => {
                tracing::debug!("Session {}: unknown notification {other}", session.id());
            }
        }
    }

    /// Answer one message with no session: no state gate, nothing logged.
    pub async fn dispatch_stateless(&self, raw: Value) -> Option<Value> {
        let request = match validate_message(raw) {
            Ok(JsonRpcMessage::Request(request)) => request,
            Ok(_) => return None,
            Err(rejected) => return Some(rejected.error.to_value(rejected.id)),
        };

        let id = request.id.clone();
        let Some(method) = self
            .methods
            .get(&request.method)
            .filter(|m| m.stateless())
        else {
            return Some(McpError::MethodNotFound(request.method).to_value(id));
        };

        let ctx = self.context(None);
        Some(
            match Self::invoke(method.as_ref(), &ctx, request.params).await {
                Ok(value) => response_value(id, value),
                Err(failure) => failure.error().to_value(id),
            },
        )
    }
}

fn response_value(id: RequestId, result: Value) -> Value {
    serde_json::to_value(JsonRpcResponse::new(id, result)).unwrap_or_default()
}
