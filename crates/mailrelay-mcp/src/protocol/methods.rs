//! Strongly typed handlers for each protocol method.
//!
//! Every method implements [`Method`] with its own parameter type. The
//! dispatcher only sees the object-safe [`ErasedMethod`], looked up by name
//! in a [`MethodTable`] built once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::negotiation;
use super::validator::validate_arguments;
use crate::session::{EventKind, Session, SessionState};
use crate::tools::ToolExecutor;
use crate::types::*;

/// Everything a handler may touch while running one request.
#[derive(Clone)]
pub struct MethodContext {
    /// `None` on the sessionless compatibility endpoints.
    pub session: Option<Arc<Session>>,
    pub executor: Arc<dyn ToolExecutor>,
    pub tool_timeout: Duration,
}

/// How a call ended when it did not succeed.
#[derive(Debug)]
pub enum CallFailure {
    /// Refused before any work was done.
    Rejected(McpError),
    /// Failed while executing.
    Failed(McpError),
}

impl CallFailure {
    pub fn error(&self) -> &McpError {
        match self {
            CallFailure::Rejected(e) | CallFailure::Failed(e) => e,
        }
    }
}

#[async_trait]
pub trait Method: Send + Sync + 'static {
    type Params: DeserializeOwned + Send + Sync;

    fn name(&self) -> &'static str;

    /// Session states in which the method may be called.
    fn admits(&self, state: SessionState) -> bool {
        state == SessionState::Active
    }

    /// Whether the outcome is recorded in the session's event log.
    fn logged(&self) -> bool {
        false
    }

    /// Whether the method is served without a session.
    fn stateless(&self) -> bool {
        true
    }

    fn parse(&self, params: Option<Value>) -> McpResult<Self::Params> {
        params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams(format!("{} params required", self.name())))
    }

    async fn validate(&self, _ctx: &MethodContext, _params: &Self::Params) -> McpResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &MethodContext, params: Self::Params) -> McpResult<Value>;
}

/// Object-safe view of a [`Method`].
#[async_trait]
pub trait ErasedMethod: Send + Sync {
    fn name(&self) -> &'static str;
    fn admits(&self, state: SessionState) -> bool;
    fn logged(&self) -> bool;
    fn stateless(&self) -> bool;

    /// Parse, validate and execute.
    async fn invoke(
        &self,
        ctx: &MethodContext,
        params: Option<Value>,
    ) -> Result<Value, CallFailure>;
}

#[async_trait]
impl<T: Method> ErasedMethod for T {
    fn name(&self) -> &'static str {
        Method::name(self)
    }

    fn admits(&self, state: SessionState) -> bool {
        Method::admits(self, state)
    }

    fn logged(&self) -> bool {
        Method::logged(self)
    }

    fn stateless(&self) -> bool {
        Method::stateless(self)
    }

    async fn invoke(
        &self,
        ctx: &MethodContext,
        params: Option<Value>,
    ) -> Result<Value, CallFailure> {
        let params = self.parse(params).map_err(CallFailure::Rejected)?;
        self.validate(ctx, &params)
            .await
            .map_err(CallFailure::Rejected)?;
        self.execute(ctx, params).await.map_err(CallFailure::Failed)
    }
}

/// Method name to handler, fixed at startup.
pub struct MethodTable {
    methods: HashMap<&'static str, Arc<dyn ErasedMethod>>,
}

impl MethodTable {
    pub fn empty() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// The methods this server speaks.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(Initialize);
        table.register(Ping);
        table.register(ToolsList);
        table.register(ToolsCall);
        table.register(SetLogLevel);
        table
    }

    pub fn register<M: Method>(&mut self, method: M) {
        self.methods.insert(Method::name(&method), Arc::new(method));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErasedMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

fn to_result(value: &impl serde::Serialize) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

pub struct Initialize;

#[async_trait]
impl Method for Initialize {
    type Params = InitializeParams;

    fn name(&self) -> &'static str {
        "initialize"
    }

    fn admits(&self, state: SessionState) -> bool {
        state == SessionState::Initializing
    }

    async fn execute(&self, ctx: &MethodContext, params: InitializeParams) -> McpResult<Value> {
        let result = match &ctx.session {
            Some(session) => negotiation::negotiate(session, params)?,
            None => negotiation::initialize_result(&params),
        };
        to_result(&result)
    }
}

pub struct Ping;

#[async_trait]
impl Method for Ping {
    type Params = ();

    fn name(&self) -> &'static str {
        "ping"
    }

    fn parse(&self, _params: Option<Value>) -> McpResult<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &MethodContext, _params: ()) -> McpResult<Value> {
        Ok(json!({}))
    }
}

pub struct ToolsList;

#[async_trait]
impl Method for ToolsList {
    type Params = ();

    fn name(&self) -> &'static str {
        "tools/list"
    }

    fn parse(&self, _params: Option<Value>) -> McpResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &MethodContext, _params: ()) -> McpResult<Value> {
        to_result(&ToolListResult {
            tools: ctx.executor.list_tools().await,
            next_cursor: None,
        })
    }
}

/// Aborts the wrapped task when dropped, so a cancelled or timed-out call
/// does not leave the tool running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ToolsCall;

impl ToolsCall {
    /// Append a `notifications/message` event if the session asked for
    /// messages at this level.
    fn emit_log(session: &Session, level: LogLevel, tool: &str, outcome: Value) {
        let Some(threshold) = session.log_level() else {
            return;
        };
        if level < threshold {
            return;
        }
        let params = LogMessageParams {
            level,
            logger: Some("tools".to_string()),
            data: json!({ "tool": tool, "outcome": outcome }),
        };
        let Ok(params) = serde_json::to_value(params) else {
            return;
        };
        let notification = JsonRpcNotification::new(LOG_MESSAGE_METHOD, Some(params));
        if let Ok(message) = serde_json::to_value(notification) {
            session.record(EventKind::Notification, &message);
        }
    }
}

#[async_trait]
impl Method for ToolsCall {
    type Params = ToolCallParams;

    fn name(&self) -> &'static str {
        "tools/call"
    }

    fn logged(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &MethodContext, params: &ToolCallParams) -> McpResult<()> {
        let tools = ctx.executor.list_tools().await;
        let tool = tools
            .iter()
            .find(|t| t.name == params.name)
            .ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;
        let empty = json!({});
        validate_arguments(&tool.input_schema, params.arguments.as_ref().unwrap_or(&empty))
    }

    async fn execute(&self, ctx: &MethodContext, params: ToolCallParams) -> McpResult<Value> {
        let name = params.name;
        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let timeout = ctx.tool_timeout;

        let executor = Arc::clone(&ctx.executor);
        let tool = name.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            executor.invoke(&tool, arguments, timeout).await
        }));

        let outcome = match tokio::time::timeout(timeout, &mut task.0).await {
            Err(_) => Err(McpError::ToolTimeout {
                tool: name.clone(),
                timeout,
            }),
            Ok(Err(join)) if join.is_panic() => Err(McpError::InternalError(format!(
                "Tool '{name}' panicked"
            ))),
            Ok(Err(join)) => Err(McpError::InternalError(join.to_string())),
            Ok(Ok(result)) => result.map_err(McpError::from),
        };

        match &outcome {
            Ok(_) => tracing::debug!("Tool '{name}' completed"),
            Err(e) => tracing::warn!("Tool '{name}' failed: {e}"),
        }

        if let Some(session) = &ctx.session {
            match &outcome {
                Ok(_) => Self::emit_log(session, LogLevel::Info, &name, json!("success")),
                Err(e) => Self::emit_log(
                    session,
                    LogLevel::Error,
                    &name,
                    json!({ "kind": e.kind(), "message": e.to_string() }),
                ),
            }
        }

        outcome.and_then(|value| to_result(&ToolCallResult::json(&value)))
    }
}

pub struct SetLogLevel;

#[async_trait]
impl Method for SetLogLevel {
    type Params = SetLevelParams;

    fn name(&self) -> &'static str {
        "logging/setLevel"
    }

    fn stateless(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &MethodContext, params: SetLevelParams) -> McpResult<Value> {
        let session = ctx
            .session
            .as_ref()
            .ok_or_else(|| McpError::MethodNotFound(Method::name(self).to_string()))?;
        session.set_log_level(params.level);
        tracing::debug!("Session {} log level set to {:?}", session.id(), params.level);
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = MethodTable::standard();
        assert_eq!(
            table.names(),
            vec!["initialize", "logging/setLevel", "ping", "tools/call", "tools/list"]
        );
        let init = table.get("initialize").unwrap();
        assert!(init.admits(SessionState::Initializing));
        assert!(!init.admits(SessionState::Active));
        assert!(table.get("tools/call").unwrap().logged());
        assert!(!table.get("ping").unwrap().logged());
        assert!(!table.get("logging/setLevel").unwrap().stateless());
        assert!(table.get("resources/list").is_none());
    }
}
