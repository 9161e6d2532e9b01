//! Server configuration: CLI flag, then environment, then default.

use std::str::FromStr;
use std::time::Duration;

use crate::session::DEFAULT_EVENT_CAPACITY;
use crate::types::{McpError, McpResult};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

pub const ENV_ADDR: &str = "MCP_ADDR";
pub const ENV_IDLE_TIMEOUT: &str = "MCP_IDLE_TIMEOUT_SECS";
pub const ENV_SWEEP_INTERVAL: &str = "MCP_SWEEP_INTERVAL_SECS";
pub const ENV_EVENT_CAPACITY: &str = "MCP_EVENT_CAPACITY";
pub const ENV_TOOL_TIMEOUT: &str = "MCP_TOOL_TIMEOUT_SECS";

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub addr: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub event_capacity: Option<usize>,
    pub tool_timeout_secs: Option<u64>,
}

/// Resolved engine settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub event_capacity: usize,
    pub tool_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Resolve against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> McpResult<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(overrides: ConfigOverrides, lookup: F) -> McpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = overrides
            .addr
            .or_else(|| lookup(ENV_ADDR))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let idle = resolve_positive(
            overrides.idle_timeout_secs,
            ENV_IDLE_TIMEOUT,
            &lookup,
            DEFAULT_IDLE_TIMEOUT_SECS,
        )?;
        let sweep = resolve_positive(
            overrides.sweep_interval_secs,
            ENV_SWEEP_INTERVAL,
            &lookup,
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?;
        let capacity = resolve_positive(
            overrides.event_capacity,
            ENV_EVENT_CAPACITY,
            &lookup,
            DEFAULT_EVENT_CAPACITY,
        )?;
        let tool = resolve_positive(
            overrides.tool_timeout_secs,
            ENV_TOOL_TIMEOUT,
            &lookup,
            DEFAULT_TOOL_TIMEOUT_SECS,
        )?;

        Ok(Self {
            addr,
            idle_timeout: Duration::from_secs(idle),
            sweep_interval: Duration::from_secs(sweep),
            event_capacity: capacity,
            tool_timeout: Duration::from_secs(tool),
        })
    }
}

fn resolve_positive<T, F>(explicit: Option<T>, key: &str, lookup: &F, default: T) -> McpResult<T>
where
    T: FromStr + PartialEq + Default + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = match explicit {
        Some(value) => value,
        None => match lookup(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| McpError::Config(format!("{key}={raw} is not a valid number")))?,
            None => default,
        },
    };
    if value == T::default() {
        return Err(McpError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}
