//! SMTP connection settings and their resolution from the environment.

use serde::{Deserialize, Serialize};

use crate::types::{MailError, MailResult};

pub const DEFAULT_SMTP_HOST: &str = "localhost";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain SMTP, no encryption.
    None,
    /// Plain connect, upgraded with STARTTLS.
    StartTls,
    /// TLS from the first byte (SMTPS).
    Implicit,
}

impl TlsMode {
    /// Pick a mode from the well-known port conventions.
    pub fn for_port(port: u16) -> Self {
        match port {
            25 => TlsMode::None,
            465 => TlsMode::Implicit,
            _ => TlsMode::StartTls,
        }
    }

    pub fn is_encrypted(self) -> bool {
        !matches!(self, TlsMode::None)
    }
}

/// Resolved SMTP relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub tls: TlsMode,
    /// True when `SMTP_HOST` was not set and the local default is in use.
    #[serde(default)]
    pub defaulted: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
            user: String::new(),
            password: String::new(),
            tls: TlsMode::for_port(DEFAULT_SMTP_PORT),
            defaulted: true,
        }
    }
}

impl SmtpConfig {
    /// Read `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASSWORD` and `SMTP_USE_TLS`.
    pub fn from_env() -> MailResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> MailResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("SMTP_HOST");
        let defaulted = host.is_none();
        let host = host.unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string());

        let port = match get("SMTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| MailError::Config(format!("SMTP_PORT '{raw}': {e}")))?,
            None => DEFAULT_SMTP_PORT,
        };

        let tls = match get("SMTP_USE_TLS") {
            Some(raw) => match parse_flag(&raw) {
                Some(true) if port == 465 => TlsMode::Implicit,
                Some(true) => TlsMode::StartTls,
                Some(false) => TlsMode::None,
                None => {
                    return Err(MailError::Config(format!(
                        "SMTP_USE_TLS '{raw}': expected true or false"
                    )))
                }
            },
            None => TlsMode::for_port(port),
        };

        Ok(Self {
            host,
            port,
            user: get("SMTP_USER").unwrap_or_default(),
            password: get("SMTP_PASSWORD").unwrap_or_default(),
            tls,
            defaulted,
        })
    }

    /// Both user and password are present.
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }

    /// The sender used when a message names none.
    pub fn default_sender(&self) -> Option<&str> {
        if self.user.is_empty() {
            None
        } else {
            Some(self.user.as_str())
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = SmtpConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 587);
        assert_eq!(config.tls, TlsMode::StartTls);
        assert!(config.defaulted);
        assert!(!config.has_credentials());
        assert!(config.default_sender().is_none());
    }

    #[test]
    fn test_tls_follows_port() {
        assert_eq!(TlsMode::for_port(25), TlsMode::None);
        assert_eq!(TlsMode::for_port(465), TlsMode::Implicit);
        assert_eq!(TlsMode::for_port(587), TlsMode::StartTls);
        assert_eq!(TlsMode::for_port(2525), TlsMode::StartTls);

        let config = SmtpConfig::from_lookup(lookup(&[("SMTP_PORT", "25")])).unwrap();
        assert_eq!(config.tls, TlsMode::None);
    }

    #[test]
    fn test_explicit_tls_override() {
        let config = SmtpConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "587"),
            ("SMTP_USE_TLS", "false"),
        ]))
        .unwrap();
        assert_eq!(config.tls, TlsMode::None);
        assert!(!config.defaulted);

        let config =
            SmtpConfig::from_lookup(lookup(&[("SMTP_PORT", "465"), ("SMTP_USE_TLS", "yes")]))
                .unwrap();
        assert_eq!(config.tls, TlsMode::Implicit);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(SmtpConfig::from_lookup(lookup(&[("SMTP_PORT", "smtp")])).is_err());
        assert!(SmtpConfig::from_lookup(lookup(&[("SMTP_USE_TLS", "maybe")])).is_err());
    }

    #[test]
    fn test_credentials_and_sender() {
        let config = SmtpConfig::from_lookup(lookup(&[
            ("SMTP_USER", "relay@example.com"),
            ("SMTP_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert!(config.has_credentials());
        assert_eq!(config.default_sender(), Some("relay@example.com"));

        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("password").is_none());
    }
}
