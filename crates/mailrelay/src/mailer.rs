//! Delivery backends.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{SmtpConfig, TlsMode};
use crate::types::{ConnectionReport, MailError, MailResult};

/// Something that can hand a composed message to a mail system.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Deliver one message to every envelope recipient.
    async fn deliver(&self, message: Message, timeout: Duration) -> MailResult<()>;

    /// Open a session with the mail system without sending anything.
    async fn verify(&self, timeout: Duration) -> MailResult<ConnectionReport>;
}

/// Delivers through an SMTP relay, one connection per call.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn transport(&self, timeout: Duration) -> MailResult<AsyncSmtpTransport<Tokio1Executor>> {
        let host = self.config.host.as_str();
        let builder = match self.config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
        };

        let mut builder = builder.port(self.config.port).timeout(Some(timeout));
        if self.config.has_credentials() {
            builder = builder.credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, message: Message, timeout: Duration) -> MailResult<()> {
        let transport = self.transport(timeout)?;
        transport.send(message).await?;
        tracing::debug!(
            "SMTP {}:{} accepted message",
            self.config.host,
            self.config.port
        );
        Ok(())
    }

    async fn verify(&self, timeout: Duration) -> MailResult<ConnectionReport> {
        let transport = self.transport(timeout)?;
        if !transport.test_connection().await? {
            return Err(MailError::ConnectionRejected {
                host: self.config.host.clone(),
                port: self.config.port,
            });
        }

        let authenticated = self.config.has_credentials();
        let suffix = if authenticated {
            " (authenticated)"
        } else {
            " (no authentication)"
        };

        Ok(ConnectionReport {
            success: true,
            message: format!("SMTP connection verified successfully{suffix}"),
            server: self.config.host.clone(),
            port: self.config.port,
            tls: self.config.tls,
            authenticated,
        })
    }
}
