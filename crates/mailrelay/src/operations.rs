//! High-level mail operations exposed as tools by the server.

use std::time::Duration;

use crate::compose::{build_message, envelope_recipients, render_template};
use crate::config::SmtpConfig;
use crate::mailer::Mailer;
use crate::types::{
    BulkEmail, BulkOutcome, BulkReport, ConnectionReport, MailError, MailResult, OutgoingEmail,
    SendReport, TemplateEmail,
};

/// Mail operations over a delivery backend.
pub struct EmailOperations<M: Mailer> {
    mailer: M,
    config: SmtpConfig,
}

impl<M: Mailer> EmailOperations<M> {
    pub fn new(mailer: M, config: SmtpConfig) -> Self {
        Self { mailer, config }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Compose and deliver one message.
    pub async fn send_email(
        &self,
        email: OutgoingEmail,
        timeout: Duration,
    ) -> MailResult<SendReport> {
        let message = build_message(&email, self.config.default_sender())?;
        let recipients = envelope_recipients(&message);

        self.mailer.deliver(message, timeout).await.inspect_err(|e| {
            tracing::error!("Failed to send email to {}: {e}", email.to);
        })?;

        tracing::info!("Email sent successfully to {}", email.to);
        Ok(SendReport {
            success: true,
            message: format!("Email sent successfully to {}", email.to),
            recipients,
        })
    }

    /// Send the same message to each recipient separately. Failures are
    /// collected per recipient; the batch is never aborted.
    pub async fn send_bulk_email(
        &self,
        bulk: BulkEmail,
        timeout: Duration,
    ) -> MailResult<BulkReport> {
        if bulk.recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }

        let mut results = Vec::with_capacity(bulk.recipients.len());
        for recipient in &bulk.recipients {
            let email = OutgoingEmail {
                to: recipient.clone(),
                subject: bulk.subject.clone(),
                body: bulk.body.clone(),
                from_addr: bulk.from_addr.clone(),
                html: bulk.html,
                ..Default::default()
            };

            let outcome = match self.send_email(email, timeout).await {
                Ok(report) => BulkOutcome {
                    recipient: recipient.clone(),
                    success: true,
                    message: Some(report.message),
                    error: None,
                },
                Err(e) => BulkOutcome {
                    recipient: recipient.clone(),
                    success: false,
                    message: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(outcome);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let failed_count = results.len() - success_count;

        Ok(BulkReport {
            success: failed_count == 0,
            total: results.len(),
            success_count,
            failed_count,
            results,
        })
    }

    /// Render the template and deliver it like [`send_email`](Self::send_email).
    pub async fn send_template_email(
        &self,
        template: TemplateEmail,
        timeout: Duration,
    ) -> MailResult<SendReport> {
        let body = render_template(&template.template, &template.variables);
        let email = OutgoingEmail {
            to: template.to,
            subject: template.subject,
            body,
            from_addr: template.from_addr,
            html: template.html,
            ..Default::default()
        };
        self.send_email(email, timeout).await
    }

    pub async fn verify_connection(&self, timeout: Duration) -> MailResult<ConnectionReport> {
        self.mailer.verify(timeout).await.inspect_err(|e| {
            tracing::error!(
                "SMTP connection to {}:{} failed: {e}",
                self.config.host,
                self.config.port
            );
        })
    }
}
