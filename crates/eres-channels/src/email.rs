//! SMTP Mail Transport: one message per schedule, one attachment per message.
//! Async SMTP via lettre. STARTTLS on 587 by default, implicit TLS on 465 otherwise.

use async_trait::async_trait;
use eres_core::config::SmtpConfig;
use eres_core::error::{EresError, Result};
use eres_core::traits::MailTransport;
use eres_core::types::OutgoingReport;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Mail Transport backed by an SMTP relay.
pub struct SmtpMailer {
    config: SmtpConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the relay client. No connection is made until the first send.
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| EresError::Config(format!("SMTP relay {}: {e}", config.host)))?;

        let mut builder = builder.port(config.port());
        if !config.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.email.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            config,
        })
    }

    /// Sender mailbox, with the configured display name when present.
    pub fn sender(&self) -> Result<Mailbox> {
        let address: Address = self
            .config
            .email
            .trim()
            .parse()
            .map_err(|e| EresError::Send(format!("Invalid sender {}: {e}", self.config.email)))?;
        let name = self
            .config
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Ok(Mailbox::new(name, address))
    }

    /// Assemble the MIME message: plain-text body plus the document attachment.
    pub fn build_message(&self, report: &OutgoingReport, attachment: Vec<u8>) -> Result<Message> {
        if report.to.is_empty() {
            return Err(EresError::Send("no recipients".into()));
        }

        let mut builder = Message::builder()
            .from(self.sender()?)
            .subject(report.subject.clone());
        for recipient in &report.to {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| EresError::Send(format!("Invalid recipient {recipient}: {e}")))?;
            builder = builder.to(mailbox);
        }

        let content_type = ContentType::parse(content_type_for(&report.attachment_name))
            .map_err(|e| EresError::Send(format!("Attachment type: {e}")))?;
        let parts = MultiPart::mixed()
            .singlepart(SinglePart::plain(report.body.clone()))
            .singlepart(
                Attachment::new(report.attachment_name.clone()).body(attachment, content_type),
            );

        builder
            .multipart(parts)
            .map_err(|e| EresError::Send(format!("Build email: {e}")))
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "csv" => "text/csv",
        "txt" => "text/plain",
        "json" => "application/json",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    fn check_recipient(&self, address: &str) -> std::result::Result<(), String> {
        address.parse::<Mailbox>().map(|_| ()).map_err(|e| e.to_string())
    }

    async fn send(&self, report: &OutgoingReport) -> Result<()> {
        let attachment = tokio::fs::read(&report.attachment).await.map_err(|e| {
            EresError::Send(format!(
                "Read attachment {}: {e}",
                report.attachment.display()
            ))
        })?;
        let message = self.build_message(report, attachment)?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| EresError::Send(format!("SMTP send: {e}")))?;

        tracing::info!(
            "📧 Email '{}' sent to {} recipient(s)",
            report.subject,
            report.to.len()
        );
        Ok(())
    }
}
