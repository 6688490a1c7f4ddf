//! Email delivery to a Send-to-Kindle address.

use crate::model::ConversionOutcome;
use lettre::message::header::{
    ContentDisposition, ContentTransferEncoding, ContentType, ContentTypeErr,
};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Message, SmtpTransport, Transport};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Port that uses implicit TLS; everything else negotiates STARTTLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid {field} address '{value}': {source}")]
    Address {
        field: &'static str,
        value: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Cannot read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid attachment content type: {0}")]
    ContentType(#[from] ContentTypeErr),

    #[error("Failed to build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("No SMTP host configured. Set SMTP_HOST or smtp_host in the config file.")]
    NoSmtpHost,

    #[error("SMTP delivery via {host}:{port} failed: {source}")]
    Smtp {
        host: String,
        port: u16,
        #[source]
        source: lettre::transport::smtp::Error,
    },
}

/// Sender, recipient and SMTP settings. Resolved once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub from: String,
    pub to: String,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

fn parse_mailbox(field: &'static str, value: &str) -> Result<Mailbox, DeliveryError> {
    value.trim().parse().map_err(|e| DeliveryError::Address {
        field,
        value: value.to_string(),
        source: e,
    })
}

/// Multipart message: a short text part and the converted file as a base64 attachment.
pub fn build_message(
    outcome: &ConversionOutcome,
    config: &EmailConfig,
) -> Result<Message, DeliveryError> {
    let from = parse_mailbox("sender", &config.from)?;
    let to = parse_mailbox("recipient", &config.to)?;

    let data = std::fs::read(&outcome.path).map_err(|e| DeliveryError::Attachment {
        path: outcome.path.clone(),
        source: e,
    })?;
    let file_name = outcome.file_name();

    let text = SinglePart::plain(format!(
        "Sending '{}' by {} to your Kindle.",
        outcome.title, outcome.author
    ));
    let attachment = SinglePart::builder()
        .header(ContentType::parse("application/octet-stream")?)
        .header(ContentDisposition::attachment(&file_name))
        .header(ContentTransferEncoding::Base64)
        .body(data);

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(outcome.title.as_str())
        .multipart(MultiPart::mixed().singlepart(text).singlepart(attachment))?;
    Ok(message)
}

/// Send the converted file. One attempt, no retry.
pub fn send_to_kindle(outcome: &ConversionOutcome, config: &EmailConfig) -> Result<(), DeliveryError> {
    let message = build_message(outcome, config)?;
    if config.smtp_host.trim().is_empty() {
        return Err(DeliveryError::NoSmtpHost);
    }
    let smtp_err = |e| DeliveryError::Smtp {
        host: config.smtp_host.clone(),
        port: config.smtp_port,
        source: e,
    };

    let relay = if config.smtp_port == IMPLICIT_TLS_PORT {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    };
    let mailer = relay
        .map_err(smtp_err)?
        .port(config.smtp_port)
        .credentials(Credentials::new(config.from.clone(), config.password.clone()))
        .authentication(vec![Mechanism::Plain])
        .build();

    tracing::info!(
        to = %config.to,
        host = %config.smtp_host,
        port = config.smtp_port,
        file = %outcome.file_name(),
        "Sending to Kindle"
    );
    mailer.send(&message).map_err(smtp_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ImageReport, OutputFormat, Strategy};

    fn config() -> EmailConfig {
        EmailConfig {
            from: "me@example.com".to_string(),
            to: "reader@kindle.com".to_string(),
            password: "app-password".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
        }
    }

    fn outcome(dir: &std::path::Path) -> ConversionOutcome {
        let path = dir.join("On Writing - Jane Doe.epub");
        std::fs::write(&path, b"hello kindle").unwrap();
        ConversionOutcome {
            path,
            title: "On Writing".to_string(),
            author: "Jane Doe".to_string(),
            format: OutputFormat::Epub,
            strategy: Strategy::Direct,
            images: ImageReport::default(),
        }
    }

    #[test]
    fn message_has_text_and_base64_attachment() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let message = build_message(&outcome(dir.path()), &config())?;
        let raw = String::from_utf8(message.formatted())?;
        assert!(raw.contains("Subject: On Writing"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("Sending 'On Writing' by Jane Doe to your Kindle."));
        assert!(raw.contains("application/octet-stream"));
        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        assert!(raw.contains(r#"filename="On Writing - Jane Doe.epub""#));
        // base64("hello kindle")
        assert!(raw.contains("aGVsbG8ga2luZGxl"));
        assert!(!raw.contains("hello kindle"));
        Ok(())
    }

    #[test]
    fn empty_recipient_fails_before_sending() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cfg = config();
        cfg.to = String::new();
        let result = build_message(&outcome(dir.path()), &cfg);
        assert!(matches!(
            result,
            Err(DeliveryError::Address {
                field: "recipient",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn unset_smtp_host_fails_without_connecting() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut cfg = config();
        cfg.smtp_host = String::new();
        let result = send_to_kindle(&outcome(dir.path()), &cfg);
        assert!(matches!(result, Err(DeliveryError::NoSmtpHost)));
        Ok(())
    }

    #[test]
    fn missing_attachment_is_reported() {
        let outcome = ConversionOutcome {
            path: PathBuf::from("/nonexistent_dir_substack2kindle/book.epub"),
            title: "T".to_string(),
            author: "A".to_string(),
            format: OutputFormat::Epub,
            strategy: Strategy::Direct,
            images: ImageReport::default(),
        };
        assert!(matches!(
            build_message(&outcome, &config()),
            Err(DeliveryError::Attachment { .. })
        ));
    }

    #[test]
    fn debug_redacts_password() {
        let shown = format!("{:?}", config());
        assert!(!shown.contains("app-password"));
        assert!(shown.contains("***"));
    }
}
