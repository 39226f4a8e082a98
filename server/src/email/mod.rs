//! Email Service
//!
//! Delivers the outbound message assembled from a submission, with stored
//! files as binary attachments. SMTP in production; an in-memory transport
//! backs tests and dry runs.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;
use crate::form::attachments::Attachment;

/// A fully resolved outbound message: mail tags already substituted.
#[derive(Debug, Clone)]
pub struct ResolvedMail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// A message captured by the in-memory transport.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Paths of the attached stored files.
    pub attachment_paths: Vec<PathBuf>,
}

/// Shared sink for messages sent through [`EmailService::in_memory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryOutbox {
    messages: Arc<Mutex<Vec<SentMessage>>>,
}

impl MemoryOutbox {
    /// Snapshot of the captured messages.
    #[must_use]
    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Email delivery for dispatched submissions.
#[derive(Clone)]
pub enum EmailService {
    /// SMTP relay configured from the environment.
    Smtp {
        /// Async SMTP transport.
        mailer: AsyncSmtpTransport<Tokio1Executor>,
        /// From address for outbound mail.
        from_address: Mailbox,
    },
    /// Captures messages in memory instead of sending them.
    Memory(MemoryOutbox),
}

impl EmailService {
    /// Create an SMTP service from server configuration.
    ///
    /// Requires SMTP to be fully configured (`config.has_smtp()` must be
    /// true).
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = config.smtp_host.as_ref().context("SMTP_HOST is required")?;
        let username = config
            .smtp_username
            .as_ref()
            .context("SMTP_USERNAME is required")?;
        let password = config
            .smtp_password
            .as_ref()
            .context("SMTP_PASSWORD is required")?;
        let from = config.smtp_from.as_ref().context("SMTP_FROM is required")?;

        let from_address: Mailbox = from
            .parse()
            .context("SMTP_FROM is not a valid email address")?;

        let creds = Credentials::new(username.clone(), password.clone());

        let mailer = match config.smtp_tls.as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .context("Failed to create SMTP TLS transport")?
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
            // Default: STARTTLS
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .context("Failed to create SMTP STARTTLS transport")?
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
        };

        Ok(Self::Smtp {
            mailer,
            from_address,
        })
    }

    /// Create a capturing service plus a handle to read what it "sent".
    #[must_use]
    pub fn in_memory() -> (Self, MemoryOutbox) {
        let outbox = MemoryOutbox::default();
        (Self::Memory(outbox.clone()), outbox)
    }

    /// Test the SMTP connection by sending a NOOP command.
    pub async fn test_connection(&self) -> Result<()> {
        match self {
            Self::Smtp { mailer, .. } => {
                let ok = mailer
                    .test_connection()
                    .await
                    .context("SMTP connection test failed")?;
                if !ok {
                    anyhow::bail!("SMTP server did not respond positively to connection test");
                }
                Ok(())
            }
            Self::Memory(_) => Ok(()),
        }
    }

    /// Send the message for one submission, attaching every stored file.
    ///
    /// Every attachment path must exist on disk when this is called; a
    /// missing file fails the dispatch.
    pub async fn send_submission(
        &self,
        mail: &ResolvedMail,
        attachments: &[Attachment],
    ) -> Result<()> {
        match self {
            Self::Smtp {
                mailer,
                from_address,
            } => {
                let to_mailbox: Mailbox = mail
                    .to
                    .parse()
                    .context("Invalid recipient email address")?;

                let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body.clone()));
                for attachment in attachments {
                    let data = tokio::fs::read(&attachment.path).await.with_context(|| {
                        format!("Failed to read attachment {}", attachment.path.display())
                    })?;
                    let filename = attachment
                        .path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("attachment")
                        .to_string();
                    let mime = mime_guess::from_path(&attachment.path).first_or_octet_stream();
                    let content_type = ContentType::parse(mime.as_ref())
                        .with_context(|| format!("Bad attachment content type {mime}"))?;
                    parts = parts.singlepart(MailAttachment::new(filename).body(data, content_type));
                }

                let email = Message::builder()
                    .from(from_address.clone())
                    .to(to_mailbox)
                    .subject(mail.subject.clone())
                    .multipart(parts)
                    .context("Failed to build email message")?;

                mailer
                    .send(email)
                    .await
                    .context("Failed to send email via SMTP")?;
                Ok(())
            }
            Self::Memory(outbox) => {
                // Uphold the dispatch contract even in capture mode: every
                // attachment must be readable at send time
                let mut attachment_paths = Vec::with_capacity(attachments.len());
                for attachment in attachments {
                    tokio::fs::metadata(&attachment.path).await.with_context(|| {
                        format!("Failed to read attachment {}", attachment.path.display())
                    })?;
                    attachment_paths.push(attachment.path.clone());
                }

                outbox
                    .messages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(SentMessage {
                        to: mail.to.clone(),
                        subject: mail.subject.clone(),
                        body: mail.body.clone(),
                        attachment_paths,
                    });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Config with all SMTP fields populated (`smtp_tls: "none"` avoids DNS
    /// resolution / TLS handshake in tests).
    fn smtp_test_config() -> Config {
        let mut config = Config::default_for_test();
        config.smtp_host = Some("localhost".into());
        config.smtp_username = Some("testuser".into());
        config.smtp_password = Some("testpass".into());
        config.smtp_from = Some("noreply@example.com".into());
        config.smtp_tls = "none".into();
        config
    }

    fn expect_err(result: Result<EmailService>) -> anyhow::Error {
        match result {
            Err(e) => e,
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[test]
    fn test_from_config_success() {
        assert!(EmailService::from_config(&smtp_test_config()).is_ok());
    }

    #[test]
    fn test_from_config_missing_host() {
        let mut config = smtp_test_config();
        config.smtp_host = None;
        let err = expect_err(EmailService::from_config(&config));
        assert!(err.to_string().contains("SMTP_HOST"), "{err}");
    }

    #[test]
    fn test_from_config_invalid_from_address() {
        let mut config = smtp_test_config();
        config.smtp_from = Some("not-an-email".into());
        let err = expect_err(EmailService::from_config(&config));
        assert!(err.to_string().contains("valid email"), "{err}");
    }

    #[tokio::test]
    async fn test_memory_transport_captures_message() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("photo.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let (service, outbox) = EmailService::in_memory();
        service
            .send_submission(
                &ResolvedMail {
                    to: "inbox@example.com".into(),
                    subject: "New submission".into(),
                    body: "Files: photo.jpg".into(),
                },
                &[Attachment { path: path.clone() }],
            )
            .await
            .unwrap();

        let messages = outbox.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].attachment_paths, vec![path]);
        assert!(messages[0].body.contains("photo.jpg"));
    }

    #[tokio::test]
    async fn test_missing_attachment_fails_dispatch() {
        let (service, outbox) = EmailService::in_memory();
        let result = service
            .send_submission(
                &ResolvedMail {
                    to: "inbox@example.com".into(),
                    subject: "New submission".into(),
                    body: String::new(),
                },
                &[Attachment {
                    path: PathBuf::from("/definitely/not/here.jpg"),
                }],
            )
            .await;

        assert!(result.is_err());
        assert!(outbox.messages().is_empty());
    }
}
