use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub recipient: String,
    pub attachments: Vec<Attachment>,
}

/// Delivery capability for outgoing mail.
///
/// Implementations log their own failures and report only whether the
/// message was handed off.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> bool;
}

/// Drops each message into its own directory under `dir` for a relay to pick up.
#[derive(Debug, Clone)]
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write(&self, mail: &OutgoingMail) -> std::io::Result<PathBuf> {
        let folder = self.dir.join(format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&folder).await?;

        let mut message = format!("To: {}\nSubject: {}\n", mail.recipient, mail.subject);
        for attachment in &mail.attachments {
            message.push_str(&format!(
                "Attachment: {} ({})\n",
                attachment.filename, attachment.content_type
            ));
        }
        message.push('\n');
        message.push_str(&mail.body);
        tokio::fs::write(folder.join("message.txt"), message).await?;

        for attachment in &mail.attachments {
            let name = sanitize_filename(&attachment.filename);
            tokio::fs::write(folder.join(name), &attachment.content).await?;
        }
        Ok(folder)
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, mail: &OutgoingMail) -> bool {
        match self.write(mail).await {
            Ok(folder) => {
                info!(recipient = %mail.recipient, path = %folder.display(), "mail queued in outbox");
                true
            }
            Err(err) => {
                error!(recipient = %mail.recipient, error = %err, "failed to queue mail");
                false
            }
        }
    }
}

/// Logs the message and reports it as undelivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> bool {
        warn!(
            recipient = %mail.recipient,
            subject = %mail.subject,
            attachments = mail.attachments.len(),
            "no mail transport configured, message not delivered"
        );
        false
    }
}
