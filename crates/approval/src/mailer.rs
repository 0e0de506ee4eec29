//! Outbound email backends.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    #[error("mail relay request failed: {0}")]
    Transport(String),

    #[error("mail relay rejected the message: HTTP {status}")]
    Rejected { status: u16 },

    #[error("mailer misconfigured: {0}")]
    Config(String),
}

/// Sends one HTML email.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError>;

    /// Short backend name for logs.
    fn mailer_id(&self) -> &str;
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Posts messages to a transactional-email relay's JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, from: impl Into<String>) -> Result<Self, MailError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(MailError::Config(format!(
                "relay endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        Ok(Self {
            endpoint,
            api_key,
            from: from.into(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let body = serde_json::to_value(RelayMessage {
            from: &self.from,
            to,
            subject,
            html,
        })
        .map_err(|e| MailError::Transport(format!("failed to encode message: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.post(&endpoint).header("content-type", "application/json");
            if let Some(ref key) = api_key {
                request = request.header("Authorization", &format!("Bearer {}", key));
            }
            match request.send_json(&body) {
                Ok(_) => Ok(()),
                Err(ureq::Error::StatusCode(status)) => Err(MailError::Rejected { status }),
                Err(e) => Err(MailError::Transport(e.to_string())),
            }
        })
        .await
        .map_err(|e| MailError::Transport(format!("task join error: {}", e)))?
    }

    fn mailer_id(&self) -> &str {
        "http"
    }
}

/// A message captured by [`LogMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Logs messages instead of sending them and keeps a copy.
///
/// Used when no relay is configured and in tests.
#[derive(Debug, Default)]
pub struct LogMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        info!(to, subject, bytes = html.len(), "email not sent (log mailer)");
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
            });
        Ok(())
    }

    fn mailer_id(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mailer_requires_http_endpoint() {
        assert!(matches!(
            HttpMailer::new("smtp://mail.example.com", None, "coa@example.com"),
            Err(MailError::Config(_))
        ));
        assert!(HttpMailer::new("https://relay.example.com/send", None, "coa@example.com").is_ok());
    }

    #[tokio::test]
    async fn log_mailer_records_messages() {
        let mailer = LogMailer::new();
        mailer.send("qa@example.com", "subject", "<p>hi</p>").await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "qa@example.com");
    }
}
