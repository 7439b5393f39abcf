//! Digest delivery: chat webhook and console sinks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "interpel-notify";

pub const DEFAULT_USERNAME: &str = "InterpelBot";
pub const DEFAULT_ICON: &str = ":parliament:";
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no webhook endpoint configured")]
    MissingEndpoint,
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers one composed digest. Returns whether delivery succeeded; failures
/// are logged by the implementation and never propagate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, digest: &str) -> bool;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookPayload<'a> {
    pub text: &'a str,
    pub username: &'a str,
    pub icon_emoji: &'a str,
}

/// Mattermost-style incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
    username: String,
    icon: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.filter(|url| !url.trim().is_empty()),
            username: DEFAULT_USERNAME.to_string(),
            icon: DEFAULT_ICON.to_string(),
        }
    }

    pub fn with_identity(mut self, username: impl Into<String>, icon: impl Into<String>) -> Self {
        self.username = username.into();
        self.icon = icon.into();
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub async fn post(&self, digest: &str) -> Result<(), NotifyError> {
        let endpoint = self.endpoint.as_deref().ok_or(NotifyError::MissingEndpoint)?;
        let payload = WebhookPayload {
            text: digest,
            username: &self.username,
            icon_emoji: &self.icon,
        };

        let resp = self
            .client
            .post(endpoint)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, digest: &str) -> bool {
        match self.post(digest).await {
            Ok(()) => {
                info!(bytes = digest.len(), "digest delivered to webhook");
                true
            }
            Err(NotifyError::MissingEndpoint) => {
                warn!("no webhook endpoint configured; skipping notification");
                false
            }
            Err(err) => {
                warn!(error = %err, "digest delivery failed");
                false
            }
        }
    }
}

/// Prints digests to stdout instead of posting them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn deliver(&self, digest: &str) -> bool {
        println!("{digest}");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_text_username_and_icon() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/abc"))
            .and(body_json(json!({
                "text": "## hello",
                "username": "InterpelBot",
                "icon_emoji": ":parliament:"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/hooks/abc", server.uri())));
        assert!(notifier.deliver("## hello").await);
    }

    #[tokio::test]
    async fn custom_identity_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"text": "x", "username": "Sejm", "icon_emoji": ":bell:"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(server.uri())).with_identity("Sejm", ":bell:");
        assert!(notifier.deliver("x").await);
    }

    #[tokio::test]
    async fn rejected_delivery_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(server.uri()));
        let err = notifier.post("x").await.unwrap_err();
        assert!(
            matches!(err, NotifyError::Rejected { status: 400, ref body } if body == "bad payload")
        );
        assert!(!notifier.deliver("x").await);
    }

    #[tokio::test]
    async fn missing_endpoint_is_a_soft_skip() {
        let notifier = WebhookNotifier::new(Some("   ".into()));
        assert_eq!(notifier.endpoint(), None);
        assert!(!notifier.deliver("x").await);
        assert!(matches!(notifier.post("x").await, Err(NotifyError::MissingEndpoint)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_failure() {
        let notifier = WebhookNotifier::new(Some("http://127.0.0.1:9/hook".into()));
        assert!(!notifier.deliver("x").await);
    }
}
