// src/notify/webhook.rs

//! Webhook delivery.
//!
//! POSTs a `{"text": ...}` JSON payload, the shape Slack-compatible
//! incoming webhooks accept.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Result};
use crate::notify::{Alert, Notify};

const CHANNEL: &str = "webhook";

/// Webhook-backed notifier.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let text = format!("{}\n{}", alert.subject, alert.body);
        let payload = serde_json::json!({ "text": text });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::delivery_failed(CHANNEL, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            Err(AppError::delivery_failed(CHANNEL, format!("HTTP {status}")))
        } else {
            Err(AppError::delivery_rejected(CHANNEL, format!("HTTP {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> Alert {
        Alert {
            subject: "test subject".to_string(),
            body: "test body".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_text_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json_string(r#"{"text":"test subject\ntest body"}"#))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()), Client::new());
        notifier.send(&alert()).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Client::new());
        let result = notifier.send(&alert()).await;
        assert!(matches!(result, Err(AppError::DeliveryFailed { .. })));
    }

    #[tokio::test]
    async fn test_client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Client::new());
        let result = notifier.send(&alert()).await;
        assert!(matches!(result, Err(AppError::DeliveryRejected { .. })));
    }
}
