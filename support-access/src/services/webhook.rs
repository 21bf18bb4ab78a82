//! Access lifecycle observers.
//!
//! Observers are notified after local state has changed. They must not block:
//! anything slow is spawned and failures are only logged.

use reqwest::{Client, Url};
use std::time::Duration;

use crate::models::AccessEvent;

pub trait AccessObserver: Send + Sync {
    fn on_access_created(&self, _event: &AccessEvent) {}
    fn on_access_revoked(&self, _event: &AccessEvent) {}
}

/// POSTs `{url, action}` to the configured webhook.
pub struct WebhookNotifier {
    client: Client,
    url: Option<Url>,
}

impl WebhookNotifier {
    /// An unparsable or non-http(s) URL disables the webhook with a warning.
    pub fn new(url: Option<&str>) -> Self {
        let url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .and_then(|raw| match Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(parsed),
                Ok(parsed) => {
                    tracing::warn!(scheme = %parsed.scheme(), "Webhook URL must be http(s), webhook disabled");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid webhook URL, webhook disabled");
                    None
                }
            });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default webhook client");
                Client::new()
            });

        Self { client, url }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    fn dispatch(&self, event: &AccessEvent) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available, webhook skipped");
            return;
        };

        let client = self.client.clone();
        let event = event.clone();
        runtime.spawn(async move {
            match client.post(url.clone()).json(&event).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(action = ?event.action, "Webhook delivered");
                }
                Ok(response) => {
                    tracing::warn!(
                        action = ?event.action,
                        status = %response.status(),
                        "Webhook endpoint returned an error"
                    );
                }
                Err(e) => {
                    tracing::warn!(action = ?event.action, error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}

impl AccessObserver for WebhookNotifier {
    fn on_access_created(&self, event: &AccessEvent) {
        self.dispatch(event);
    }

    fn on_access_revoked(&self, event: &AccessEvent) {
        self.dispatch(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessAction;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_invalid_urls_disable_the_webhook() {
        assert!(!WebhookNotifier::new(None).is_enabled());
        assert!(!WebhookNotifier::new(Some("")).is_enabled());
        assert!(!WebhookNotifier::new(Some("not a url")).is_enabled());
        assert!(!WebhookNotifier::new(Some("ftp://hooks.example/x")).is_enabled());
        assert!(WebhookNotifier::new(Some("https://hooks.example/x")).is_enabled());
    }

    #[tokio::test]
    async fn test_posts_event_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({
                "url": "https://site.example",
                "action": "create"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(&format!("{}/hook", server.uri())));
        notifier.on_access_created(&AccessEvent {
            url: "https://site.example".to_string(),
            action: AccessAction::Create,
        });

        for _ in 0..50 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_failing_endpoint_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(&server.uri()));
        notifier.on_access_revoked(&AccessEvent {
            url: "https://site.example".to_string(),
            action: AccessAction::Revoke,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
