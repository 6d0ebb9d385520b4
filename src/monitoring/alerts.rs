//! Webhook alert delivery.
//!
//! Posts plain-text alert messages to a Discord-compatible webhook. With no
//! URL configured the client is a no-op.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::monitoring::rules::AlertEvent;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The webhook accepted the message.
    Sent,
    /// No webhook configured; the alert is only recorded.
    Skipped,
    /// The webhook was unreachable or rejected the message.
    Failed,
}

pub struct AlertClient {
    webhook_url: Option<String>,
    http: reqwest::Client,
    enabled: bool,
    symbol: String,
}

/// Webhook message format.
#[derive(Debug, Serialize)]
struct WebhookMessage {
    content: String,
    username: String,
}

impl AlertClient {
    pub fn new(webhook_url: Option<String>, enabled: bool, symbol: impl Into<String>) -> Self {
        Self {
            enabled: enabled && webhook_url.is_some(),
            webhook_url,
            http: reqwest::Client::new(),
            symbol: symbol.into(),
        }
    }

    /// Send a raw message. Delivery failures are logged and reported as `Failed`.
    async fn send(&self, message: &str) -> Result<Delivery> {
        if !self.enabled {
            return Ok(Delivery::Skipped);
        }

        let Some(ref url) = self.webhook_url else {
            return Ok(Delivery::Skipped);
        };

        let payload = WebhookMessage {
            content: message.to_string(),
            username: format!("{} Valuation", self.symbol),
        };

        match self.http.post(url).json(&payload).send().await {
            Ok(response) => {
                if !response.status().is_success() {
                    warn!(
                        status = %response.status(),
                        "Alert webhook returned non-success status"
                    );
                    return Ok(Delivery::Failed);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to send alert");
                return Ok(Delivery::Failed);
            }
        }

        Ok(Delivery::Sent)
    }

    /// Deliver one alert event.
    pub async fn deliver(&self, event: &AlertEvent) -> Result<Delivery> {
        let message = self.format(event);
        let delivery = self.send(&message).await?;
        info!(kind = event.kind(), price = event.price(), ?delivery, "Alert raised");
        Ok(delivery)
    }

    fn format(&self, event: &AlertEvent) -> String {
        let title = match event {
            AlertEvent::PriceHigh { .. } | AlertEvent::PriceLow { .. } => "Price Alert",
            AlertEvent::ValuationChange { .. } => "Valuation Changed",
            AlertEvent::LargeMovement { .. } => "Large Movement",
            AlertEvent::DailyDigest { .. } => "Daily Digest",
        };
        format!("**{title}**\n{}", event.message(&self.symbol))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> AlertEvent {
        AlertEvent::PriceHigh {
            price: 505.0,
            threshold: 500.0,
        }
    }

    #[test]
    fn test_alert_client_disabled() {
        let client = AlertClient::new(None, false, "TSLA");
        assert!(!client.is_enabled());
    }

    #[test]
    fn test_alert_client_enabled_with_url() {
        let client = AlertClient::new(
            Some("https://discord.com/api/webhooks/123/abc".to_string()),
            true,
            "TSLA",
        );
        assert!(client.is_enabled());
    }

    #[test]
    fn test_alert_client_disabled_no_url() {
        let client = AlertClient::new(None, true, "TSLA");
        assert!(!client.is_enabled());
    }

    #[test]
    fn test_format_has_title_and_message() {
        let client = AlertClient::new(None, false, "TSLA");
        let text = client.format(&event());
        assert!(text.starts_with("**Price Alert**\n"));
        assert!(text.contains("TSLA crossed above $500.00, now $505.00"));
    }

    #[test]
    fn test_send_disabled_noop() {
        let client = AlertClient::new(None, false, "TSLA");
        let delivered = tokio_test::assert_ok!(tokio_test::block_on(client.deliver(&event())));
        assert_eq!(delivered, Delivery::Skipped);
    }

    #[tokio::test]
    async fn test_deliver_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({"username": "TSLA Valuation"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = AlertClient::new(Some(format!("{}/hook", server.uri())), true, "TSLA");
        assert_eq!(client.deliver(&event()).await.unwrap(), Delivery::Sent);
    }

    #[tokio::test]
    async fn test_deliver_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = AlertClient::new(Some(server.uri()), true, "TSLA");
        assert_eq!(client.deliver(&event()).await.unwrap(), Delivery::Failed);
    }
}
