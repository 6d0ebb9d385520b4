//! Chat assistant backed by an LLM messages API, with a canned fallback.
//!
//! The live-data context is passed explicitly with each request. The chat is
//! a Pro feature: free callers get an upsell reply and the model is never
//! called. Without an API key, or when the API call fails, the reply comes
//! from a template keyed on the caller's question and the tier signal.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::assistant::context::{market_status, AssistantContext};
use crate::config::AssistantConfig;
use crate::valuation::engine::Access;
use crate::valuation::tier::Signal;

const SYSTEM_PROMPT: &str = "You are a stock tracking assistant dedicated to a single ticker. \
Answer in plain language for investors of any experience level. \
Ground every answer in the live data block at the top of the user's message, \
mention relevant headwinds or tailwinds, and politely decline questions about other stocks. \
If the valuation tier is marked hidden, do not guess it. \
Close with a reminder that this is not financial advice.";

const DISCLAIMER: &str = "This is not financial advice. Always do your own research.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Model,
    Fallback,
    /// Free caller; the chat is reserved for the Pro plan.
    Upsell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantReply {
    pub text: String,
    pub source: ReplySource,
}

pub struct AssistantClient {
    client: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    max_tokens: u32,
}

impl AssistantClient {
    pub fn new(config: &AssistantConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.filter(|_| config.enabled),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn has_model(&self) -> bool {
        self.api_key.is_some()
    }

    /// Answer `message` with the given context. Never fails: API errors fall back.
    pub async fn reply(&self, context: &AssistantContext, message: &str) -> AssistantReply {
        self.reply_at(context, message, Utc::now()).await
    }

    pub async fn reply_at(
        &self,
        context: &AssistantContext,
        message: &str,
        now: DateTime<Utc>,
    ) -> AssistantReply {
        if context.access != Access::Pro {
            return AssistantReply {
                text: fallback_reply(context, message, now),
                source: ReplySource::Upsell,
            };
        }

        if self.api_key.is_some() {
            match self.complete(context, message, now).await {
                Ok(text) if !text.trim().is_empty() => {
                    return AssistantReply {
                        text,
                        source: ReplySource::Model,
                    }
                }
                Ok(_) => warn!("Assistant API returned an empty reply, using fallback"),
                Err(e) => warn!(error = %e, "Assistant API call failed, using fallback"),
            }
        }

        AssistantReply {
            text: fallback_reply(context, message, now),
            source: ReplySource::Fallback,
        }
    }

    #[instrument(skip(self, context, message), fields(model = %self.model))]
    async fn complete(
        &self,
        context: &AssistantContext,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("Assistant API key not configured");
        };

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: format!("{}\n\n{}", context.live_data_block(now), message),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Assistant API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("Assistant API error ({}): {}", status, error_body);
        }

        let api_response: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse assistant API response")?;

        let text = api_response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<&str>>()
            .join("");

        info!(
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            "Assistant API call completed"
        );

        Ok(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Buy,
    Sell,
    General,
}

const BUY_WORDS: [&str; 7] = ["buy", "buying", "purchase", "add", "adding", "accumulate", "enter"];
const SELL_WORDS: [&str; 7] = ["sell", "selling", "profit", "profits", "exit", "trim", "trimming"];

/// Classify by whole words, so "address" is not a buy question.
fn intent(message: &str) -> Intent {
    let lower = message.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if mentions(&words, &BUY_WORDS) {
        Intent::Buy
    } else if mentions(&words, &SELL_WORDS) {
        Intent::Sell
    } else {
        Intent::General
    }
}

fn mentions(words: &[&str], vocabulary: &[&str]) -> bool {
    words.iter().any(|word| vocabulary.contains(word))
}

const TAILWINDS: [&str; 4] = [
    "autonomy progress",
    "energy storage growth",
    "robotaxi optionality",
    "strong brand loyalty",
];

const HEADWINDS: [&str; 4] = [
    "intensifying EV competition",
    "margin pressure from price cuts",
    "regulatory uncertainty",
    "high expectations already priced in",
];

/// Headwind/tailwind line for a signal. `seed` rotates the examples.
fn commentary(signal: Option<Signal>, seed: usize) -> String {
    let tail = TAILWINDS[seed % TAILWINDS.len()];
    let head = HEADWINDS[seed % HEADWINDS.len()];
    match signal {
        Some(Signal::Wait | Signal::Sell) => format!("Headwinds to watch: {head}."),
        Some(Signal::StrongBuy | Signal::Buy) => format!("Tailwinds building: {tail}."),
        Some(Signal::Hold) | None => format!("Mixed signals: {tail}, but {head}."),
    }
}

/// Templated reply for free callers, and for Pro callers without an API key
/// or when the API fails. Same inputs, same text.
pub fn fallback_reply(context: &AssistantContext, message: &str, now: DateTime<Utc>) -> String {
    let price = context
        .price
        .map(|p| format!("${p:.2}"))
        .unwrap_or_else(|| "unavailable".to_string());
    let status = market_status(now);
    let header = format!("{} is at {price} right now. {status}.", context.symbol);
    let seed = message.len();

    let body = match (context.access, &context.tier_label, context.multiple) {
        (Access::Pro, Some(label), Some(multiple)) => {
            let action = context.signal.map(|s| s.to_string()).unwrap_or_default();
            let guidance = match intent(message) {
                Intent::Buy => "If you are adding, consider scaling in rather than going all in.",
                Intent::Sell => "If you are trimming, decide on a target and stick to it.",
                Intent::General => "Watch how the multiple moves relative to the tier boundaries.",
            };
            format!(
                "Valuation: {label} at {multiple:.1}x sales, signal {action}.\n{}\n{guidance}",
                commentary(context.signal, seed)
            )
        }
        (Access::Free, _, _) => {
            let topic = match intent(message) {
                Intent::Buy => "Whether to buy depends on where the stock sits in its valuation cycle.",
                Intent::Sell => "Whether to sell depends on whether the stock is stretched on valuation.",
                Intent::General => "Think in years rather than days with a volatile stock.",
            };
            format!("{topic}\nThe live valuation tier and the AI assistant are available on the Pro plan.")
        }
        _ => "The valuation is still loading. Ask again in a moment.".to_string(),
    };

    format!("{header}\n\n{body}\n\n{DISCLAIMER}")
}

// --- Request/Response Types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_url: String) -> AssistantConfig {
        AssistantConfig {
            enabled: true,
            api_url,
            model: "test-model".to_string(),
            max_tokens: 256,
            request_timeout_seconds: 5,
        }
    }

    fn monday_open() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap()
    }

    fn pro_context() -> AssistantContext {
        AssistantContext {
            symbol: "TSLA".to_string(),
            access: Access::Pro,
            price: Some(420.0),
            change_percent: Some(1.2),
            tier_label: Some("EXPENSIVE".to_string()),
            signal: Some(Signal::Wait),
            multiple: Some(13.8),
            stale: false,
        }
    }

    #[test]
    fn test_intent_detection() {
        assert_eq!(intent("Should I BUY now?"), Intent::Buy);
        assert_eq!(intent("time to take profits?"), Intent::Sell);
        assert_eq!(intent("what is happening"), Intent::General);
        assert_eq!(intent("what address is the factory at?"), Intent::General);
        assert_eq!(intent("is this a good exit, or a profitable time?"), Intent::Sell);
        assert_eq!(intent("buy-and-hold?"), Intent::Buy);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let first = fallback_reply(&pro_context(), "should I sell?", monday_open());
        let second = fallback_reply(&pro_context(), "should I sell?", monday_open());
        assert_eq!(first, second);
        assert!(first.contains("Market is open"));

        let weekend = Utc.with_ymd_and_hms(2026, 10, 18, 15, 0, 0).unwrap();
        assert!(fallback_reply(&pro_context(), "should I sell?", weekend).contains("Weekend"));
    }

    #[test]
    fn test_fallback_pro_mentions_tier_and_headwinds() {
        let reply = fallback_reply(&pro_context(), "should I sell?", monday_open());
        assert!(reply.contains("EXPENSIVE at 13.8x"));
        assert!(reply.contains("signal WAIT"));
        assert!(reply.contains("Headwinds"));
        assert!(reply.ends_with(DISCLAIMER));
    }

    #[test]
    fn test_fallback_free_never_reveals_tier() {
        let mut context = pro_context();
        context.access = Access::Free;
        let reply = fallback_reply(&context, "should I buy?", monday_open());
        assert!(!reply.contains("EXPENSIVE"));
        assert!(reply.contains("Pro plan"));
        assert!(reply.contains("$420.00"));
    }

    #[test]
    fn test_fallback_while_loading() {
        let context = AssistantContext::empty("TSLA", Access::Pro);
        let reply = fallback_reply(&context, "hi", monday_open());
        assert!(reply.contains("still loading"));
        assert!(reply.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_reply_without_key_falls_back() {
        let client = AssistantClient::new(&config("http://127.0.0.1:9".to_string()), None).unwrap();
        assert!(!client.has_model());
        let reply = client.reply(&pro_context(), "hello").await;
        assert_eq!(reply.source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn test_reply_from_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "Trading at 13.8x sales."}],
                "usage": {"input_tokens": 120, "output_tokens": 12}
            })))
            .mount(&server)
            .await;

        let client = AssistantClient::new(
            &config(format!("{}/v1/messages", server.uri())),
            Some("secret".to_string()),
        )
        .unwrap();
        let reply = client.reply(&pro_context(), "how expensive is it?").await;
        assert_eq!(reply.source, ReplySource::Model);
        assert_eq!(reply.text, "Trading at 13.8x sales.");
    }

    #[tokio::test]
    async fn test_reply_api_error_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let client = AssistantClient::new(&config(server.uri()), Some("secret".to_string())).unwrap();
        let reply = client.reply(&pro_context(), "hello").await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert!(reply.text.contains("EXPENSIVE"));
    }

    #[tokio::test]
    async fn test_free_caller_never_reaches_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "should not be used"}],
                "usage": {"input_tokens": 1, "output_tokens": 1}
            })))
            .expect(0)
            .mount(&server)
            .await;

        let client = AssistantClient::new(&config(server.uri()), Some("secret".to_string())).unwrap();
        let mut context = pro_context();
        context.access = Access::Free;
        let reply = client.reply(&context, "should I buy?").await;

        assert_eq!(reply.source, ReplySource::Upsell);
        assert!(reply.text.contains("Pro plan"));
        assert!(!reply.text.contains("EXPENSIVE"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_disabled_config_drops_key() {
        let mut cfg = config("http://localhost".to_string());
        cfg.enabled = false;
        let client = AssistantClient::new(&cfg, Some("secret".to_string())).unwrap();
        assert!(!client.has_model());
    }
}
