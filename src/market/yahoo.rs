//! Yahoo Finance client for quotes, chart bars and company financials.
//!
//! Every request goes through a shared rate limiter and an exponential
//! backoff retry. Response parsing is kept in pure functions so it can be
//! tested without a network.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::{MarketDataConfig, RateLimitConfig};
use crate::market::models::{Candle, ChartRange, Quote, ReportedFinancials};
use crate::market::MarketDataSource;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const QUOTE_SUMMARY_MODULES: &str = "defaultKeyStatistics,financialData";

/// Non-success HTTP status from the provider.
#[derive(Debug, Error)]
#[error("Yahoo API {status}: {body}")]
pub struct HttpStatusError {
    pub status: StatusCode,
    pub body: String,
}

impl HttpStatusError {
    /// Client errors will not succeed on retry, except throttling.
    fn is_retryable(&self) -> bool {
        !self.status.is_client_error() || self.status == StatusCode::TOO_MANY_REQUESTS
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(std::cmp::min(
            self.backoff_base_ms.saturating_mul(factor),
            self.backoff_max_ms,
        ))
    }
}

pub struct YahooClient {
    http: reqwest::Client,
    base_url: String,
    symbol: String,
    limiter: Arc<Limiter>,
    retry: RetryPolicy,
}

impl YahooClient {
    pub fn new(market: &MarketDataConfig, rate_limit: &RateLimitConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(market.request_timeout_seconds))
            .user_agent("Mozilla/5.0 (compatible; tsla-valuation)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: market.base_url.trim_end_matches('/').to_string(),
            symbol: market.symbol.to_uppercase(),
            limiter: create_rate_limiter(rate_limit),
            retry: RetryPolicy {
                max_retries: market.max_retries,
                backoff_base_ms: rate_limit.backoff_base_ms,
                backoff_max_ms: rate_limit.backoff_max_ms,
            },
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Latest quote from the daily chart endpoint.
    #[instrument(skip(self), fields(symbol = %self.symbol))]
    pub async fn fetch_quote(&self) -> Result<Quote> {
        let response: ChartResponse = self
            .get_json(&self.chart_url(), &[("interval", "1d"), ("range", "1d")])
            .await
            .context("Failed to fetch quote")?;
        let quote = parse_quote(response)?;
        debug!(price = quote.current_price, change_pct = quote.change_percent, "Quote fetched");
        Ok(quote)
    }

    #[instrument(skip(self), fields(symbol = %self.symbol, range = %range))]
    pub async fn fetch_candles(&self, range: ChartRange) -> Result<Vec<Candle>> {
        let response: ChartResponse = self
            .get_json(
                &self.chart_url(),
                &[("interval", range.interval()), ("range", range.range())],
            )
            .await
            .context("Failed to fetch chart")?;
        let candles = parse_candles(response)?;
        debug!(count = candles.len(), "Candles fetched");
        Ok(candles)
    }

    #[instrument(skip(self), fields(symbol = %self.symbol))]
    pub async fn fetch_financials(&self) -> Result<ReportedFinancials> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}",
            self.base_url,
            urlencoding::encode(&self.symbol)
        );
        let response: QuoteSummaryResponse = self
            .get_json(&url, &[("modules", QUOTE_SUMMARY_MODULES)])
            .await
            .context("Failed to fetch financials")?;
        parse_financials(response)
    }

    fn chart_url(&self) -> String {
        format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            urlencoding::encode(&self.symbol)
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        self.with_retry(|| async move {
            self.rate_limit().await;

            let resp = self
                .http
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| anyhow!("HTTP error: {e}"))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(HttpStatusError { status, body }.into());
            }

            resp.json::<T>()
                .await
                .map_err(|e| anyhow!("Deserialization error: {e}"))
        })
        .await
    }

    async fn rate_limit(&self) {
        self.limiter.until_ready().await;
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;

                    if let Some(status_err) = e.downcast_ref::<HttpStatusError>() {
                        if !status_err.is_retryable() {
                            return Err(e.context("Client error, not retrying"));
                        }
                    }

                    if attempt > self.retry.max_retries {
                        return Err(
                            e.context(format!("Failed after {} retries", self.retry.max_retries))
                        );
                    }

                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );

                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    async fn quote(&self) -> Result<Quote> {
        self.fetch_quote().await
    }

    async fn candles(&self, range: ChartRange) -> Result<Vec<Candle>> {
        self.fetch_candles(range).await
    }

    async fn financials(&self) -> Result<ReportedFinancials> {
        self.fetch_financials().await
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}

fn create_rate_limiter(config: &RateLimitConfig) -> Arc<Limiter> {
    let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(rps);

    let quota = Quota::per_second(rps).allow_burst(burst);
    Arc::new(RateLimiter::direct(quota))
}

// === Response parsing ===

/// Zero and missing are both "not reported" for Yahoo price fields.
fn reported(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

pub fn parse_quote(response: ChartResponse) -> Result<Quote> {
    let result = response.into_first_result()?;
    let meta = result.meta;
    let price = reported(meta.regular_market_price)
        .ok_or_else(|| anyhow!("Quote response has no regularMarketPrice"))?;

    let first_bar = result
        .indicators
        .quote
        .into_iter()
        .next()
        .unwrap_or_default();
    let first = |values: &[Option<f64>]| reported(values.first().copied().flatten());

    let previous_close = reported(meta.previous_close)
        .or(reported(meta.chart_previous_close))
        .unwrap_or(price);

    let mut quote = Quote::new(price, previous_close);
    quote.high = reported(meta.regular_market_day_high)
        .or_else(|| first(&first_bar.high))
        .unwrap_or(price);
    quote.low = reported(meta.regular_market_day_low)
        .or_else(|| first(&first_bar.low))
        .unwrap_or(price);
    quote.open = reported(meta.regular_market_open)
        .or_else(|| first(&first_bar.open))
        .unwrap_or(price);
    Ok(quote)
}

/// Bars with a missing open or close are dropped; missing high/low fall back to the body.
pub fn parse_candles(response: ChartResponse) -> Result<Vec<Candle>> {
    let result = response.into_first_result()?;
    let timestamps = result.timestamp.unwrap_or_default();
    let Some(bars) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };

    let at = |values: &[Option<f64>], i: usize| reported(values.get(i).copied().flatten());

    let candles = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, &time)| {
            let open = at(&bars.open, i)?;
            let close = at(&bars.close, i)?;
            Some(Candle {
                time,
                open,
                high: at(&bars.high, i).unwrap_or(open.max(close)),
                low: at(&bars.low, i).unwrap_or(open.min(close)),
                close,
            })
        })
        .collect();
    Ok(candles)
}

pub fn parse_financials(response: QuoteSummaryResponse) -> Result<ReportedFinancials> {
    let result = response
        .quote_summary
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("quoteSummary response has no result"))?;

    let stats = result
        .default_key_statistics
        .ok_or_else(|| anyhow!("quoteSummary response has no defaultKeyStatistics"))?;

    Ok(ReportedFinancials {
        total_revenue: result
            .financial_data
            .and_then(|f| f.total_revenue)
            .and_then(|v| v.raw),
        shares_outstanding: stats.shares_outstanding.and_then(|v| v.raw),
    })
}

// === Response types ===

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    chart: ChartData,
}

impl ChartResponse {
    fn into_first_result(self) -> Result<ChartResult> {
        if let Some(error) = self.chart.error.filter(|e| !e.is_null()) {
            return Err(anyhow!("Yahoo chart error: {error}"));
        }
        self.chart
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Chart response has no result"))
    }
}

#[derive(Debug, Deserialize)]
struct ChartData {
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_open: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartBars>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartBars {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryData,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryData {
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    default_key_statistics: Option<KeyStatistics>,
    financial_data: Option<FinancialData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    shares_outstanding: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialData {
    total_revenue: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}
