//! Tracker health shared between the poll loop and the dashboard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::valuation::engine::ValuationReport;

/// Shared health state updated by the tracker loop.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthData>>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthData {
    status: String,
    symbol: String,
    cycle_number: u64,
    started_at: DateTime<Utc>,
    last_cycle_at: Option<DateTime<Utc>>,
    uptime_seconds: i64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_price: Option<f64>,
    last_tier: Option<String>,
    stale: bool,
}

impl HealthState {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthData {
                status: "starting".to_string(),
                symbol: symbol.into(),
                cycle_number: 0,
                started_at: Utc::now(),
                last_cycle_at: None,
                uptime_seconds: 0,
                consecutive_failures: 0,
                last_error: None,
                last_price: None,
                last_tier: None,
                stale: false,
            })),
        }
    }

    pub async fn record_cycle(&self, cycle_number: u64, report: &ValuationReport) {
        let mut data = self.inner.write().await;
        let now = Utc::now();
        data.cycle_number = cycle_number;
        data.last_cycle_at = Some(now);
        data.uptime_seconds = (now - data.started_at).num_seconds();
        data.consecutive_failures = 0;
        data.last_error = None;
        data.last_price = Some(report.price);
        data.last_tier = report.tier().map(|tier| tier.id.clone());
        data.stale = report.stale;
        data.status = if report.stale { "degraded" } else { "ok" }.to_string();
    }

    pub async fn record_failure(&self, cycle_number: u64, error: &anyhow::Error) {
        let mut data = self.inner.write().await;
        let now = Utc::now();
        data.cycle_number = cycle_number;
        data.last_cycle_at = Some(now);
        data.uptime_seconds = (now - data.started_at).num_seconds();
        data.consecutive_failures += 1;
        data.last_error = Some(format!("{error:#}"));
        data.status = "error".to_string();
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let data = self.inner.read().await;
        serde_json::to_value(&*data).unwrap_or_else(|_| {
            serde_json::json!({"status": "error", "message": "serialization failed"})
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::models::{Freshness, Fundamentals, Quote};
    use crate::valuation::engine::ValuationEngine;

    fn report(stale: bool) -> ValuationReport {
        let fundamentals = Fundamentals::new(97.0, 3.19, "2024-Q4", Freshness::Cached);
        let mut report = ValuationEngine::reference()
            .evaluate(&Quote::from_price(250.0), Some(&fundamentals))
            .unwrap();
        report.stale = stale;
        report
    }

    #[tokio::test]
    async fn test_health_state_creation() {
        let state = HealthState::new("TSLA");
        let json = state.to_json().await;
        assert_eq!(json["status"], "starting");
        assert_eq!(json["symbol"], "TSLA");
        assert_eq!(json["cycle_number"], 0);
    }

    #[tokio::test]
    async fn test_health_state_update() {
        let state = HealthState::new("TSLA");
        state.record_cycle(5, &report(false)).await;

        let json = state.to_json().await;
        assert_eq!(json["cycle_number"], 5);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["last_tier"], "fair");
        assert_eq!(json["last_price"], 250.0);
    }

    #[tokio::test]
    async fn test_stale_cycle_is_degraded() {
        let state = HealthState::new("TSLA");
        state.record_cycle(2, &report(true)).await;
        let json = state.to_json().await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["stale"], true);
    }

    #[tokio::test]
    async fn test_failures_accumulate_and_reset() {
        let state = HealthState::new("TSLA");
        state.record_failure(1, &anyhow::anyhow!("quote unavailable")).await;
        state.record_failure(2, &anyhow::anyhow!("quote unavailable")).await;

        let json = state.to_json().await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["consecutive_failures"], 2);
        assert_eq!(json["last_error"], "quote unavailable");

        state.record_cycle(3, &report(false)).await;
        let json = state.to_json().await;
        assert_eq!(json["consecutive_failures"], 0);
        assert!(json["last_error"].is_null());
    }
}
