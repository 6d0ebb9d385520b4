//! Trailing revenue and share count, with a configured fallback snapshot.
//!
//! The tracker always has a snapshot to offer. A live fetch replaces it only
//! when both values land inside the configured sanity ranges; anything else
//! keeps the previous snapshot.

use chrono::{DateTime, Datelike, Utc};
use tracing::{info, warn};

use crate::config::FundamentalsConfig;
use crate::market::models::{Freshness, Fundamentals, ReportedFinancials};
use crate::market::MarketDataSource;

const BILLION: f64 = 1e9;

pub struct FundamentalsTracker {
    config: FundamentalsConfig,
    current: Fundamentals,
    last_attempt: Option<DateTime<Utc>>,
}

impl FundamentalsTracker {
    pub fn new(config: FundamentalsConfig) -> Self {
        let current = Fundamentals::new(
            config.fallback_revenue,
            config.fallback_shares,
            config.fallback_as_of.clone(),
            Freshness::Cached,
        );
        Self {
            config,
            current,
            last_attempt: None,
        }
    }

    pub fn current(&self) -> &Fundamentals {
        &self.current
    }

    /// Whether the refresh interval has elapsed since the last attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.config.refresh_interval_seconds as i64
            }
        }
    }

    /// Convert raw provider values to billions and accept them if plausible.
    pub fn accept(&self, reported: &ReportedFinancials, now: DateTime<Utc>) -> Option<Fundamentals> {
        let revenue = reported.total_revenue? / BILLION;
        let shares = reported.shares_outstanding? / BILLION;

        let revenue_ok = (self.config.min_revenue..=self.config.max_revenue).contains(&revenue);
        let shares_ok = (self.config.min_shares..=self.config.max_shares).contains(&shares);
        if !revenue_ok || !shares_ok {
            warn!(revenue, shares, "Reported financials outside sanity range, ignoring");
            return None;
        }

        Some(Fundamentals::new(
            round2(revenue),
            round2(shares),
            quarter_label(now),
            Freshness::Live,
        ))
    }

    /// Fetch from `source` and replace the snapshot on success.
    ///
    /// Failures are logged and leave the previous snapshot in place.
    pub async fn refresh(&mut self, source: &dyn MarketDataSource) -> &Fundamentals {
        let now = Utc::now();
        self.last_attempt = Some(now);

        match source.financials().await {
            Ok(reported) => {
                if let Some(fresh) = self.accept(&reported, now) {
                    info!(
                        revenue = fresh.trailing_revenue,
                        shares = fresh.shares_outstanding,
                        as_of = %fresh.as_of,
                        "Fundamentals refreshed"
                    );
                    self.current = fresh;
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    source = source.name(),
                    as_of = %self.current.as_of,
                    "Fundamentals fetch failed, keeping previous snapshot"
                );
            }
        }

        &self.current
    }
}

/// `"<year>-Q<n> (live)"` for the calendar quarter containing `now`.
pub fn quarter_label(now: DateTime<Utc>) -> String {
    let quarter = (now.month() - 1) / 3 + 1;
    format!("{}-Q{} (live)", now.year(), quarter)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::market::models::{Candle, ChartRange, Quote};

    fn config() -> FundamentalsConfig {
        FundamentalsConfig {
            fallback_revenue: 97.0,
            fallback_shares: 3.19,
            fallback_as_of: "2024-Q4".to_string(),
            min_revenue: 50.0,
            max_revenue: 200.0,
            min_shares: 2.0,
            max_shares: 5.0,
            refresh_interval_seconds: 3600,
        }
    }

    struct StubSource(Option<ReportedFinancials>);

    #[async_trait]
    impl MarketDataSource for StubSource {
        async fn quote(&self) -> Result<Quote> {
            Err(anyhow!("not used"))
        }

        async fn candles(&self, _range: ChartRange) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn financials(&self) -> Result<ReportedFinancials> {
            self.0.ok_or_else(|| anyhow!("provider down"))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn august() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_starts_from_fallback() {
        let tracker = FundamentalsTracker::new(config());
        let current = tracker.current();
        assert_eq!(current.trailing_revenue, 97.0);
        assert_eq!(current.shares_outstanding, 3.19);
        assert_eq!(current.as_of, "2024-Q4");
        assert_eq!(current.freshness, Freshness::Cached);
    }

    #[test]
    fn test_accept_scales_and_rounds() {
        let tracker = FundamentalsTracker::new(config());
        let reported = ReportedFinancials {
            total_revenue: Some(97_690_123_456.0),
            shares_outstanding: Some(3_216_400_000.0),
        };
        let fresh = tracker.accept(&reported, august()).unwrap();
        assert_eq!(fresh.trailing_revenue, 97.69);
        assert_eq!(fresh.shares_outstanding, 3.22);
        assert_eq!(fresh.as_of, "2026-Q3 (live)");
        assert_eq!(fresh.freshness, Freshness::Live);
    }

    #[test]
    fn test_accept_rejects_implausible_values() {
        let tracker = FundamentalsTracker::new(config());
        let too_small = ReportedFinancials {
            total_revenue: Some(12e9),
            shares_outstanding: Some(3.2e9),
        };
        let bad_shares = ReportedFinancials {
            total_revenue: Some(97e9),
            shares_outstanding: Some(32e9),
        };
        let missing = ReportedFinancials {
            total_revenue: None,
            shares_outstanding: Some(3.2e9),
        };
        assert!(tracker.accept(&too_small, august()).is_none());
        assert!(tracker.accept(&bad_shares, august()).is_none());
        assert!(tracker.accept(&missing, august()).is_none());
    }

    #[test]
    fn test_quarter_label() {
        let jan = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let dec = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(quarter_label(jan), "2025-Q1 (live)");
        assert_eq!(quarter_label(dec), "2025-Q4 (live)");
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let mut tracker = FundamentalsTracker::new(config());
        let source = StubSource(Some(ReportedFinancials {
            total_revenue: Some(100e9),
            shares_outstanding: Some(3.2e9),
        }));
        let current = tracker.refresh(&source).await;
        assert_eq!(current.trailing_revenue, 100.0);
        assert_eq!(current.freshness, Freshness::Live);
        assert!(current.as_of.ends_with("(live)"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous() {
        let mut tracker = FundamentalsTracker::new(config());
        let current = tracker.refresh(&StubSource(None)).await.clone();
        assert_eq!(current.as_of, "2024-Q4");
        assert_eq!(current.freshness, Freshness::Cached);
        assert!(!tracker.is_due(Utc::now()));
    }

    #[test]
    fn test_is_due() {
        let tracker = FundamentalsTracker::new(config());
        assert!(tracker.is_due(august()));
    }
}
