//! The poll cycle: quote -> fundamentals -> valuation -> snapshot -> alerts.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::db::store::{AlertRecord, SnapshotRecord, Store};
use crate::market::fundamentals::FundamentalsTracker;
use crate::market::models::Quote;
use crate::market::MarketDataSource;
use crate::monitoring::alerts::{AlertClient, Delivery};
use crate::monitoring::health::HealthState;
use crate::monitoring::rules::{evaluate_alerts, AlertRules, AlertState};
use crate::valuation::engine::{ValuationEngine, ValuationReport};

/// Most recent report, shared with the dashboard.
pub type LatestReport = Arc<RwLock<Option<ValuationReport>>>;

pub struct Tracker {
    symbol: String,
    engine: Arc<ValuationEngine>,
    source: Arc<dyn MarketDataSource>,
    fundamentals: FundamentalsTracker,
    store: Store,
    alerts: AlertClient,
    rules: Option<AlertRules>,
    health: HealthState,
    latest: LatestReport,
    cycle_number: u64,
}

impl Tracker {
    /// `rules` of `None` disables alert evaluation entirely.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        engine: Arc<ValuationEngine>,
        source: Arc<dyn MarketDataSource>,
        fundamentals: FundamentalsTracker,
        store: Store,
        alerts: AlertClient,
        rules: Option<AlertRules>,
        health: HealthState,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            engine,
            source,
            fundamentals,
            store,
            alerts,
            rules,
            health,
            latest: Arc::new(RwLock::new(None)),
            cycle_number: 0,
        }
    }

    pub fn latest(&self) -> LatestReport {
        self.latest.clone()
    }

    pub fn cycle_number(&self) -> u64 {
        self.cycle_number
    }

    /// Run one cycle. Failures are recorded in the health state and returned.
    #[instrument(skip(self), fields(symbol = %self.symbol, cycle = self.cycle_number + 1))]
    pub async fn run_cycle(&mut self) -> Result<ValuationReport> {
        self.cycle_number += 1;

        match self.try_cycle().await {
            Ok(report) => {
                self.health.record_cycle(self.cycle_number, &report).await;
                *self.latest.write().await = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                self.health.record_failure(self.cycle_number, &e).await;
                Err(e)
            }
        }
    }

    async fn try_cycle(&mut self) -> Result<ValuationReport> {
        let now = Utc::now();
        if self.fundamentals.is_due(now) {
            self.fundamentals.refresh(self.source.as_ref()).await;
        }

        let (quote, stale) = self.current_quote().await?;

        let mut report = self
            .engine
            .evaluate(&quote, Some(self.fundamentals.current()))
            .context("Valuation failed")?;
        report.stale = stale;

        info!(
            price = report.price,
            change_pct = report.change_percent,
            multiple = report.multiple(),
            tier = report.tier().map(|t| t.id.as_str()),
            stale,
            "Valuation updated"
        );

        if !stale {
            if let Err(e) = self.store.insert_snapshot(&self.snapshot_record(&report)).await {
                warn!(error = %e, "Failed to persist snapshot");
            }
        }

        if let Err(e) = self.process_alerts(&report, now).await {
            warn!(error = %e, "Alert processing failed");
        }

        Ok(report)
    }

    /// Live quote, or the last stored snapshot marked stale.
    async fn current_quote(&self) -> Result<(Quote, bool)> {
        let error = match self.source.quote().await {
            Ok(quote) => return Ok((quote, false)),
            Err(e) => e,
        };

        warn!(error = %error, source = self.source.name(), "Live quote unavailable, trying stored snapshot");

        let snapshot = self
            .store
            .latest_snapshot(&self.symbol)
            .await?
            .ok_or_else(|| error.context("No live quote and no stored snapshot"))?;

        let mut quote = Quote::new(snapshot.price, snapshot.previous_close);
        if let Some(at) = snapshot
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            quote.fetched_at = at.with_timezone(&Utc);
        }
        Ok((quote, true))
    }

    async fn process_alerts(&self, report: &ValuationReport, now: DateTime<Utc>) -> Result<()> {
        let Some(rules) = &self.rules else {
            return Ok(());
        };

        let record = self.store.load_alert_state(&self.symbol).await?;
        let previous = AlertState::from_record(&record);
        let (events, mut next) = evaluate_alerts(rules, report, &previous, self.engine.table(), now);

        for event in &events {
            if self.alerts.deliver(event).await? == Delivery::Failed {
                warn!(kind = event.kind(), "Alert not delivered, will retry next cycle");
                next.keep_pending(event, &previous);
                continue;
            }
            self.store
                .insert_alert(&AlertRecord {
                    id: None,
                    symbol: self.symbol.clone(),
                    alert_type: event.kind().to_string(),
                    message: event.message(&self.symbol),
                    price: event.price(),
                    created_at: None,
                })
                .await?;
        }

        if next != previous {
            self.store.save_alert_state(&next.to_record(&self.symbol)).await?;
        }
        Ok(())
    }

    fn snapshot_record(&self, report: &ValuationReport) -> SnapshotRecord {
        let fundamentals = self.fundamentals.current();
        SnapshotRecord {
            id: None,
            symbol: self.symbol.clone(),
            price: report.price,
            previous_close: report.previous_close,
            multiple: report.multiple(),
            tier_id: report.tier().map(|t| t.id.clone()),
            trailing_revenue: Some(fundamentals.trailing_revenue),
            shares_outstanding: Some(fundamentals.shares_outstanding),
            fundamentals_as_of: Some(fundamentals.as_of.clone()),
            created_at: None,
        }
    }
}
