//! Valuation engine: quote + fundamentals -> report.
//!
//! Holds only immutable configuration (tier table, reference multiple, gauge),
//! so a single instance can be shared across tasks behind an `Arc`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market::models::{Freshness, Fundamentals, Quote};
use crate::valuation::gauge::{GaugeConfig, GaugeSegment};
use crate::valuation::metrics::{
    boundary_markers, fair_value_gap, next_buy_zone, BoundaryMarker, BuyZone,
    DEFAULT_REFERENCE_MULTIPLE,
};
use crate::valuation::multiple::{compute_multiple, market_cap};
use crate::valuation::tier::{Signal, Tier, TierTable};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValuationError {
    #[error("invalid price: {0}")]
    InvalidPrice(f64),

    #[error("reference multiple must be positive and finite, got {0}")]
    InvalidReference(f64),

    #[error("invalid gauge range [{min}, {max}]")]
    InvalidGauge { min: f64, max: f64 },
}

/// Subscription level of the caller. Free users see the price but not the analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Free,
    Pro,
}

impl FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            other => Err(format!("Invalid access level: {other}")),
        }
    }
}

/// Presentation-facing subset of a tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierView {
    pub id: String,
    pub label: String,
    pub description: String,
    pub color: String,
    pub signal_color: String,
    pub signal: Signal,
}

impl From<&Tier> for TierView {
    fn from(tier: &Tier) -> Self {
        Self {
            id: tier.id.clone(),
            label: tier.label.clone(),
            description: tier.description.clone(),
            color: tier.color.clone(),
            signal_color: tier.signal_color().to_string(),
            signal: tier.signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationDetails {
    pub multiple: f64,
    /// Same unit as the share count (billions).
    pub market_cap: f64,
    pub tier: TierView,
    pub fair_value_gap_percent: f64,
    pub next_buy_zone: Option<BuyZone>,
    pub markers: Vec<BoundaryMarker>,
    pub gauge_angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Valuation {
    Available(ValuationDetails),
    /// Fundamentals missing or degenerate: the UI shows a loading state, not a tier.
    Unavailable,
    /// Hidden from a free-tier caller.
    Locked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationReport {
    pub price: f64,
    pub previous_close: f64,
    pub change_percent: f64,
    pub valuation: Valuation,
    pub fundamentals_as_of: Option<String>,
    pub fundamentals_freshness: Option<Freshness>,
    /// Quote came from the last stored snapshot, not a live fetch.
    pub stale: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl ValuationReport {
    pub fn details(&self) -> Option<&ValuationDetails> {
        match &self.valuation {
            Valuation::Available(details) => Some(details),
            Valuation::Unavailable | Valuation::Locked => None,
        }
    }

    pub fn tier(&self) -> Option<&TierView> {
        self.details().map(|d| &d.tier)
    }

    pub fn multiple(&self) -> Option<f64> {
        self.details().map(|d| d.multiple)
    }

    /// Copy of the report with analytics hidden for free users.
    pub fn redacted_for(&self, access: Access) -> Self {
        let mut report = self.clone();
        if access == Access::Free && matches!(report.valuation, Valuation::Available(_)) {
            report.valuation = Valuation::Locked;
        }
        report
    }
}

#[derive(Debug, Clone)]
pub struct ValuationEngine {
    table: TierTable,
    reference_multiple: f64,
    gauge: GaugeConfig,
}

impl ValuationEngine {
    pub fn new(
        table: TierTable,
        reference_multiple: f64,
        gauge: GaugeConfig,
    ) -> Result<Self, ValuationError> {
        if !reference_multiple.is_finite() || reference_multiple <= 0.0 {
            return Err(ValuationError::InvalidReference(reference_multiple));
        }
        if !gauge.is_valid() {
            return Err(ValuationError::InvalidGauge {
                min: gauge.min_multiple,
                max: gauge.max_multiple,
            });
        }
        Ok(Self {
            table,
            reference_multiple,
            gauge,
        })
    }

    /// Canonical table, 9.5x reference, default dial.
    pub fn reference() -> Self {
        Self {
            table: TierTable::reference(),
            reference_multiple: DEFAULT_REFERENCE_MULTIPLE,
            gauge: GaugeConfig::default(),
        }
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    pub fn reference_multiple(&self) -> f64 {
        self.reference_multiple
    }

    pub fn gauge(&self) -> &GaugeConfig {
        &self.gauge
    }

    pub fn classify(&self, multiple: f64) -> &Tier {
        self.table.resolve(multiple)
    }

    pub fn gauge_segments(&self) -> Vec<GaugeSegment> {
        self.gauge.segments(&self.table)
    }

    /// Run the full pipeline for one quote.
    ///
    /// Rejects negative or non-finite prices. Missing fundamentals yield
    /// `Valuation::Unavailable` rather than an error.
    pub fn evaluate(
        &self,
        quote: &Quote,
        fundamentals: Option<&Fundamentals>,
    ) -> Result<ValuationReport, ValuationError> {
        let price = quote.current_price;
        if !price.is_finite() || price < 0.0 {
            return Err(ValuationError::InvalidPrice(price));
        }

        let valuation = match (compute_multiple(price, fundamentals), fundamentals) {
            (Some(multiple), Some(f)) => Valuation::Available(ValuationDetails {
                multiple,
                market_cap: market_cap(price, f.shares_outstanding),
                tier: TierView::from(self.classify(multiple)),
                fair_value_gap_percent: fair_value_gap(multiple, self.reference_multiple),
                next_buy_zone: next_buy_zone(multiple, Some(f), &self.table),
                markers: boundary_markers(Some(f), &self.table),
                gauge_angle: self.gauge.needle_angle(multiple),
            }),
            _ => Valuation::Unavailable,
        };

        Ok(ValuationReport {
            price,
            previous_close: quote.previous_close,
            change_percent: quote.change_percent,
            valuation,
            fundamentals_as_of: fundamentals.map(|f| f.as_of.clone()),
            fundamentals_freshness: fundamentals.map(|f| f.freshness),
            stale: false,
            evaluated_at: Utc::now(),
        })
    }
}
