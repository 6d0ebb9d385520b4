//! Live-data context handed to the assistant with every request.
//!
//! Built from a valuation report and the caller's access level. A free
//! caller's context never carries the tier, multiple or signal.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;

use crate::valuation::engine::{Access, ValuationReport};
use crate::valuation::tier::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Weekend,
    PreMarket,
    Open,
    AfterHours,
    Closed,
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weekend => write!(f, "Weekend, markets closed"),
            Self::PreMarket => write!(f, "Pre-market trading"),
            Self::Open => write!(f, "Market is open"),
            Self::AfterHours => write!(f, "After-hours trading"),
            Self::Closed => write!(f, "Markets closed"),
        }
    }
}

/// US equity session for a UTC instant: regular hours 14:30-21:00 UTC,
/// pre-market from 09:00, after-hours until midnight.
pub fn market_status(now: DateTime<Utc>) -> MarketStatus {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketStatus::Weekend;
    }
    let minutes = now.hour() * 60 + now.minute();
    match minutes {
        870..=1259 => MarketStatus::Open,
        540..=869 => MarketStatus::PreMarket,
        1260.. => MarketStatus::AfterHours,
        _ => MarketStatus::Closed,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantContext {
    pub symbol: String,
    pub access: Access,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub tier_label: Option<String>,
    pub signal: Option<Signal>,
    pub multiple: Option<f64>,
    pub stale: bool,
}

impl AssistantContext {
    /// Context before any quote has been seen.
    pub fn empty(symbol: impl Into<String>, access: Access) -> Self {
        Self {
            symbol: symbol.into(),
            access,
            price: None,
            change_percent: None,
            tier_label: None,
            signal: None,
            multiple: None,
            stale: false,
        }
    }

    pub fn from_report(symbol: impl Into<String>, report: &ValuationReport, access: Access) -> Self {
        let visible = report.redacted_for(access);
        let details = visible.details();
        Self {
            symbol: symbol.into(),
            access,
            price: Some(visible.price),
            change_percent: Some(visible.change_percent),
            tier_label: details.map(|d| d.tier.label.clone()),
            signal: details.map(|d| d.tier.signal),
            multiple: details.map(|d| d.multiple),
            stale: visible.stale,
        }
    }

    /// Markdown block prepended to the user's message.
    pub fn live_data_block(&self, now: DateTime<Utc>) -> String {
        let price = self
            .price
            .map(|p| format!("${p:.2}"))
            .unwrap_or_else(|| "N/A".to_string());
        let mut lines = vec![
            format!("## LIVE {} DATA (as of {})", self.symbol, now.to_rfc3339()),
            format!("- Current price: {price}"),
        ];
        if let Some(change) = self.change_percent {
            lines.push(format!("- Daily change: {change:+.2}%"));
        }
        match (&self.tier_label, self.multiple) {
            (Some(label), Some(multiple)) => {
                lines.push(format!("- Valuation tier: {label} (P/S {multiple:.1}x)"));
            }
            _ if self.access == Access::Free => {
                lines.push("- Valuation tier: hidden (free plan, do not speculate about it)".to_string());
            }
            _ => lines.push("- Valuation tier: N/A".to_string()),
        }
        if self.stale {
            lines.push("- Note: price is from the last stored snapshot, live data unavailable".to_string());
        }
        lines.push(format!("- Market status: {}", market_status(now)));
        lines.join("\n")
    }
}
