//! Alert rules evaluated against each fresh valuation report.
//!
//! Evaluation is pure: it takes the previous alert state and returns the
//! events to deliver together with the state to persist.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::config::AlertsConfig;
use crate::db::store::AlertStateRecord;
use crate::valuation::engine::ValuationReport;
use crate::valuation::tier::TierTable;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRules {
    pub price_threshold_high: Option<f64>,
    pub price_threshold_low: Option<f64>,
    pub valuation_alerts: bool,
    pub large_movement_alerts: bool,
    pub large_movement_threshold_pct: f64,
    pub daily_digest: bool,
    pub daily_digest_hour: u32,
}

impl From<&AlertsConfig> for AlertRules {
    fn from(config: &AlertsConfig) -> Self {
        Self {
            price_threshold_high: config.price_threshold_high,
            price_threshold_low: config.price_threshold_low,
            valuation_alerts: config.valuation_alerts,
            large_movement_alerts: config.large_movement_alerts,
            large_movement_threshold_pct: config.large_movement_threshold_pct,
            daily_digest: config.daily_digest,
            daily_digest_hour: config.daily_digest_hour,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    PriceHigh {
        price: f64,
        threshold: f64,
    },
    PriceLow {
        price: f64,
        threshold: f64,
    },
    ValuationChange {
        price: f64,
        multiple: f64,
        from: String,
        to: String,
    },
    LargeMovement {
        price: f64,
        previous_close: f64,
        change_percent: f64,
    },
    DailyDigest {
        price: f64,
        change: f64,
        change_percent: f64,
        tier: Option<String>,
        multiple: Option<f64>,
    },
}

impl AlertEvent {
    /// Stable identifier stored in the alert history.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PriceHigh { .. } => "price_high",
            Self::PriceLow { .. } => "price_low",
            Self::ValuationChange { .. } => "valuation_change",
            Self::LargeMovement { .. } => "large_movement",
            Self::DailyDigest { .. } => "daily_digest",
        }
    }

    pub fn price(&self) -> f64 {
        match self {
            Self::PriceHigh { price, .. }
            | Self::PriceLow { price, .. }
            | Self::ValuationChange { price, .. }
            | Self::LargeMovement { price, .. }
            | Self::DailyDigest { price, .. } => *price,
        }
    }

    /// Plain-text message for the history log and the webhook.
    pub fn message(&self, symbol: &str) -> String {
        match self {
            Self::PriceHigh { price, threshold } => {
                format!("{symbol} crossed above ${threshold:.2}, now ${price:.2}")
            }
            Self::PriceLow { price, threshold } => {
                format!("{symbol} crossed below ${threshold:.2}, now ${price:.2}")
            }
            Self::ValuationChange {
                price,
                multiple,
                from,
                to,
            } => format!(
                "{symbol} valuation changed from {from} to {to} (P/S {multiple:.1}x, ${price:.2})"
            ),
            Self::LargeMovement {
                price,
                previous_close,
                change_percent,
            } => {
                let direction = if *change_percent > 0.0 { "UP" } else { "DOWN" };
                format!(
                    "{symbol} large movement: {direction} {:.2}% to ${price:.2} (previous close ${previous_close:.2})",
                    change_percent.abs()
                )
            }
            Self::DailyDigest {
                price,
                change,
                change_percent,
                tier,
                multiple,
            } => {
                let sign = if *change >= 0.0 { "+" } else { "" };
                let valuation = match (tier, multiple) {
                    (Some(tier), Some(multiple)) => format!("{tier}, P/S {multiple:.1}x"),
                    _ => "valuation unavailable".to_string(),
                };
                format!(
                    "{symbol} daily digest: ${price:.2} ({sign}{change:.2}, {sign}{change_percent:.2}%), {valuation}"
                )
            }
        }
    }
}

/// What the rules remember between checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertState {
    pub last_tier_id: Option<String>,
    pub last_price: Option<f64>,
    pub last_large_movement: Option<NaiveDate>,
    pub last_digest: Option<NaiveDate>,
}

impl AlertState {
    pub fn from_record(record: &AlertStateRecord) -> Self {
        let date = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        };
        Self {
            last_tier_id: record.last_tier_id.clone(),
            last_price: record.last_price,
            last_large_movement: date(&record.last_large_movement_date),
            last_digest: date(&record.last_digest_date),
        }
    }

    pub fn to_record(&self, symbol: &str) -> AlertStateRecord {
        AlertStateRecord {
            symbol: symbol.to_string(),
            last_tier_id: self.last_tier_id.clone(),
            last_price: self.last_price,
            last_large_movement_date: self.last_large_movement.map(|d| d.to_string()),
            last_digest_date: self.last_digest.map(|d| d.to_string()),
        }
    }

    /// Restore from `previous` the part of the state that `event` advanced,
    /// so the same rule fires again on the next check.
    pub fn keep_pending(&mut self, event: &AlertEvent, previous: &AlertState) {
        match event {
            AlertEvent::PriceHigh { .. } | AlertEvent::PriceLow { .. } => {
                self.last_price = previous.last_price;
            }
            AlertEvent::ValuationChange { .. } => {
                self.last_tier_id = previous.last_tier_id.clone();
            }
            AlertEvent::LargeMovement { .. } => {
                self.last_large_movement = previous.last_large_movement;
            }
            AlertEvent::DailyDigest { .. } => self.last_digest = previous.last_digest,
        }
    }
}

/// Apply every rule to `report`.
///
/// Stale reports (served from the snapshot cache) never trigger alerts and
/// leave the state untouched. Price alerts fire when the threshold is crossed
/// relative to the last checked price, so a price that stays above a
/// threshold alerts once.
pub fn evaluate_alerts(
    rules: &AlertRules,
    report: &ValuationReport,
    previous: &AlertState,
    table: &TierTable,
    now: DateTime<Utc>,
) -> (Vec<AlertEvent>, AlertState) {
    if report.stale {
        return (Vec::new(), previous.clone());
    }

    let mut events = Vec::new();
    let mut next = previous.clone();
    let price = report.price;
    let today = now.date_naive();

    if let Some(threshold) = rules.price_threshold_high {
        let was_above = previous.last_price.is_some_and(|p| p >= threshold);
        if price >= threshold && !was_above {
            events.push(AlertEvent::PriceHigh { price, threshold });
        }
    }
    if let Some(threshold) = rules.price_threshold_low {
        let was_below = previous.last_price.is_some_and(|p| p <= threshold);
        if price <= threshold && !was_below {
            events.push(AlertEvent::PriceLow { price, threshold });
        }
    }

    if let Some(details) = report.details() {
        if rules.valuation_alerts {
            if let Some(last_id) = previous.last_tier_id.as_deref() {
                if last_id != details.tier.id {
                    let from = table
                        .get(last_id)
                        .map(|tier| tier.label.clone())
                        .unwrap_or_else(|| last_id.to_string());
                    events.push(AlertEvent::ValuationChange {
                        price,
                        multiple: details.multiple,
                        from,
                        to: details.tier.label.clone(),
                    });
                }
            }
        }
        next.last_tier_id = Some(details.tier.id.clone());
    }

    if rules.large_movement_alerts
        && report.change_percent.abs() >= rules.large_movement_threshold_pct
        && previous.last_large_movement != Some(today)
    {
        events.push(AlertEvent::LargeMovement {
            price,
            previous_close: report.previous_close,
            change_percent: report.change_percent,
        });
        next.last_large_movement = Some(today);
    }

    if rules.daily_digest
        && now.hour() >= rules.daily_digest_hour
        && previous.last_digest != Some(today)
    {
        events.push(AlertEvent::DailyDigest {
            price,
            change: price - report.previous_close,
            change_percent: report.change_percent,
            tier: report.tier().map(|tier| tier.label.clone()),
            multiple: report.multiple(),
        });
        next.last_digest = Some(today);
    }

    next.last_price = Some(price);
    (events, next)
}
