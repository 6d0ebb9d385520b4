use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live quote snapshot for the tracked symbol.
///
/// The valuation core only reads `current_price`; the rest feeds the
/// daily-change alerts and the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub current_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub change: f64,
    pub change_percent: f64,
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// Build a quote from a price and the previous close, deriving the change fields.
    pub fn new(current_price: f64, previous_close: f64) -> Self {
        let change = current_price - previous_close;
        Self {
            current_price,
            open: current_price,
            high: current_price,
            low: current_price,
            previous_close,
            change,
            change_percent: change_percent(current_price, previous_close),
            fetched_at: Utc::now(),
        }
    }

    /// A flat quote with no intraday movement (offline evaluation).
    pub fn from_price(price: f64) -> Self {
        Self::new(price, price)
    }
}

/// Percentage change from `previous_close` to `price`; zero when there is no previous close.
pub fn change_percent(price: f64, previous_close: f64) -> f64 {
    if previous_close == 0.0 {
        return 0.0;
    }
    (price - previous_close) / previous_close * 100.0
}

/// Where a fundamentals snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Fetched from the data provider during this process lifetime.
    Live,
    /// Configured fallback or previously stored value.
    Cached,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Cached => write!(f, "cached"),
        }
    }
}

/// Trailing revenue and share count, both in the same magnitude (billions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub trailing_revenue: f64,
    pub shares_outstanding: f64,
    /// Quarter label such as `2024-Q4` or `2026-Q3 (live)`.
    pub as_of: String,
    pub freshness: Freshness,
}

impl Fundamentals {
    pub fn new(
        trailing_revenue: f64,
        shares_outstanding: f64,
        as_of: impl Into<String>,
        freshness: Freshness,
    ) -> Self {
        Self {
            trailing_revenue,
            shares_outstanding,
            as_of: as_of.into(),
            freshness,
        }
    }

    /// Both inputs are present, finite and non-zero.
    pub fn is_usable(&self) -> bool {
        self.trailing_revenue.is_finite()
            && self.shares_outstanding.is_finite()
            && self.trailing_revenue > 0.0
            && self.shares_outstanding > 0.0
    }
}

/// Company financials as reported by the provider, in raw units (dollars, shares).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportedFinancials {
    pub total_revenue: Option<f64>,
    pub shares_outstanding: Option<f64>,
}

/// One OHLC bar for the price chart. `time` is a Unix timestamp in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Chart ranges offered to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartRange {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "5Y")]
    FiveYears,
}

impl ChartRange {
    pub const ALL: [ChartRange; 4] = [
        ChartRange::OneDay,
        ChartRange::OneMonth,
        ChartRange::OneYear,
        ChartRange::FiveYears,
    ];

    /// Provider `range` query parameter.
    pub fn range(&self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::OneMonth => "1mo",
            Self::OneYear => "1y",
            Self::FiveYears => "5y",
        }
    }

    /// Provider `interval` query parameter.
    pub fn interval(&self) -> &'static str {
        match self {
            Self::OneDay => "5m",
            Self::OneMonth | Self::OneYear | Self::FiveYears => "1d",
        }
    }

    pub fn is_intraday(&self) -> bool {
        matches!(self, Self::OneDay)
    }
}

impl std::fmt::Display for ChartRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneDay => write!(f, "1D"),
            Self::OneMonth => write!(f, "1M"),
            Self::OneYear => write!(f, "1Y"),
            Self::FiveYears => write!(f, "5Y"),
        }
    }
}

impl FromStr for ChartRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "1D" => Ok(Self::OneDay),
            "1M" => Ok(Self::OneMonth),
            "1Y" => Ok(Self::OneYear),
            "5Y" => Ok(Self::FiveYears),
            other => Err(format!("Invalid range: {other}. Use 1D, 1M, 1Y or 5Y")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_derives_change() {
        let quote = Quote::new(110.0, 100.0);
        assert!((quote.change - 10.0).abs() < 1e-9);
        assert!((quote.change_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_change_percent_without_previous_close() {
        assert_eq!(change_percent(250.0, 0.0), 0.0);
    }

    #[test]
    fn test_fundamentals_usable() {
        assert!(Fundamentals::new(97.0, 3.19, "2024-Q4", Freshness::Cached).is_usable());
        assert!(!Fundamentals::new(0.0, 3.19, "2024-Q4", Freshness::Cached).is_usable());
        assert!(!Fundamentals::new(97.0, 0.0, "2024-Q4", Freshness::Cached).is_usable());
        assert!(!Fundamentals::new(f64::NAN, 3.19, "2024-Q4", Freshness::Cached).is_usable());
    }

    #[test]
    fn test_chart_range_parameters() {
        assert_eq!(ChartRange::OneDay.range(), "1d");
        assert_eq!(ChartRange::OneDay.interval(), "5m");
        assert_eq!(ChartRange::FiveYears.range(), "5y");
        assert_eq!(ChartRange::FiveYears.interval(), "1d");
        assert!(ChartRange::OneDay.is_intraday());
        assert!(!ChartRange::OneMonth.is_intraday());
    }

    #[test]
    fn test_chart_range_parse() {
        assert_eq!("1y".parse::<ChartRange>().unwrap(), ChartRange::OneYear);
        assert_eq!("5Y".parse::<ChartRange>().unwrap(), ChartRange::FiveYears);
        assert!("3W".parse::<ChartRange>().is_err());
    }
}
