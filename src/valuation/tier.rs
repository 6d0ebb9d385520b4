//! Valuation tier table and resolver.
//!
//! A tier is a half-open range `[min_multiple, max_multiple)` of price-to-sales
//! multiples with a display label and an action signal. The table is loaded
//! once, validated, and never mutated.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recommended action attached to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
    Wait,
    Sell,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "STRONG BUY"),
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Wait => write!(f, "WAIT"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Inclusive lower bound.
    pub min_multiple: f64,
    /// Exclusive upper bound. Omitted in config means unbounded.
    #[serde(default = "unbounded", skip_serializing_if = "is_unbounded")]
    pub max_multiple: f64,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_color: Option<String>,
    pub signal: Signal,
}

fn unbounded() -> f64 {
    f64::INFINITY
}

fn is_unbounded(value: &f64) -> bool {
    *value == f64::INFINITY
}

impl Tier {
    /// Whether `multiple` falls inside `[min_multiple, max_multiple)`.
    pub fn contains(&self, multiple: f64) -> bool {
        multiple >= self.min_multiple && multiple < self.max_multiple
    }

    /// Color used for the action text; falls back to the tier color.
    pub fn signal_color(&self) -> &str {
        self.signal_color.as_deref().unwrap_or(&self.color)
    }
}

/// Configuration defects caught when a tier table is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TierTableError {
    #[error("tier table is empty")]
    Empty,

    #[error("duplicate tier id: {0}")]
    DuplicateId(String),

    #[error("tier {id} has an invalid bound (min {min}, max {max})")]
    InvalidBound { id: String, min: f64, max: f64 },

    #[error("tier {id} has an empty range [{min}, {max})")]
    EmptyRange { id: String, min: f64, max: f64 },

    #[error("first tier {id} must start at 0, starts at {min}")]
    FirstNotZero { id: String, min: f64 },

    #[error("last tier {id} must be unbounded, ends at {max}")]
    LastBounded { id: String, max: f64 },

    #[error("gap between {lower} (ends at {end}) and {upper} (starts at {start})")]
    Gap {
        lower: String,
        upper: String,
        end: f64,
        start: f64,
    },

    #[error("overlap between {lower} (ends at {end}) and {upper} (starts at {start})")]
    Overlap {
        lower: String,
        upper: String,
        end: f64,
        start: f64,
    },
}

/// Return the first tier containing `multiple`, scanning in order.
///
/// A value no tier contains (NaN, or a malformed slice) resolves to the last
/// tier. Returns `None` only for an empty slice.
pub fn resolve_tier(multiple: f64, tiers: &[Tier]) -> Option<&Tier> {
    tiers
        .iter()
        .find(|tier| tier.contains(multiple))
        .or_else(|| tiers.last())
}

/// Ordered tier table whose ranges partition `[0, +inf)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tier>", into = "Vec<Tier>")]
pub struct TierTable {
    tiers: Vec<Tier>,
}

impl TierTable {
    /// Validate the partition invariant and build the table.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, TierTableError> {
        let first = tiers.first().ok_or(TierTableError::Empty)?;
        if first.min_multiple != 0.0 {
            return Err(TierTableError::FirstNotZero {
                id: first.id.clone(),
                min: first.min_multiple,
            });
        }

        let mut seen = HashSet::new();
        for tier in &tiers {
            if !seen.insert(tier.id.as_str()) {
                return Err(TierTableError::DuplicateId(tier.id.clone()));
            }
            if !tier.min_multiple.is_finite()
                || tier.min_multiple < 0.0
                || tier.max_multiple.is_nan()
            {
                return Err(TierTableError::InvalidBound {
                    id: tier.id.clone(),
                    min: tier.min_multiple,
                    max: tier.max_multiple,
                });
            }
            if tier.max_multiple <= tier.min_multiple {
                return Err(TierTableError::EmptyRange {
                    id: tier.id.clone(),
                    min: tier.min_multiple,
                    max: tier.max_multiple,
                });
            }
        }

        for pair in tiers.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if upper.min_multiple > lower.max_multiple {
                return Err(TierTableError::Gap {
                    lower: lower.id.clone(),
                    upper: upper.id.clone(),
                    end: lower.max_multiple,
                    start: upper.min_multiple,
                });
            }
            if upper.min_multiple < lower.max_multiple {
                return Err(TierTableError::Overlap {
                    lower: lower.id.clone(),
                    upper: upper.id.clone(),
                    end: lower.max_multiple,
                    start: upper.min_multiple,
                });
            }
        }

        if let Some(last) = tiers.last() {
            if last.max_multiple != f64::INFINITY {
                return Err(TierTableError::LastBounded {
                    id: last.id.clone(),
                    max: last.max_multiple,
                });
            }
        }

        Ok(Self { tiers })
    }

    /// The canonical P/S table: bargain <5, cheap 5-7, fair 7-12, expensive 12-20, overpriced 20+.
    pub fn reference() -> Self {
        Self {
            tiers: vec![
                reference_tier("bargain", "BARGAIN BASEMENT", "Strong buy signal", 0.0, 5.0, "#00ff88", Signal::StrongBuy),
                reference_tier("cheap", "CHEAP", "Consider accumulating", 5.0, 7.0, "#00d4aa", Signal::Buy),
                reference_tier("fair", "FAIR PRICED", "Hold position", 7.0, 12.0, "#ffd000", Signal::Hold),
                reference_tier("expensive", "EXPENSIVE", "Caution advised", 12.0, 20.0, "#ff8c00", Signal::Wait),
                reference_tier("overpriced", "OVERPRICED", "Consider taking profits", 20.0, f64::INFINITY, "#ff4757", Signal::Sell),
            ],
        }
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Tier> {
        self.tiers.iter().find(|tier| tier.id == id)
    }

    /// Resolve a multiple to exactly one tier. Boundaries belong to the upper tier.
    pub fn resolve(&self, multiple: f64) -> &Tier {
        // Non-empty by construction.
        resolve_tier(multiple, &self.tiers).unwrap_or(&self.tiers[self.tiers.len() - 1])
    }

    /// Tiers with a finite, positive lower bound, in ascending order.
    pub fn bounded_below(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter().filter(|tier| tier.min_multiple > 0.0)
    }

    /// Boundary multiples (lower bounds above zero), ascending.
    pub fn boundaries(&self) -> Vec<f64> {
        self.bounded_below().map(|tier| tier.min_multiple).collect()
    }

    /// Smallest boundary above zero, if the table has more than one tier.
    pub fn lowest_boundary(&self) -> Option<f64> {
        self.bounded_below().map(|tier| tier.min_multiple).next()
    }
}

impl TryFrom<Vec<Tier>> for TierTable {
    type Error = TierTableError;

    fn try_from(tiers: Vec<Tier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<TierTable> for Vec<Tier> {
    fn from(table: TierTable) -> Self {
        table.tiers
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::reference()
    }
}

fn reference_tier(
    id: &str,
    label: &str,
    description: &str,
    min_multiple: f64,
    max_multiple: f64,
    color: &str,
    signal: Signal,
) -> Tier {
    Tier {
        id: id.to_string(),
        label: label.to_string(),
        description: description.to_string(),
        min_multiple,
        max_multiple,
        color: color.to_string(),
        signal_color: None,
        signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: &str, min: f64, max: f64) -> Tier {
        reference_tier(id, id, "", min, max, "#ffffff", Signal::Hold)
    }

    #[test]
    fn test_reference_table_is_valid() {
        let reference = TierTable::reference();
        let rebuilt = TierTable::new(reference.tiers().to_vec()).unwrap();
        assert_eq!(rebuilt, reference);
        assert_eq!(reference.len(), 5);
    }

    #[test]
    fn test_resolve_interior_values() {
        let table = TierTable::reference();
        assert_eq!(table.resolve(0.0).id, "bargain");
        assert_eq!(table.resolve(3.29).id, "bargain");
        assert_eq!(table.resolve(6.0).id, "cheap");
        assert_eq!(table.resolve(8.22).id, "fair");
        assert_eq!(table.resolve(15.0).id, "expensive");
        assert_eq!(table.resolve(23.0).id, "overpriced");
        assert_eq!(table.resolve(1e12).id, "overpriced");
    }

    #[test]
    fn test_boundary_belongs_to_upper_tier() {
        let table = TierTable::reference();
        assert_eq!(table.resolve(5.0).id, "cheap");
        assert_eq!(table.resolve(7.0).id, "fair");
        assert_eq!(table.resolve(12.0).id, "expensive");
        assert_eq!(table.resolve(20.0).id, "overpriced");
        assert_eq!(table.resolve(4.999_999).id, "bargain");
    }

    #[test]
    fn test_nan_falls_back_to_last_tier() {
        let table = TierTable::reference();
        assert_eq!(table.resolve(f64::NAN).id, "overpriced");
    }

    #[test]
    fn test_resolve_tier_on_malformed_slice_falls_back() {
        // 10..12 is missing: anything above 10 lands in the terminal tier.
        let tiers = vec![tier("low", 0.0, 5.0), tier("mid", 5.0, 10.0), tier("top", 12.0, 15.0)];
        assert_eq!(resolve_tier(11.0, &tiers).unwrap().id, "top");
        assert_eq!(resolve_tier(99.0, &tiers).unwrap().id, "top");
        assert!(resolve_tier(1.0, &[]).is_none());
    }

    #[test]
    fn test_rejects_empty_table() {
        assert_eq!(TierTable::new(vec![]), Err(TierTableError::Empty));
    }

    #[test]
    fn test_rejects_nonzero_start() {
        let err = TierTable::new(vec![tier("a", 1.0, f64::INFINITY)]).unwrap_err();
        assert!(matches!(err, TierTableError::FirstNotZero { .. }));
    }

    #[test]
    fn test_rejects_bounded_last_tier() {
        let err = TierTable::new(vec![tier("a", 0.0, 5.0), tier("b", 5.0, 50.0)]).unwrap_err();
        assert!(matches!(err, TierTableError::LastBounded { .. }));
    }

    #[test]
    fn test_rejects_gap() {
        // The historical 7 vs 8 mismatch for the fair tier.
        let err = TierTable::new(vec![
            tier("cheap", 0.0, 7.0),
            tier("fair", 8.0, f64::INFINITY),
        ])
        .unwrap_err();
        assert!(matches!(err, TierTableError::Gap { .. }));
    }

    #[test]
    fn test_rejects_overlap() {
        let err = TierTable::new(vec![
            tier("a", 0.0, 7.0),
            tier("b", 6.0, f64::INFINITY),
        ])
        .unwrap_err();
        assert!(matches!(err, TierTableError::Overlap { .. }));
    }

    #[test]
    fn test_rejects_duplicate_and_empty_range() {
        let dup = TierTable::new(vec![tier("a", 0.0, 5.0), tier("a", 5.0, f64::INFINITY)]);
        assert_eq!(dup, Err(TierTableError::DuplicateId("a".to_string())));

        let empty = TierTable::new(vec![tier("a", 0.0, 0.0), tier("b", 0.0, f64::INFINITY)]);
        assert!(matches!(empty, Err(TierTableError::EmptyRange { .. })));
    }

    #[test]
    fn test_boundaries_skip_zero_floor() {
        let table = TierTable::reference();
        assert_eq!(table.boundaries(), vec![5.0, 7.0, 12.0, 20.0]);
        assert_eq!(table.lowest_boundary(), Some(5.0));
    }

    #[test]
    fn test_signal_color_falls_back_to_color() {
        let mut t = tier("a", 0.0, 1.0);
        assert_eq!(t.signal_color(), "#ffffff");
        t.signal_color = Some("#123456".to_string());
        assert_eq!(t.signal_color(), "#123456");
    }

    #[test]
    fn test_deserialize_validates_and_defaults_max() {
        let json = r##"[
            {"id": "low", "label": "LOW", "min_multiple": 0, "max_multiple": 10, "color": "#0f0", "signal": "buy"},
            {"id": "high", "label": "HIGH", "min_multiple": 10, "color": "#f00", "signal": "sell"}
        ]"##;
        let table: TierTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.resolve(10.0).id, "high");
        assert!(table.tiers()[1].max_multiple.is_infinite());

        let broken = r##"[
            {"id": "low", "label": "LOW", "min_multiple": 0, "max_multiple": 10, "color": "#0f0", "signal": "buy"},
            {"id": "high", "label": "HIGH", "min_multiple": 11, "color": "#f00", "signal": "sell"}
        ]"##;
        assert!(serde_json::from_str::<TierTable>(broken).is_err());
    }

    #[test]
    fn test_signal_serde_names() {
        assert_eq!(serde_json::to_string(&Signal::StrongBuy).unwrap(), "\"strong-buy\"");
        assert_eq!(Signal::StrongBuy.to_string(), "STRONG BUY");
    }
}
