//! Metrics derived from a multiple: fair-value gap, next buy zone and the
//! tier boundary markers drawn on the price chart.

use serde::Serialize;

use crate::market::models::Fundamentals;
use crate::valuation::multiple::price_for_multiple;
use crate::valuation::tier::TierTable;

/// Midpoint of the fair tier `[7, 12)`.
pub const DEFAULT_REFERENCE_MULTIPLE: f64 = 9.5;

/// Signed percentage distance of `multiple` from `reference_multiple`.
///
/// Positive means trading above fair value. `reference_multiple` must be
/// positive; the engine checks this when it is configured.
pub fn fair_value_gap(multiple: f64, reference_multiple: f64) -> f64 {
    (multiple - reference_multiple) / reference_multiple * 100.0
}

/// Price target at the nearest tier boundary below the current multiple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyZone {
    pub implied_price: f64,
    pub boundary_multiple: f64,
    pub tier_id: String,
    pub tier_label: String,
}

/// Find the nearest boundary strictly below `multiple` and price it.
///
/// Returns `None` when `multiple` is at or below the lowest boundary
/// (already in the lowest tier) or when fundamentals are unusable.
pub fn next_buy_zone(
    multiple: f64,
    fundamentals: Option<&Fundamentals>,
    table: &TierTable,
) -> Option<BuyZone> {
    let boundary = table
        .boundaries()
        .into_iter()
        .rev()
        .find(|&boundary| boundary < multiple)?;
    let implied_price = price_for_multiple(boundary, fundamentals)?;
    let tier = table.resolve(boundary);

    Some(BuyZone {
        implied_price,
        boundary_multiple: boundary,
        tier_id: tier.id.clone(),
        tier_label: tier.label.clone(),
    })
}

/// Horizontal price line marking where a tier starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryMarker {
    pub tier_id: String,
    pub label: String,
    pub multiple: f64,
    pub implied_price: f64,
    pub color: String,
}

/// One marker per tier with a lower bound above zero, ascending by price.
pub fn boundary_markers(fundamentals: Option<&Fundamentals>, table: &TierTable) -> Vec<BoundaryMarker> {
    table
        .bounded_below()
        .filter_map(|tier| {
            let implied_price = price_for_multiple(tier.min_multiple, fundamentals)?;
            (implied_price > 0.0).then(|| BoundaryMarker {
                tier_id: tier.id.clone(),
                label: tier.label.clone(),
                multiple: tier.min_multiple,
                implied_price,
                color: tier.color.clone(),
            })
        })
        .collect()
}
