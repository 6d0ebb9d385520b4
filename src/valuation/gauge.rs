//! Gauge geometry: multiples to dial angles.
//!
//! Angles are in degrees with 0 at the top and increasing clockwise, so the
//! default dial sweeps from 225 (lower left) through 360 (top) to 495 (lower right).

use serde::{Deserialize, Serialize};

use crate::valuation::tier::TierTable;

pub const DIAL_START_ANGLE: f64 = 225.0;
pub const DIAL_SWEEP_ANGLE: f64 = 270.0;
pub const SEGMENT_GAP_DEG: f64 = 2.2;

/// Linearly map `value` from `[domain_min, domain_max]` onto `[sweep_start, sweep_end]`.
///
/// Values outside the domain clamp to the sweep extremes. A degenerate domain
/// maps everything to `sweep_start`.
pub fn angle(value: f64, domain_min: f64, domain_max: f64, sweep_start: f64, sweep_end: f64) -> f64 {
    let span = domain_max - domain_min;
    if !(span > 0.0) || value.is_nan() {
        return sweep_start;
    }
    let clamped = value.clamp(domain_min, domain_max);
    let fraction = (clamped - domain_min) / span;
    sweep_start + fraction * (sweep_end - sweep_start)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeConfig {
    /// Visible multiple range of the dial.
    pub min_multiple: f64,
    pub max_multiple: f64,
    pub sweep_start: f64,
    pub sweep_end: f64,
    /// Angular gap left between adjacent tier segments.
    #[serde(default = "default_segment_gap")]
    pub segment_gap: f64,
}

fn default_segment_gap() -> f64 {
    SEGMENT_GAP_DEG
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self::dial(0.0, 25.0)
    }
}

/// Arc drawn for one tier on the dial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeSegment {
    pub tier_id: String,
    pub color: String,
    pub start_angle: f64,
    pub end_angle: f64,
}

impl GaugeConfig {
    /// 270 degree dial from 225 to 495.
    pub fn dial(min_multiple: f64, max_multiple: f64) -> Self {
        Self {
            min_multiple,
            max_multiple,
            sweep_start: DIAL_START_ANGLE,
            sweep_end: DIAL_START_ANGLE + DIAL_SWEEP_ANGLE,
            segment_gap: SEGMENT_GAP_DEG,
        }
    }

    /// Half-circle variant from 0 to 180.
    pub fn semicircle(min_multiple: f64, max_multiple: f64) -> Self {
        Self {
            min_multiple,
            max_multiple,
            sweep_start: 0.0,
            sweep_end: 180.0,
            segment_gap: SEGMENT_GAP_DEG,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_multiple.is_finite()
            && self.max_multiple.is_finite()
            && self.max_multiple > self.min_multiple
            && self.sweep_start.is_finite()
            && self.sweep_end.is_finite()
            && self.segment_gap >= 0.0
    }

    pub fn needle_angle(&self, multiple: f64) -> f64 {
        angle(
            multiple,
            self.min_multiple,
            self.max_multiple,
            self.sweep_start,
            self.sweep_end,
        )
    }

    /// Tier arcs clamped to the visible range, with gaps between neighbours.
    ///
    /// Tiers entirely outside the range, or narrower than the gap, are dropped.
    pub fn segments(&self, table: &TierTable) -> Vec<GaugeSegment> {
        if !self.is_valid() {
            return Vec::new();
        }
        let last = table.len().saturating_sub(1);
        table
            .tiers()
            .iter()
            .enumerate()
            .filter_map(|(index, tier)| {
                let start_value = tier.min_multiple.clamp(self.min_multiple, self.max_multiple);
                let end_value = tier.max_multiple.clamp(self.min_multiple, self.max_multiple);
                if end_value <= start_value {
                    return None;
                }

                let gap_left = if index > 0 { self.segment_gap / 2.0 } else { 0.0 };
                let gap_right = if index < last { self.segment_gap / 2.0 } else { 0.0 };
                let start_angle = self.needle_angle(start_value) + gap_left;
                let end_angle = self.needle_angle(end_value) - gap_right;
                if end_angle <= start_angle {
                    return None;
                }

                Some(GaugeSegment {
                    tier_id: tier.id.clone(),
                    color: tier.color.clone(),
                    start_angle,
                    end_angle,
                })
            })
            .collect()
    }
}
