//! Property tests for tier resolution and the price <-> multiple conversions,
//! swept over a dense grid rather than a handful of hand-picked points.

use tsla_valuation::market::models::{Freshness, Fundamentals};
use tsla_valuation::valuation::gauge::angle;
use tsla_valuation::valuation::metrics::{fair_value_gap, next_buy_zone, DEFAULT_REFERENCE_MULTIPLE};
use tsla_valuation::valuation::multiple::{compute_multiple, price_for_multiple};
use tsla_valuation::valuation::tier::TierTable;

fn tsla() -> Fundamentals {
    Fundamentals::new(97.0, 3.19, "2024-Q4", Freshness::Cached)
}

/// 0.00, 0.05, ... 40.00 plus a few large values.
fn multiples() -> impl Iterator<Item = f64> {
    (0..=800)
        .map(|i| i as f64 * 0.05)
        .chain([100.0, 1_000.0, 1e9])
}

#[test]
fn every_multiple_resolves_to_a_containing_tier() {
    let table = TierTable::reference();
    for m in multiples() {
        let matching = table.tiers().iter().filter(|t| t.contains(m)).count();
        assert_eq!(matching, 1, "multiple {m} matched {matching} tiers");
        assert!(table.resolve(m).contains(m), "multiple {m}");
    }
}

#[test]
fn boundaries_belong_to_the_upper_tier() {
    let table = TierTable::reference();
    let tiers = table.tiers();
    for pair in tiers.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        let b = upper.min_multiple;
        assert_eq!(table.resolve(b).id, upper.id);
        assert_eq!(table.resolve(b - 1e-9).id, lower.id);
    }
}

#[test]
fn price_round_trips_through_multiple() {
    let f = tsla();
    let table = TierTable::reference();
    for m in multiples().filter(|m| *m > 0.0 && *m < 1_000.0) {
        let price = price_for_multiple(m, Some(&f)).unwrap();
        let back = compute_multiple(price, Some(&f)).unwrap();
        assert!((back - m).abs() < 1e-9 * m.max(1.0), "{m} -> {price} -> {back}");

        let interior = !table.boundaries().iter().any(|b| (b - m).abs() < 1e-6);
        if interior {
            assert_eq!(table.resolve(back).id, table.resolve(m).id);
        }
    }
}

#[test]
fn conversions_are_strictly_increasing() {
    let f = tsla();
    let grid: Vec<f64> = multiples().collect();
    for pair in grid.windows(2) {
        let p0 = price_for_multiple(pair[0], Some(&f)).unwrap();
        let p1 = price_for_multiple(pair[1], Some(&f)).unwrap();
        assert!(p1 > p0);

        let m0 = compute_multiple(pair[0] * 10.0, Some(&f)).unwrap();
        let m1 = compute_multiple(pair[1] * 10.0, Some(&f)).unwrap();
        assert!(m1 > m0);
    }
}

#[test]
fn missing_fundamentals_yield_no_value() {
    let zero_revenue = Fundamentals::new(0.0, 3.19, "n/a", Freshness::Cached);
    let zero_shares = Fundamentals::new(97.0, 0.0, "n/a", Freshness::Cached);
    for value in [0.0, 1.0, 250.0, 10_000.0] {
        assert_eq!(compute_multiple(value, None), None);
        assert_eq!(price_for_multiple(value, None), None);
        assert_eq!(compute_multiple(value, Some(&zero_revenue)), None);
        assert_eq!(price_for_multiple(value, Some(&zero_shares)), None);
    }
}

#[test]
fn fair_value_gap_sign_follows_reference() {
    let reference = DEFAULT_REFERENCE_MULTIPLE;
    assert_eq!(fair_value_gap(reference, reference), 0.0);
    for m in multiples() {
        let gap = fair_value_gap(m, reference);
        assert_eq!(gap > 0.0, m > reference, "multiple {m}, gap {gap}");
    }
}

#[test]
fn no_buy_zone_at_or_below_lowest_boundary() {
    let f = tsla();
    let table = TierTable::reference();
    let lowest = table.lowest_boundary().unwrap();
    for m in multiples() {
        let zone = next_buy_zone(m, Some(&f), &table);
        if m <= lowest {
            assert!(zone.is_none(), "multiple {m}");
        } else {
            let zone = zone.unwrap();
            assert!(zone.boundary_multiple < m);
            assert_eq!(zone.tier_id, table.resolve(zone.boundary_multiple).id);
        }
    }
}

#[test]
fn gauge_angle_stays_on_the_sweep() {
    for m in multiples().chain([-5.0]) {
        let a = angle(m, 0.0, 25.0, 225.0, 495.0);
        assert!((225.0..=495.0).contains(&a), "multiple {m}, angle {a}");
    }
    assert_eq!(angle(12.5, 0.0, 25.0, 225.0, 495.0), 360.0);
}
