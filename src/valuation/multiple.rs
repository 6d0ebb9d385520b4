//! Price <-> price-to-sales multiple conversions.
//!
//! Both directions return `None` when the fundamentals are missing or
//! degenerate, so "multiple unknown" has a single representation.
//! Callers must pass revenue and share count in the same magnitude;
//! no unit conversion happens here.

use crate::market::models::Fundamentals;

/// Market capitalization in the unit of `shares_outstanding` (billions of dollars for TSLA).
pub fn market_cap(price: f64, shares_outstanding: f64) -> f64 {
    price * shares_outstanding
}

/// Price-to-sales multiple: `price * shares / trailing_revenue`.
///
/// ```
/// use tsla_valuation::market::models::{Freshness, Fundamentals};
/// use tsla_valuation::valuation::multiple::compute_multiple;
///
/// let f = Fundamentals::new(97.0, 3.19, "2024-Q4", Freshness::Cached);
/// let m = compute_multiple(100.0, Some(&f)).unwrap();
/// assert!((m - 3.2887).abs() < 1e-3);
/// assert_eq!(compute_multiple(100.0, None), None);
/// ```
pub fn compute_multiple(price: f64, fundamentals: Option<&Fundamentals>) -> Option<f64> {
    let f = fundamentals.filter(|f| f.is_usable())?;
    Some(market_cap(price, f.shares_outstanding) / f.trailing_revenue)
}

/// Share price implied by a target multiple: `multiple * trailing_revenue / shares`.
pub fn price_for_multiple(multiple: f64, fundamentals: Option<&Fundamentals>) -> Option<f64> {
    let f = fundamentals.filter(|f| f.is_usable())?;
    Some(multiple * f.trailing_revenue / f.shares_outstanding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::models::Freshness;

    fn tsla() -> Fundamentals {
        Fundamentals::new(97.0, 3.19, "2024-Q4", Freshness::Cached)
    }

    #[test]
    fn test_compute_multiple_reference_prices() {
        let f = tsla();
        let m100 = compute_multiple(100.0, Some(&f)).unwrap();
        let m250 = compute_multiple(250.0, Some(&f)).unwrap();
        let m700 = compute_multiple(700.0, Some(&f)).unwrap();
        assert!((m100 - 3.2887).abs() < 1e-3);
        assert!((m250 - 8.2216).abs() < 1e-3);
        assert!((m700 - 23.0206).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_fundamentals_are_unknown() {
        let zero_revenue = Fundamentals::new(0.0, 3.19, "x", Freshness::Cached);
        let zero_shares = Fundamentals::new(97.0, 0.0, "x", Freshness::Cached);
        assert_eq!(compute_multiple(250.0, None), None);
        assert_eq!(compute_multiple(250.0, Some(&zero_revenue)), None);
        assert_eq!(compute_multiple(250.0, Some(&zero_shares)), None);
        assert_eq!(price_for_multiple(10.0, None), None);
        assert_eq!(price_for_multiple(10.0, Some(&zero_revenue)), None);
        assert_eq!(price_for_multiple(10.0, Some(&zero_shares)), None);
    }

    #[test]
    fn test_zero_price_is_zero_multiple() {
        assert_eq!(compute_multiple(0.0, Some(&tsla())), Some(0.0));
    }

    #[test]
    fn test_price_for_multiple_inverts() {
        let f = tsla();
        let price = price_for_multiple(10.0, Some(&f)).unwrap();
        assert!((price - 304.0752).abs() < 1e-3);
        let back = compute_multiple(price, Some(&f)).unwrap();
        assert!((back - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_market_cap() {
        assert!((market_cap(250.0, 3.19) - 797.5).abs() < 1e-9);
    }
}
