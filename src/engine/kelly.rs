//! Stake sizing for a consensus pick.
//!
//! Fractional Kelly on the success probability:
//!   f* = (b·p − q) / b
//! where `b` is the net payout per unit staked at the offered price, `p` the
//! success probability and `q = 1 − p`. The multiplier scales the full-Kelly
//! stake down and the ceiling caps what any single pick may suggest.

/// Convert American moneyline odds into the implied price in (0, 1).
///
/// `+150` pays 1.5 per unit (price 0.4), `-150` pays 1/1.5 (price 0.6).
/// Returns `None` for zero or values within (-100, 100), which are not valid
/// American odds.
pub fn moneyline_to_price(moneyline: i32) -> Option<f64> {
    let ml = moneyline as f64;
    if moneyline >= 100 {
        Some(100.0 / (ml + 100.0))
    } else if moneyline <= -100 {
        Some(-ml / (-ml + 100.0))
    } else {
        None
    }
}

/// Calculate the Kelly stake fraction.
///
/// Returns `0.0` when the expected value is non-positive or the price is
/// outside (0, 1).
pub fn kelly_stake(win_prob: f64, market_price: f64, multiplier: f64) -> f64 {
    if market_price <= 0.0 || market_price >= 1.0 {
        return 0.0;
    }

    let b = (1.0 / market_price) - 1.0;
    let p = win_prob.clamp(0.0, 1.0);
    let q = 1.0 - p;

    let f = (b * p - q) / b;
    if f <= 0.0 {
        return 0.0;
    }

    (f * multiplier.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Kelly stake with the per-pick safety ceiling applied.
pub fn capped_stake(win_prob: f64, market_price: f64, multiplier: f64, cap: f64) -> f64 {
    kelly_stake(win_prob, market_price, multiplier).min(cap.max(0.0))
}

/// Expected return per unit staked: `p / price − 1`.
pub fn expected_value(win_prob: f64, market_price: f64) -> f64 {
    if market_price <= 0.0 {
        return 0.0;
    }
    win_prob / market_price - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_moneyline_underdog() {
        assert_relative_eq!(moneyline_to_price(150).unwrap(), 0.4, epsilon = 1e-9);
        assert_relative_eq!(moneyline_to_price(100).unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_moneyline_favourite() {
        assert_relative_eq!(moneyline_to_price(-150).unwrap(), 0.6, epsilon = 1e-9);
        assert_relative_eq!(moneyline_to_price(-300).unwrap(), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn test_moneyline_invalid() {
        assert!(moneyline_to_price(0).is_none());
        assert!(moneyline_to_price(50).is_none());
        assert!(moneyline_to_price(-99).is_none());
    }

    #[test]
    fn test_kelly_no_edge() {
        assert_relative_eq!(kelly_stake(0.5, 0.5, 1.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_positive_edge() {
        // b = 1.0, p = 0.6, q = 0.4 → f = 0.2
        assert_relative_eq!(kelly_stake(0.6, 0.5, 1.0), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_fractional_multiplier() {
        assert_relative_eq!(kelly_stake(0.6, 0.5, 0.25), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_negative_edge() {
        assert_relative_eq!(kelly_stake(0.3, 0.5, 1.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_degenerate_price() {
        assert_relative_eq!(kelly_stake(0.5, 0.0, 1.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(kelly_stake(0.5, 1.0, 1.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_capped_stake_hits_ceiling() {
        // Full Kelly at p=0.9, price 0.5 is 0.8
        assert_relative_eq!(capped_stake(0.9, 0.5, 1.0, 0.25), 0.25, epsilon = 1e-9);
        assert_relative_eq!(capped_stake(0.6, 0.5, 1.0, 0.25), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_expected_value() {
        assert_relative_eq!(expected_value(0.6, 0.5), 0.2, epsilon = 1e-9);
        assert!(expected_value(0.3, 0.5) < 0.0);
        assert_relative_eq!(expected_value(0.5, 0.0), 0.0, epsilon = 1e-9);
    }
}
