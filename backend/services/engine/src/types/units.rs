//! Conversions between whole-coin amounts and nanotons.

pub const UNITS_PER_COIN: u64 = 1_000_000_000;

/// Rounds a whole-coin amount to the nearest nanoton. Non-finite, negative
/// or out-of-range inputs yield `None`.
pub fn to_smallest_units(amount: f64) -> Option<u64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let units = (amount * UNITS_PER_COIN as f64).round();
    if units >= u64::MAX as f64 {
        return None;
    }
    Some(units as u64)
}

/// Whole-coin string with four decimals.
pub fn format_units(amount: u64) -> String {
    let coins = amount as f64 / UNITS_PER_COIN as f64;
    format!("{:.4}", (coins * 1e4).round() / 1e4)
}

pub fn format_percentage(percentage: f64) -> String {
    format!("{:.0}", percentage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_coins_to_nanotons() {
        assert_eq!(to_smallest_units(1.5), Some(1_500_000_000));
        assert_eq!(to_smallest_units(0.000000001), Some(1));
        assert_eq!(to_smallest_units(0.0), Some(0));
        assert_eq!(to_smallest_units(-1.0), None);
        assert_eq!(to_smallest_units(f64::NAN), None);
        assert_eq!(to_smallest_units(1e30), None);
    }

    #[test]
    fn formats_with_four_decimals() {
        assert_eq!(format_units(150_000_000_000), "150.0000");
        assert_eq!(format_units(1_234_567), "0.0012");
        assert_eq!(format_units(0), "0.0000");
    }

    #[test]
    fn percentages_have_no_decimals() {
        assert_eq!(format_percentage(66.666), "67");
        assert_eq!(format_percentage(33.333), "33");
        assert_eq!(format_percentage(0.0), "0");
    }
}
