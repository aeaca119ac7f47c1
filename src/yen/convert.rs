//! Yen conversions and display formatting.

use crate::trades::normalize::{canonical_pair, quote_currency};

/// Yen value of one pip on one lot (100,000 units).
///
/// JPY-quoted pairs are exact; the USD straights assume roughly 150 yen to
/// the dollar. Anything else falls back to the JPY figure.
pub fn pip_value(pair: &str) -> f64 {
    if quote_currency(pair).as_deref() == Some("JPY") {
        return 1000.0;
    }
    match canonical_pair(pair).as_str() {
        "EUR/USD" | "GBP/USD" | "AUD/USD" | "NZD/USD" | "USD/CHF" | "USD/CAD" => 1500.0,
        _ => 1000.0,
    }
}

/// Approximate yen amount for a pip move, rounded to whole yen.
pub fn convert_pips_to_yen(pips: f64, pair: &str, lot_size: f64) -> f64 {
    if !pips.is_finite() || !lot_size.is_finite() {
        return 0.0;
    }
    (pips * lot_size * pip_value(pair)).round()
}

/// `¥12,345`, or `+¥12,345` for positive values when `show_sign` is set.
/// Non-finite input renders as `¥0`.
pub fn format_yen(value: f64, show_sign: bool) -> String {
    if !value.is_finite() {
        return "¥0".to_string();
    }

    let rounded = value.round();
    let digits = format!("{}", rounded.abs() as i128);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if rounded < 0.0 {
        "-"
    } else if show_sign && rounded > 0.0 {
        "+"
    } else {
        ""
    };
    format!("{}¥{}", sign, grouped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_values() {
        assert_eq!(pip_value("USD/JPY"), 1000.0);
        assert_eq!(pip_value("gbpjpy"), 1000.0);
        assert_eq!(pip_value("EUR/USD"), 1500.0);
        assert_eq!(pip_value("EUR/GBP"), 1000.0);
    }

    #[test]
    fn test_convert_pips_to_yen() {
        assert_eq!(convert_pips_to_yen(80.0, "USD/JPY", 1.0), 80_000.0);
        assert_eq!(convert_pips_to_yen(-12.5, "EUR/USD", 0.5), -9_375.0);
        assert_eq!(convert_pips_to_yen(f64::NAN, "EUR/USD", 0.5), 0.0);
    }

    #[test]
    fn test_format_yen() {
        assert_eq!(format_yen(12345.0, true), "+¥12,345");
        assert_eq!(format_yen(12345.0, false), "¥12,345");
        assert_eq!(format_yen(-1_234_567.4, true), "-¥1,234,567");
        assert_eq!(format_yen(0.0, true), "¥0");
        assert_eq!(format_yen(999.0, false), "¥999");
        assert_eq!(format_yen(f64::NAN, true), "¥0");
    }
}
