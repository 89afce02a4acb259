//! Currency and amount-range parsing from free text.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d,\.]+").expect("valid regex"));

/// Parsed amount range with its detected currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAmount {
    pub min: Decimal,
    pub max: Decimal,
    pub currency: String,
}

/// Extract min/max amounts and a currency from text.
///
/// Currency is detected by symbol, word or ISO code, falling back to
/// `default_currency` (or USD). "up to" / "hasta" / "maximum" mark a
/// max-only amount; "minimum" / "at least" a min-only one; otherwise the
/// smallest and largest literals become the range. Returns `None` when no
/// numeric literal parses.
pub fn parse_amount_robust(text: &str, default_currency: &str) -> Option<ParsedAmount> {
    let text_lower = text.to_lowercase();

    let mut currency = if default_currency.is_empty() {
        "USD".to_string()
    } else {
        default_currency.to_string()
    };

    if text_lower.contains('£') || text_lower.contains("gbp") || text_lower.contains("pound") {
        currency = "GBP".to_string();
    } else if text_lower.contains('€') || text_lower.contains("eur") {
        currency = "EUR".to_string();
    } else if text_lower.contains('$') || text_lower.contains("usd") || text_lower.contains("dollar")
    {
        currency = "USD".to_string();
    } else if text_lower.contains("peso") || text_lower.contains("mxn") {
        currency = "MXN".to_string();
    } else if text_lower.contains("sol") || text_lower.contains("pen") {
        currency = "PEN".to_string();
    }

    let mut amounts: Vec<Decimal> = Vec::new();
    for m in NUMBER.find_iter(text) {
        if let Some(v) = parse_numeric_literal(m.as_str()) {
            if v > Decimal::ZERO {
                amounts.push(v);
            }
        }
    }

    if amounts.is_empty() {
        return None;
    }

    if amounts.len() == 1 {
        let v = amounts[0];
        if text_lower.contains("up to") || text_lower.contains("hasta") || text_lower.contains("maximum")
        {
            return Some(ParsedAmount { min: Decimal::ZERO, max: v, currency });
        }
        if text_lower.contains("minimum") || text_lower.contains("at least") {
            return Some(ParsedAmount { min: v, max: Decimal::ZERO, currency });
        }
        return Some(ParsedAmount { min: Decimal::ZERO, max: v, currency });
    }

    let mut min = amounts[0];
    let mut max = amounts[0];
    for &a in &amounts {
        if a < min {
            min = a;
        }
        if a > max {
            max = a;
        }
    }

    Some(ParsedAmount { min, max, currency })
}

/// Parse a numeric literal with comma or dot thousand separators, with
/// optional two-decimal cents.
fn parse_numeric_literal(raw: &str) -> Option<Decimal> {
    // Comma as thousands separator: 1,000,000 or 1,000.50
    let comma_stripped = raw.replace(',', "");
    if let Ok(v) = comma_stripped.parse::<Decimal>() {
        return Some(v);
    }

    // European format: dot as thousands separator (1.000.000)
    let dot_stripped = raw.replace('.', "");
    dot_stripped.parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn detects_currency_by_symbol() {
        let parsed = parse_amount_robust("Grants of up to £50,000", "USD").unwrap();
        assert_eq!(parsed.currency, "GBP");
        assert_eq!(parsed.max, dec!(50000));
        assert_eq!(parsed.min, Decimal::ZERO);
    }

    #[test]
    fn up_to_and_hasta_mark_max_only() {
        let parsed = parse_amount_robust("hasta S/ 120,000 soles", "USD").unwrap();
        assert_eq!(parsed.currency, "PEN");
        assert_eq!(parsed.max, dec!(120000));
        assert_eq!(parsed.min, Decimal::ZERO);
    }

    #[test]
    fn minimum_marks_min_only() {
        let parsed = parse_amount_robust("minimum award of $25,000", "").unwrap();
        assert_eq!(parsed.min, dec!(25000));
        assert_eq!(parsed.max, Decimal::ZERO);
        assert_eq!(parsed.currency, "USD");
    }

    #[test]
    fn two_amounts_become_a_range() {
        let parsed = parse_amount_robust("between €500.000 and €2.000.000", "USD").unwrap();
        assert_eq!(parsed.currency, "EUR");
        assert_eq!(parsed.min, dec!(500000));
        assert_eq!(parsed.max, dec!(2000000));
    }

    #[test]
    fn range_with_cents() {
        let parsed = parse_amount_robust("$1,000.50 - $9,999.99", "USD").unwrap();
        assert_eq!(parsed.min, dec!(1000.50));
        assert_eq!(parsed.max, dec!(9999.99));
    }

    #[test]
    fn single_bare_amount_defaults_to_max() {
        let parsed = parse_amount_robust("награда 100000", "EUR").unwrap();
        assert_eq!(parsed.max, dec!(100000));
        assert_eq!(parsed.currency, "EUR");
    }

    #[test]
    fn no_numbers_yields_none() {
        assert!(parse_amount_robust("funding amounts vary", "USD").is_none());
    }
}
