/// Format an amount with thousands separators and two decimals: 1,234.56
pub fn money(val: f64) -> String {
    let negative = val < 0.0 && val.abs() >= 0.005;
    let cents = format!("{:.2}", val.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-{with_commas}.{dec_part}")
    } else {
        format!("{with_commas}.{dec_part}")
    }
}

/// Amount followed by its currency code: 1,234.56 EUR
pub fn money_in(val: f64, currency: &str) -> String {
    format!("{} {currency}", money(val))
}

/// A ratio as a percentage with one decimal: 0.1234 -> 12.3%
pub fn pct(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(1234.56), "1,234.56");
        assert_eq!(money(-500.00), "-500.00");
        assert_eq!(money(0.0), "0.00");
        assert_eq!(money(-0.001), "0.00");
        assert_eq!(money(1000000.99), "1,000,000.99");
        assert_eq!(money(42.10), "42.10");
    }

    #[test]
    fn test_money_in_and_pct() {
        assert_eq!(money_in(-12.3, "EUR"), "-12.30 EUR");
        assert_eq!(pct(0.9743), "97.4%");
        assert_eq!(pct(0.0), "0.0%");
    }
}
