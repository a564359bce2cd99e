use std::fmt;

use chrono::{Datelike, Months, NaiveDate};

use crate::error::{Result, TallyError};

/// A calendar month, always anchored on its first day.
///
/// The only way to build one is through constructors that discard the day,
/// so month arithmetic never has to clamp a day-of-month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(NaiveDate);

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Period)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Period(date.with_day(1).unwrap_or(date))
    }

    /// Accepts `YYYY-MM`, `YYYY/MM` or `YYYY-MM-DD`.
    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::from_date(d));
        }
        let parts: Vec<&str> = s.split(['-', '/']).collect();
        if parts.len() == 2 {
            if let (Ok(y), Ok(m)) = (parts[0].parse::<i32>(), parts[1].parse::<u32>()) {
                if parts[0].len() == 4 {
                    if let Some(p) = Self::new(y, m) {
                        return Ok(p);
                    }
                }
            }
        }
        Err(TallyError::InvalidPeriod(raw.to_string()))
    }

    pub fn previous(&self) -> Self {
        Period(self.0.checked_sub_months(Months::new(1)).unwrap_or(self.0))
    }

    /// `YYYY-MM`, the prefix used to match stored timestamps.
    pub fn month_key(&self) -> String {
        self.0.format("%Y-%m").to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for Period {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepted_shapes() {
        let expected = Period::new(2025, 7).unwrap();
        assert_eq!(Period::parse("2025-07").unwrap(), expected);
        assert_eq!(Period::parse("2025/07").unwrap(), expected);
        assert_eq!(Period::parse("2025-07-19").unwrap(), expected);
        assert_eq!(Period::parse(" 2025-07 ").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Period::parse("July").is_err());
        assert!(Period::parse("2025-13").is_err());
        assert!(Period::parse("25-07").is_err());
        assert!(Period::parse("").is_err());
    }

    #[test]
    fn test_previous_crosses_year() {
        let jan = Period::new(2025, 1).unwrap();
        assert_eq!(jan.previous(), Period::new(2024, 12).unwrap());
    }

    #[test]
    fn test_previous_from_long_month_stays_on_day_one() {
        let march = Period::from_date(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(march.previous().to_string(), "2024-02-01");
    }

    #[test]
    fn test_display_and_month_key() {
        let p = Period::new(2025, 7).unwrap();
        assert_eq!(p.to_string(), "2025-07-01");
        assert_eq!(p.month_key(), "2025-07");
    }
}
