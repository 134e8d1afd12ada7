//! Literal `low:high` intervals

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed integer interval `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub low: i64,
    pub high: i64,
}

impl Interval {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    /// Number of values covered, zero for an inverted interval
    pub fn width(&self) -> u64 {
        (self.high as i128 - self.low as i128 + 1).max(0) as u64
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

impl FromStr for Interval {
    type Err = Error;

    /// Parses `<int>:<int>`, each side optionally signed
    fn from_str(text: &str) -> Result<Self> {
        let (low, high) = text
            .split_once(':')
            .ok_or_else(|| Error::Parse(text.to_string()))?;
        let low = parse_bound(low).ok_or_else(|| Error::Parse(text.to_string()))?;
        let high = parse_bound(high).ok_or_else(|| Error::Parse(text.to_string()))?;
        Ok(Self { low, high })
    }
}

fn parse_bound(text: &str) -> Option<i64> {
    let digits = text.strip_prefix(&['+', '-'][..]).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parse `low:high` notation
pub fn parse_interval(text: &str) -> Result<Interval> {
    text.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() -> Result<()> {
        assert_eq!(parse_interval("50:99")?, Interval::new(50, 99));
        assert_eq!(parse_interval("-10:+9")?, Interval::new(-10, 9));
        assert_eq!(parse_interval("0:0")?, Interval::new(0, 0));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "abc", "", ":", "50:", ":99", "50-99", "50:99:1", " 50:99", "50:99 ", "5 0:99",
            "+:1", "0x10:20", "1.5:2",
        ] {
            assert!(
                matches!(parse_interval(text), Err(Error::Parse(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_interval("99999999999999999999:1").is_err());
    }

    #[test]
    fn test_display_matches_notation() {
        assert_eq!(Interval::new(100, 149).to_string(), "100:149");
        assert_eq!(Interval::new(-5, 4).to_string(), "-5:4");
    }

    #[test]
    fn test_width_and_overlap() {
        let a = Interval::new(50, 99);
        let b = Interval::new(100, 149);
        assert_eq!(a.width(), 50);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Interval::new(99, 100)));
        assert_eq!(Interval::new(5, 4).width(), 0);
    }
}
