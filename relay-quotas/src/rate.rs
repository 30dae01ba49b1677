use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The period a [`Rate`] is measured over.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// One second.
    Second,
    /// Sixty seconds.
    Minute,
    /// Sixty minutes.
    Hour,
    /// Twenty-four hours.
    Day,
}

impl Period {
    /// Length of the period in seconds.
    pub fn as_seconds(self) -> u64 {
        match self {
            Period::Second => 1,
            Period::Minute => 60,
            Period::Hour => 3_600,
            Period::Day => 86_400,
        }
    }

    /// The label used inside a hit key, e.g. `"minute"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Second => "second",
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_seconds().cmp(&other.as_seconds())
    }
}

/// A quota: at most `value` hits per `period`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// The number of hits allowed within `period`. Always `>= 1`.
    pub value: u64,
    /// The window the value is measured over.
    pub period: Period,
}

impl Rate {
    /// Creates a new rate. `value` is not validated here; the auth service
    /// is trusted input, same as the rest of the `AuthResponse`.
    pub fn new(value: u64, period: Period) -> Self {
        Rate { value, period }
    }

    /// Shorthand for `self.period.as_seconds()`.
    pub fn period_seconds(&self) -> u64 {
        self.period.as_seconds()
    }
}

/// Rates order by period length; a longer period is "greater", which is
/// what lets [`crate::ThrottledRate`] pick the longest-period blocking rate
/// as the tie-break winner.
impl PartialOrd for Rate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.period.cmp(&other.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periods_convert_to_seconds() {
        assert_eq!(Period::Second.as_seconds(), 1);
        assert_eq!(Period::Minute.as_seconds(), 60);
        assert_eq!(Period::Hour.as_seconds(), 3_600);
        assert_eq!(Period::Day.as_seconds(), 86_400);
    }

    #[test]
    fn longer_period_orders_greater() {
        let per_minute = Rate::new(10, Period::Minute);
        let per_hour = Rate::new(10, Period::Hour);
        assert!(per_hour > per_minute);
    }

    #[test]
    fn roundtrips_through_json() {
        let rate = Rate::new(400, Period::Minute);
        let json = serde_json::to_string(&rate).unwrap();
        assert_eq!(json, r#"{"value":400,"period":"minute"}"#);
        let back: Rate = serde_json::from_str(&json).unwrap();
        assert_eq!(rate, back);
    }
}
