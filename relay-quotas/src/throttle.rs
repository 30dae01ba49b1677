use std::cmp::Ordering;

use crate::rate::Rate;

/// A [`Rate`] paired with the counter value observed for it at a point in
/// time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ThrottledRate {
    /// The quota being checked.
    pub rate: Rate,
    /// The counter-store value read for this rate's hit key.
    pub count: u64,
}

impl ThrottledRate {
    /// Pairs a rate with an observed count.
    pub fn new(rate: Rate, count: u64) -> Self {
        ThrottledRate { rate, count }
    }

    /// True once the observed count has reached the rate's limit.
    pub fn is_exceeded(&self) -> bool {
        self.count >= self.rate.value
    }
}

/// Orders by `rate.period` only. This is what lets the rate engine pick the
/// longest-period breach among a set of exceeded rates as the blocking one
/// via a plain `Iterator::max`.
impl PartialOrd for ThrottledRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ThrottledRate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rate.cmp(&other.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::Period;

    #[test]
    fn exceeded_when_count_reaches_value() {
        let tr = ThrottledRate::new(Rate::new(10, Period::Minute), 10);
        assert!(tr.is_exceeded());
        let tr = ThrottledRate::new(Rate::new(10, Period::Minute), 9);
        assert!(!tr.is_exceeded());
    }

    #[test]
    fn orders_by_period_not_count() {
        let short = ThrottledRate::new(Rate::new(1_000_000, Period::Second), 0);
        let long = ThrottledRate::new(Rate::new(1, Period::Day), 0);
        assert!(long > short);
    }

    #[test]
    fn total_order_on_period_seconds() {
        let mut rates = vec![
            ThrottledRate::new(Rate::new(1, Period::Day), 0),
            ThrottledRate::new(Rate::new(1, Period::Second), 0),
            ThrottledRate::new(Rate::new(1, Period::Hour), 0),
            ThrottledRate::new(Rate::new(1, Period::Minute), 0),
        ];
        rates.sort();
        let seconds: Vec<u64> = rates.iter().map(|tr| tr.rate.period_seconds()).collect();
        assert_eq!(seconds, vec![1, 60, 3_600, 86_400]);
    }
}
