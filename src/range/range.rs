use super::{Entire, PrefixOrd, Shift};
use std::fmt;

/// Closed interval between two bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range<T> {
    pub low: Entire<T>,
    pub high: Entire<T>,
}

impl<T: PrefixOrd + Eq + Clone> Range<T> {
    pub fn new(low: Entire<T>, high: Entire<T>) -> Self {
        Self { low, high }
    }

    pub fn full() -> Self {
        Self::new(Entire::NegativeInfinity, Entire::PositiveInfinity)
    }

    /// Every value starting with `prefix`.
    pub fn prefix(prefix: T) -> Self {
        Self::new(Entire::before(prefix.clone()), Entire::after(prefix))
    }

    pub fn is_full(&self) -> bool {
        self.low == Entire::NegativeInfinity && self.high == Entire::PositiveInfinity
    }

    /// No value can lie inside the range.
    pub fn is_empty(&self) -> bool {
        match self.low.cmp(&self.high) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => match &self.low {
                Entire::Value(_, Shift::None) => false,
                _ => true,
            },
            std::cmp::Ordering::Less => false,
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        let point = Entire::exact(value.clone());
        self.low <= point && point <= self.high
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let low = std::cmp::max(&self.low, &other.low).clone();
        let high = std::cmp::min(&self.high, &other.high).clone();
        let range = Self::new(low, high);
        (!range.is_empty()).then_some(range)
    }

    /// Whether the range is the set of values starting with one prefix.
    pub fn as_prefix(&self) -> Option<&T> {
        match (&self.low, &self.high) {
            (Entire::Value(low, Shift::Negative), Entire::Value(high, Shift::Positive))
                if low == high =>
            {
                Some(low)
            }
            _ => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Tuple, Value};

    fn t(v: i64) -> Tuple {
        Tuple::from_values([Value::Integer(v)])
    }

    #[test]
    fn test_empty_ranges() {
        assert!(Range::new(Entire::after(t(5)), Entire::before(t(5))).is_empty());
        assert!(Range::new(Entire::before(t(5)), Entire::before(t(5))).is_empty());
        assert!(!Range::new(Entire::exact(t(5)), Entire::exact(t(5))).is_empty());
        assert!(!Range::<Tuple>::full().is_empty());
    }

    #[test]
    fn test_intersect() {
        let a = Range::new(Entire::before(t(1)), Entire::after(t(10)));
        let b = Range::new(Entire::after(t(5)), Entire::PositiveInfinity);
        let both = a.intersect(&b).unwrap();
        assert!(both.contains(&t(6)));
        assert!(!both.contains(&t(5)));
        assert!(both.contains(&t(10)));
        let c = Range::new(Entire::after(t(20)), Entire::PositiveInfinity);
        assert!(a.intersect(&c).is_none());
    }
}
