use super::{Entire, PrefixOrd, Range, Shift};
use std::fmt;

/// Normalized union of ranges: sorted by low bound, non-empty, pairwise
/// disjoint and not touching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeSet<T> {
    ranges: Vec<Range<T>>,
}

impl<T: PrefixOrd + Eq + Clone> RangeSet<T> {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn full() -> Self {
        Self {
            ranges: vec![Range::full()],
        }
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = Range<T>>) -> Self {
        let mut ranges: Vec<Range<T>> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        ranges.sort_by(|a, b| a.low.cmp(&b.low));

        let mut merged: Vec<Range<T>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.low <= last.high => {
                    if range.high > last.high {
                        last.high = range.high;
                    }
                }
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[Range<T>] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        matches!(self.ranges.as_slice(), [range] if range.is_full())
    }

    pub fn contains(&self, value: &T) -> bool {
        self.ranges.iter().any(|r| r.contains(value))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::from_ranges(self.ranges.iter().chain(other.ranges.iter()).cloned())
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut result = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(range) = a.intersect(b) {
                    result.push(range);
                }
            }
        }
        Self::from_ranges(result)
    }

    /// Complement over the whole domain.
    pub fn invert(&self) -> Self {
        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        let mut low = Some(Entire::NegativeInfinity);
        for range in &self.ranges {
            if let Some(gap_low) = low.take()
                && let Some(gap_high) = complement_high(&range.low)
            {
                result.push(Range::new(gap_low, gap_high));
            }
            low = complement_low(&range.high);
        }
        if let Some(gap_low) = low {
            result.push(Range::new(gap_low, Entire::PositiveInfinity));
        }
        Self::from_ranges(result)
    }

    /// The ranges as value prefixes when every range is a prefix range.
    pub fn as_prefixes(&self) -> Option<Vec<&T>> {
        self.ranges.iter().map(Range::as_prefix).collect()
    }
}

/// High bound of the gap that ends where a range starting at `low` begins.
fn complement_high<T: Clone>(low: &Entire<T>) -> Option<Entire<T>> {
    match low {
        Entire::NegativeInfinity => None,
        Entire::Value(value, Shift::None) => Some(Entire::before(value.clone())),
        other => Some(other.clone()),
    }
}

/// Low bound of the gap that starts where a range ending at `high` ends.
fn complement_low<T: Clone>(high: &Entire<T>) -> Option<Entire<T>> {
    match high {
        Entire::PositiveInfinity => None,
        Entire::Value(value, Shift::None) => Some(Entire::after(value.clone())),
        other => Some(other.clone()),
    }
}

impl<T: fmt::Display> fmt::Display for RangeSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", range)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Tuple, Value};

    fn t(v: i64) -> Tuple {
        Tuple::from_values([Value::Integer(v)])
    }

    fn between(low: i64, high: i64) -> Range<Tuple> {
        Range::new(Entire::before(t(low)), Entire::after(t(high)))
    }

    #[test]
    fn test_normalization_merges_overlaps() {
        let set = RangeSet::from_ranges([between(5, 8), between(1, 3), between(2, 6)]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&t(1)));
        assert!(set.contains(&t(8)));
        assert!(!set.contains(&t(9)));
    }

    #[test]
    fn test_touching_ranges_merge() {
        let point = Range::prefix(t(3));
        let above = Range::new(Entire::after(t(3)), Entire::PositiveInfinity);
        let set = RangeSet::from_ranges([point, above]);
        assert_eq!(set.ranges(), &[Range::new(Entire::before(t(3)), Entire::PositiveInfinity)]);
    }

    #[test]
    fn test_union_intersect_invert() {
        let a = RangeSet::from_ranges([between(1, 5)]);
        let b = RangeSet::from_ranges([between(4, 9)]);
        assert_eq!(a.union(&b), RangeSet::from_ranges([between(1, 9)]));
        assert_eq!(a.intersect(&b), RangeSet::from_ranges([between(4, 5)]));

        let inverted = a.invert();
        assert!(!inverted.contains(&t(3)));
        assert!(inverted.contains(&t(0)));
        assert!(inverted.contains(&t(6)));
        assert_eq!(inverted.invert(), a);
        assert!(RangeSet::<Tuple>::empty().invert().is_full());
        assert!(RangeSet::<Tuple>::full().invert().is_empty());
    }

    #[test]
    fn test_as_prefixes() {
        let set = RangeSet::from_ranges([Range::prefix(t(1)), Range::prefix(t(4))]);
        assert_eq!(set.as_prefixes().unwrap().len(), 2);
        assert!(RangeSet::from_ranges([between(1, 4)]).as_prefixes().is_none());
    }
}
