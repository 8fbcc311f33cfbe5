use crate::core::Tuple;
use std::cmp::Ordering;
use std::fmt;

/// Infinitesimal offset of a bound relative to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Shift {
    /// Just before every value starting with the bound value
    Negative,
    None,
    /// Just after every value starting with the bound value
    Positive,
}

/// Values that compare as prefixes of each other.
pub trait PrefixOrd {
    /// Compares the common prefix of `self` and `other`; `None` when it is
    /// equal, in which case the shorter side decides through its shift.
    fn prefix_cmp(&self, other: &Self) -> Option<Ordering>;

    fn prefix_len(&self) -> usize;
}

impl PrefixOrd for Tuple {
    fn prefix_cmp(&self, other: &Self) -> Option<Ordering> {
        for (left, right) in self.iter().zip(other.iter()) {
            match left.cmp(&right) {
                Ordering::Equal => continue,
                unequal => return Some(unequal),
            }
        }
        None
    }

    fn prefix_len(&self) -> usize {
        self.len()
    }
}

/// Value extended with infinities and shifted bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entire<T> {
    NegativeInfinity,
    Value(T, Shift),
    PositiveInfinity,
}

impl<T> Entire<T> {
    pub fn exact(value: T) -> Self {
        Entire::Value(value, Shift::None)
    }

    pub fn before(value: T) -> Self {
        Entire::Value(value, Shift::Negative)
    }

    pub fn after(value: T) -> Self {
        Entire::Value(value, Shift::Positive)
    }

    pub fn is_infinite(&self) -> bool {
        !matches!(self, Entire::Value(..))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Entire::Value(value, _) => Some(value),
            _ => None,
        }
    }

    pub fn shift(&self) -> Option<Shift> {
        match self {
            Entire::Value(_, shift) => Some(*shift),
            _ => None,
        }
    }
}

impl<T: PrefixOrd + Eq> Ord for Entire<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        use Entire::*;
        match (self, other) {
            (NegativeInfinity, NegativeInfinity) | (PositiveInfinity, PositiveInfinity) => {
                Ordering::Equal
            }
            (NegativeInfinity, _) | (_, PositiveInfinity) => Ordering::Less,
            (PositiveInfinity, _) | (_, NegativeInfinity) => Ordering::Greater,
            (Value(a, sa), Value(b, sb)) => {
                if let Some(ordering) = a.prefix_cmp(b) {
                    return ordering;
                }
                match a.prefix_len().cmp(&b.prefix_len()) {
                    Ordering::Equal => sa.cmp(sb),
                    // the shorter bound covers every extension of itself
                    Ordering::Less => match sa {
                        Shift::Positive => Ordering::Greater,
                        _ => Ordering::Less,
                    },
                    Ordering::Greater => match sb {
                        Shift::Positive => Ordering::Less,
                        _ => Ordering::Greater,
                    },
                }
            }
        }
    }
}

impl<T: PrefixOrd + Eq> PartialOrd for Entire<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: fmt::Display> fmt::Display for Entire<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entire::NegativeInfinity => write!(f, "-inf"),
            Entire::PositiveInfinity => write!(f, "+inf"),
            Entire::Value(value, Shift::None) => write!(f, "{}", value),
            Entire::Value(value, Shift::Negative) => write!(f, "{}-", value),
            Entire::Value(value, Shift::Positive) => write!(f, "{}+", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn t(values: &[i64]) -> Tuple {
        Tuple::from_values(values.iter().map(|&v| Value::Integer(v)))
    }

    #[test]
    fn test_infinities() {
        assert!(Entire::NegativeInfinity < Entire::exact(t(&[1])));
        assert!(Entire::PositiveInfinity > Entire::after(t(&[i64::MAX])));
    }

    #[test]
    fn test_shifts_at_equal_length() {
        assert!(Entire::before(t(&[5])) < Entire::exact(t(&[5])));
        assert!(Entire::exact(t(&[5])) < Entire::after(t(&[5])));
        assert!(Entire::after(t(&[4])) < Entire::before(t(&[5])));
    }

    #[test]
    fn test_prefix_bounds_cover_extensions() {
        let key = Entire::exact(t(&[5, 100]));
        assert!(Entire::before(t(&[5])) < key);
        assert!(Entire::after(t(&[5])) > key);
        assert!(Entire::after(t(&[4])) < key);
        assert!(Entire::before(t(&[6])) > key);
    }
}
