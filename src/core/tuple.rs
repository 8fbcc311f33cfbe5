use super::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered row of column values with per-slot availability.
///
/// An unavailable slot is different from an available `NULL`: it means the
/// value has not been loaded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tuple {
    slots: Vec<Option<Value>>,
}

impl Tuple {
    /// Tuple of `len` unavailable slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            slots: values.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_available(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn is_fully_available(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(value);
    }

    pub fn push(&mut self, value: Value) {
        self.slots.push(Some(value));
    }

    pub fn mark_unavailable(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    /// Copies the slots available in `other` into slots of `self` that are not
    /// available yet. Returns how many slots were filled.
    pub fn merge(&mut self, other: &Tuple) -> usize {
        if other.len() > self.slots.len() {
            self.slots.resize(other.len(), None);
        }
        let mut filled = 0;
        for (slot, incoming) in self.slots.iter_mut().zip(other.slots.iter()) {
            if slot.is_none()
                && let Some(value) = incoming
            {
                *slot = Some(value.clone());
                filled += 1;
            }
        }
        filled
    }

    /// Tuple made of the given positions; missing positions are unavailable.
    pub fn project(&self, positions: &[usize]) -> Tuple {
        Tuple {
            slots: positions
                .iter()
                .map(|&p| self.slots.get(p).cloned().flatten())
                .collect(),
        }
    }

    /// Tuple holding only `positions` from `values`, laid out over `len` slots.
    pub fn scatter(len: usize, positions: &[usize], values: &Tuple) -> Tuple {
        let mut tuple = Tuple::new(len);
        for (source, &target) in positions.iter().enumerate() {
            if let Some(value) = values.get(source) {
                tuple.set(target, value.clone());
            }
        }
        tuple
    }

    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut slots = self.slots.clone();
        slots.extend(other.slots.iter().cloned());
        Tuple { slots }
    }

    pub fn prefix(&self, len: usize) -> Tuple {
        Tuple {
            slots: self.slots.iter().take(len).cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> {
        self.slots.iter().map(Option::as_ref)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match slot {
                Some(value) => write!(f, "{}", value)?,
                None => write!(f, "?")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_additive() {
        let mut target = Tuple::new(3);
        target.set(0, Value::Integer(1));
        target.set(1, Value::Text("kept".into()));

        let incoming = Tuple::from_values(vec![
            Value::Integer(1),
            Value::Text("ignored".into()),
            Value::Null,
        ]);
        assert_eq!(target.merge(&incoming), 1);
        assert_eq!(target.get(1), Some(&Value::Text("kept".into())));
        assert_eq!(target.get(2), Some(&Value::Null));
        assert!(target.is_fully_available());
    }

    #[test]
    fn test_scatter_and_project() {
        let values = Tuple::from_values(vec![Value::Integer(7), Value::Boolean(true)]);
        let row = Tuple::scatter(4, &[3, 1], &values);
        assert!(!row.is_available(0));
        assert_eq!(row.get(3), Some(&Value::Integer(7)));
        assert_eq!(
            row.project(&[1, 3]),
            Tuple::from_values(vec![Value::Boolean(true), Value::Integer(7)])
        );
        assert_eq!(row.to_string(), "(?, true, ?, 7)");
    }
}
