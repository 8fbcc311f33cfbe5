use super::{OrmError, Result, Tuple, TypeId, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Identifier of a persistent object.
///
/// Two keys are equal when they belong to the same hierarchy and carry the
/// same values, whatever their type reference says: a key read from a
/// foreign key column (inexact, typed by the association target) and the key
/// of the materialized entity (exact) denote the same object.
///
/// The temporary flag is not part of equality either: a foreign key column
/// pointing at a new entity holds its temporary value, and the key read back
/// from it must find that entity. Temporary values are negative, and identity
/// columns only issue positive ones.
#[derive(Debug, Clone)]
pub struct Key {
    hierarchy: TypeId,
    type_id: TypeId,
    exact: bool,
    value: Tuple,
    temporary: bool,
}

impl Key {
    pub fn new(hierarchy: TypeId, type_id: TypeId, exact: bool, value: Tuple) -> Self {
        Self {
            hierarchy,
            type_id,
            exact,
            value,
            temporary: false,
        }
    }

    /// Key generated locally that must be remapped when persisted.
    pub fn temporary(hierarchy: TypeId, type_id: TypeId, value: Tuple) -> Self {
        Self {
            hierarchy,
            type_id,
            exact: true,
            value,
            temporary: true,
        }
    }

    pub fn hierarchy(&self) -> TypeId {
        self.hierarchy
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_exact_type(&self) -> bool {
        self.exact
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn value(&self) -> &Tuple {
        &self.value
    }

    /// Same identity, resolved to its exact type.
    pub fn with_exact_type(&self, type_id: TypeId) -> Key {
        Key {
            type_id,
            exact: true,
            ..self.clone()
        }
    }

    /// Delimited string form, inverted by [`Key::parse`].
    pub fn format(&self) -> String {
        let mut out = String::new();
        if self.temporary {
            out.push('~');
        }
        out.push_str(&format!("{}/{}", self.hierarchy.0, self.type_id.0));
        if self.exact {
            out.push('!');
        }
        out.push(':');
        for (i, value) in self.value.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            format_value(value.unwrap_or(&Value::Null), &mut out);
        }
        out
    }

    pub fn parse(text: &str) -> Result<Key> {
        let (temporary, rest) = match text.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (header, values) = rest
            .split_once(':')
            .ok_or_else(|| OrmError::ParseError(format!("Key '{}' has no value part", text)))?;
        let (hierarchy, type_part) = header
            .split_once('/')
            .ok_or_else(|| OrmError::ParseError(format!("Key '{}' has no type part", text)))?;
        let (type_part, exact) = match type_part.strip_suffix('!') {
            Some(t) => (t, true),
            None => (type_part, false),
        };
        let hierarchy = parse_type_id(hierarchy, text)?;
        let type_id = parse_type_id(type_part, text)?;

        let mut tuple = Tuple::default();
        for token in split_escaped(values) {
            tuple.push(parse_value(&token)?);
        }
        Ok(Key {
            hierarchy,
            type_id,
            exact,
            value: tuple,
            temporary,
        })
    }
}

fn parse_type_id(part: &str, text: &str) -> Result<TypeId> {
    part.parse::<u32>()
        .map(TypeId)
        .map_err(|_| {
            OrmError::ParseError(format!("Key '{}' has an invalid type id '{}'", text, part))
        })
}

fn format_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('n'),
        Value::Boolean(b) => out.push_str(&format!("b:{}", b)),
        Value::Integer(i) => out.push_str(&format!("i:{}", i)),
        Value::Float(f) => out.push_str(&format!("f:{}", f)),
        Value::Guid(g) => out.push_str(&format!("g:{}", g)),
        Value::Text(s) => {
            out.push_str("s:");
            for c in s.chars() {
                if c == ',' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
        }
    }
}

fn split_escaped(values: &str) -> Vec<String> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = values.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    tokens.push(current);
    tokens
}

fn parse_value(token: &str) -> Result<Value> {
    if token == "n" {
        return Ok(Value::Null);
    }
    let (tag, body) = token
        .split_once(':')
        .ok_or_else(|| OrmError::ParseError(format!("Invalid key value '{}'", token)))?;
    let invalid = || OrmError::ParseError(format!("Invalid key value '{}'", token));
    match tag {
        "b" => body.parse::<bool>().map(Value::Boolean).map_err(|_| invalid()),
        "i" => body.parse::<i64>().map(Value::Integer).map_err(|_| invalid()),
        "f" => body.parse::<f64>().map(Value::Float).map_err(|_| invalid()),
        "g" => Uuid::parse_str(body).map(Value::Guid).map_err(|_| invalid()),
        "s" => Ok(Value::Text(body.to_string())),
        _ => Err(invalid()),
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hierarchy == other.hierarchy && self.value == other.value
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hierarchy.hash(state);
        self.value.hash(state);
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hierarchy
            .cmp(&other.hierarchy)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Key::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: Vec<Value>) -> Key {
        Key::new(TypeId(1), TypeId(3), true, Tuple::from_values(values))
    }

    #[test]
    fn test_format_parse_round_trip() {
        let original = key(vec![
            Value::Integer(-5),
            Value::Text("a,b\\c".into()),
            Value::Null,
            Value::Boolean(true),
            Value::Float(2.5),
            Value::Guid(Uuid::nil()),
        ]);
        let text = original.format();
        let parsed = Key::parse(&text).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.type_id(), TypeId(3));
        assert!(parsed.is_exact_type());
        assert_eq!(parsed.format(), text);
    }

    #[test]
    fn test_temporary_marker_survives_round_trip() {
        let value = Tuple::from_values(vec![Value::Integer(-1)]);
        let temp = Key::temporary(TypeId(2), TypeId(2), value);
        let parsed = Key::parse(&temp.format()).unwrap();
        assert!(parsed.is_temporary());
        assert_eq!(temp.format(), "~2/2!:i:-1");
    }

    #[test]
    fn test_equality_ignores_type_reference() {
        let value = Tuple::from_values(vec![Value::Integer(4)]);
        let inexact = Key::new(TypeId(1), TypeId(1), false, value);
        let exact = inexact.with_exact_type(TypeId(5));
        assert_eq!(inexact, exact);
        assert!(!inexact.is_exact_type());
        assert!(exact.is_exact_type());
    }

    #[test]
    fn test_key_read_from_column_matches_temporary_key() {
        let value = Tuple::from_values(vec![Value::Integer(-1)]);
        let temp = Key::temporary(TypeId(2), TypeId(3), value.clone());
        let read = Key::new(TypeId(2), TypeId(2), false, value);
        assert_eq!(temp, read);
        assert!(!read.is_temporary());

        let mut states = std::collections::HashMap::new();
        states.insert(temp.clone(), "new");
        assert_eq!(states.get(&read), Some(&"new"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Key::parse("nope").is_err());
        assert!(Key::parse("1/x:i:1").is_err());
        assert!(Key::parse("1/1:q:1").is_err());
    }
}
