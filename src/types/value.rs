//! Stored values and key paths.

use super::key::Key;
use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured-clone value as held by the store.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    #[from(ignore)]
    Undefined,
    #[from(ignore)]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Build an object value from `(field, value)` pairs.
    pub fn object<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(field),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert to a key, if this value is a valid key.
    pub fn to_key(&self) -> Option<Key> {
        let key = match self {
            Value::Number(n) => Key::Number(*n),
            Value::String(s) => Key::String(s.clone()),
            Value::Bytes(b) => Key::Binary(b.clone()),
            Value::Date(d) => Key::Date(*d),
            Value::Array(items) => {
                Key::Array(items.iter().map(Value::to_key).collect::<Option<Vec<_>>>()?)
            }
            _ => return None,
        };
        key.is_valid().then_some(key)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Number(n) => Value::Number(n),
            Key::Date(d) => Value::Date(d),
            Key::String(s) => Value::String(s),
            Key::Binary(b) => Value::Bytes(b),
            Key::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

macro_rules! impl_value_from_int {
    ($($int:ty),*) => {
        $(
            impl From<$int> for Value {
                fn from(value: $int) -> Self {
                    Value::Number(value as f64)
                }
            }
        )*
    };
}

impl_value_from_int!(i32, i64, u32, u64, usize);

/// Where an object store or index finds the key inside a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPath {
    /// A dotted path; the empty string names the value itself.
    Single(String),
    /// Several paths whose keys combine into an array key.
    Sequence(Vec<String>),
}

impl KeyPath {
    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    /// Evaluate the key path against a value.
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => resolve(value, path)?.to_key(),
            KeyPath::Sequence(paths) => paths
                .iter()
                .map(|path| resolve(value, path)?.to_key())
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Evaluate the key path for an index, splitting array values when `multi_entry` is set.
    pub fn extract_index_keys(&self, value: &Value, multi_entry: bool) -> Vec<Key> {
        match (self, multi_entry) {
            (KeyPath::Single(path), true) => match resolve(value, path) {
                Some(Value::Array(items)) => {
                    let mut keys: Vec<Key> = items.iter().filter_map(Value::to_key).collect();
                    keys.sort();
                    keys.dedup();
                    keys
                }
                Some(other) => other.to_key().into_iter().collect(),
                None => Vec::new(),
            },
            _ => self.extract(value).into_iter().collect(),
        }
    }

    /// Whether a generated key could be written at this path.
    pub fn can_inject(&self, value: &Value) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        let mut current = value;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Value::Object(fields) = current else {
                return false;
            };
            match fields.get(segment) {
                Some(next) if segments.peek().is_some() => current = next,
                Some(_) => return false,
                None => return true,
            }
        }
        false
    }

    /// Write a generated key into the value at this path.
    pub fn inject(&self, value: &mut Value, key: &Key) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        let mut current = value;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let node = current;
            let Value::Object(fields) = node else {
                return false;
            };
            if i + 1 == segments.len() {
                fields.insert(segment.to_string(), Value::from(key.clone()));
                return true;
            }
            current = fields
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(BTreeMap::new()));
        }
        false
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_string).collect())
    }
}

fn resolve<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, tags: Vec<&str>) -> Value {
        Value::object([
            ("id", Value::from(id)),
            ("name", Value::from("ada")),
            (
                "meta",
                Value::object([(
                    "tags",
                    Value::Array(tags.into_iter().map(Value::from).collect()),
                )]),
            ),
        ])
    }

    #[test]
    fn test_extract_single_and_nested_paths() {
        let value = user(7, vec!["a"]);
        assert_eq!(KeyPath::from("id").extract(&value), Some(Key::from(7)));
        assert_eq!(KeyPath::from("missing").extract(&value), None);
        assert_eq!(
            KeyPath::from(vec!["name", "id"]).extract(&value),
            Some(Key::array([Key::from("ada"), Key::from(7)]))
        );
        assert_eq!(KeyPath::from("").extract(&Value::from(3)), Some(Key::from(3)));
    }

    #[test]
    fn test_multi_entry_index_keys_are_deduplicated() {
        let value = user(1, vec!["b", "a", "b"]);
        let keys = KeyPath::from("meta.tags").extract_index_keys(&value, true);
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);

        let whole = KeyPath::from("meta.tags").extract_index_keys(&value, false);
        assert_eq!(whole.len(), 1);
    }

    #[test]
    fn test_inject_generated_key() {
        let path = KeyPath::from("ref.id");
        let mut value = Value::object([("ref", Value::object(Vec::<(String, Value)>::new()))]);
        assert!(path.can_inject(&value));
        assert!(path.inject(&mut value, &Key::from(3)));
        assert_eq!(path.extract(&value), Some(Key::from(3)));

        assert!(!KeyPath::from("id").can_inject(&Value::from(1)));
    }
}
