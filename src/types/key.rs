//! Keys, key ranges and queries.
//!
//! Keys follow the store's ordering rules: every number sorts before every date, every date
//! before every string, strings before binary keys and binary keys before arrays. Within a
//! variant keys compare by value, arrays lexicographically.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Bound;

#[derive(Debug, Clone, From, Serialize, Deserialize)]
pub enum Key {
    Number(f64),
    Date(DateTime<Utc>),
    String(String),
    Binary(Vec<u8>),
    #[from(ignore)]
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// A numeric key, as produced by key generators.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// NaN is never a valid key.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) => !n.is_nan(),
            Key::Array(items) => items.iter().all(Key::is_valid),
            _ => true,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Date(a), Key::Date(b)) => a.cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

macro_rules! impl_key_from_int {
    ($($int:ty),*) => {
        $(
            impl From<$int> for Key {
                fn from(value: $int) -> Self {
                    Key::Number(value as f64)
                }
            }
        )*
    };
}

impl_key_from_int!(i32, i64, u32, u64, usize);

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<&[u8]> for Key {
    fn from(value: &[u8]) -> Self {
        Key::Binary(value.to_vec())
    }
}

impl Key {
    pub fn array<K: Into<Key>>(items: impl IntoIterator<Item = K>) -> Self {
        Key::Array(items.into_iter().map(Into::into).collect())
    }
}

/// A continuous interval over keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<Key>,
    pub upper: Bound<Key>,
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        let key = key.into();
        Self {
            lower: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Unbounded,
            upper: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
        }
    }

    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, StoreError> {
        let (lower, upper) = (lower.into(), upper.into());
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(StoreError::data(
                    "The lower key is greater than the upper key",
                ));
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(StoreError::data(
                    "The lower key and upper key are equal and one of the bounds is open",
                ));
            }
            _ => {}
        }
        Ok(Self {
            lower: if lower_open {
                Bound::Excluded(lower)
            } else {
                Bound::Included(lower)
            },
            upper: if upper_open {
                Bound::Excluded(upper)
            } else {
                Bound::Included(upper)
            },
        })
    }

    pub fn includes(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    pub fn bounds(&self) -> (Bound<&Key>, Bound<&Key>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

/// What a read or delete operation selects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Query {
    #[default]
    All,
    Key(Key),
    Range(KeyRange),
}

impl Query {
    pub fn matches(&self, key: &Key) -> bool {
        match self {
            Query::All => true,
            Query::Key(k) => k == key,
            Query::Range(range) => range.includes(key),
        }
    }

    pub fn to_range(&self) -> KeyRange {
        match self {
            Query::All => KeyRange {
                lower: Bound::Unbounded,
                upper: Bound::Unbounded,
            },
            Query::Key(k) => KeyRange::only(k.clone()),
            Query::Range(range) => range.clone(),
        }
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl<Q: Into<Query>> From<Option<Q>> for Query {
    fn from(value: Option<Q>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

macro_rules! impl_query_from_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Query {
                fn from(value: $ty) -> Self {
                    Query::Key(value.into())
                }
            }
        )*
    };
}

impl_query_from_key!(i32, i64, u32, u64, usize, f64, &str, String);

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    fn arbitrary_key(seed: (u8, i32, String)) -> Key {
        match seed.0 % 4 {
            0 => Key::Number(seed.1 as f64),
            1 => Key::String(seed.2),
            2 => Key::Binary(seed.2.into_bytes()),
            _ => Key::Array(vec![Key::Number(seed.1 as f64), Key::String(seed.2)]),
        }
    }

    #[test]
    fn test_cross_type_ordering() {
        let date = Key::Date(DateTime::<Utc>::from_timestamp(0, 0).unwrap());
        let keys = vec![
            Key::array([0]),
            Key::from(&b"a"[..]),
            Key::from("a"),
            date.clone(),
            Key::from(1_000_000),
        ];
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted[0], Key::from(1_000_000));
        assert_eq!(sorted[1], date);
        assert_eq!(sorted[2], Key::from("a"));
        assert_eq!(sorted[4], Key::array([0]));
    }

    #[test]
    fn test_nan_is_not_a_valid_key() {
        assert!(!Key::Number(f64::NAN).is_valid());
        assert!(Key::array([1, 2]).is_valid());
    }

    #[test]
    fn test_key_range_bounds() {
        let range = KeyRange::bound(1, 5, true, false).unwrap();
        assert!(!range.includes(&Key::from(1)));
        assert!(range.includes(&Key::from(3)));
        assert!(range.includes(&Key::from(5)));
        assert!(!range.includes(&Key::from(6)));

        assert!(KeyRange::bound(5, 1, false, false).is_err());
        assert!(KeyRange::bound(2, 2, true, false).is_err());
        assert!(KeyRange::only(2).includes(&Key::from(2)));
    }

    #[test]
    fn test_query_from_option() {
        let none: Option<Key> = None;
        assert_eq!(Query::from(none), Query::All);
        assert_eq!(Query::from(Some(Key::from(4))), Query::Key(Key::from(4)));
    }

    quickcheck! {
        fn prop_key_order_is_antisymmetric(a: (u8, i32, String), b: (u8, i32, String)) -> bool {
            let (a, b) = (arbitrary_key(a), arbitrary_key(b));
            a.cmp(&b) == b.cmp(&a).reverse()
        }

        fn prop_key_order_is_transitive(
            a: (u8, i32, String),
            b: (u8, i32, String),
            c: (u8, i32, String)
        ) -> bool {
            let mut keys = vec![arbitrary_key(a), arbitrary_key(b), arbitrary_key(c)];
            keys.sort();
            keys[0] <= keys[1] && keys[1] <= keys[2] && keys[0] <= keys[2]
        }
    }
}
