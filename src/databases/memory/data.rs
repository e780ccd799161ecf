//! Plain database contents held by the memory backend, and the record rules applied to them.
//!
//! Everything here is `serde` data so a whole factory can be snapshotted with bincode.

use crate::error::{ErrorKind, StoreError};
use crate::types::{CursorDirection, Key, KeyPath, KeyRange, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Largest key a generator hands out, 2^53.
pub(crate) const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct DatabaseData {
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

impl DatabaseData {
    pub(crate) fn store(&self, name: &str) -> Result<&StoreData, StoreError> {
        self.stores.get(name).ok_or_else(|| deleted_store(name))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> Result<&mut StoreData, StoreError> {
        self.stores.get_mut(name).ok_or_else(|| deleted_store(name))
    }
}

fn deleted_store(name: &str) -> StoreError {
    StoreError::invalid_state(format!("The object store '{name}' has been deleted"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreData {
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    /// Next key the generator hands out.
    pub(crate) current_number: u64,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexData {
    pub(crate) key_path: KeyPath,
    pub(crate) unique: bool,
    pub(crate) multi_entry: bool,
    /// Index key to the primary keys of every record carrying it.
    pub(crate) entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl StoreData {
    pub(crate) fn new(key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        Self {
            key_path,
            auto_increment,
            current_number: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    /// Checks `add`/`put` can make before a request is issued.
    pub(crate) fn validate_insert(
        &self,
        value: &Value,
        key: Option<&Key>,
    ) -> Result<(), StoreError> {
        match (&self.key_path, key) {
            (Some(_), Some(_)) => Err(StoreError::data(
                "The object store uses in-line keys and the key parameter was provided",
            )),
            (None, None) if !self.auto_increment => Err(StoreError::data(
                "The object store uses out-of-line keys and has no key generator and the key parameter was not provided",
            )),
            (None, Some(key)) if !key.is_valid() => {
                Err(StoreError::data("The parameter is not a valid key"))
            }
            (Some(path), None) => match path.extract(value) {
                Some(_) => Ok(()),
                None if self.auto_increment && path.can_inject(value) => Ok(()),
                None => Err(StoreError::data(
                    "Evaluating the object store's key path did not yield a value",
                )),
            },
            _ => Ok(()),
        }
    }

    fn generate_key(&mut self) -> Result<Key, StoreError> {
        if self.current_number > MAX_GENERATED_KEY {
            return Err(StoreError::constraint("The key generator is exhausted"));
        }
        let key = Key::from(self.current_number);
        self.current_number += 1;
        Ok(key)
    }

    fn observe_key(&mut self, key: &Key) {
        if !self.auto_increment {
            return;
        }
        if let Some(number) = key.as_number() {
            if number >= self.current_number as f64 {
                self.current_number = (number.floor() as u64)
                    .saturating_add(1)
                    .min(MAX_GENERATED_KEY + 1);
            }
        }
    }

    /// Store `value`, returning the key it was stored under.
    ///
    /// With `overwrite` unset an existing record under the same key is a `ConstraintError`, as
    /// is any unique index collision with another record.
    pub(crate) fn store_record(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> Result<Key, StoreError> {
        self.validate_insert(&value, key.as_ref())?;
        let key = match (self.key_path.clone(), key) {
            (None, Some(key)) => key,
            (None, None) => self.generate_key()?,
            (Some(path), _) => match path.extract(&value) {
                Some(key) => key,
                None => {
                    let key = self.generate_key()?;
                    path.inject(&mut value, &key);
                    key
                }
            },
        };
        if !overwrite && self.records.contains_key(&key) {
            return Err(StoreError::constraint(
                "A record with the given key already exists in the object store",
            ));
        }

        let index_keys: Vec<(String, Vec<Key>)> = self
            .indexes
            .iter()
            .map(|(name, index)| (name.clone(), index.keys_for(&value)))
            .collect();
        for (name, keys) in &index_keys {
            if let Some(index) = self.indexes.get(name) {
                if index.unique && keys.iter().any(|ik| index.holds_other(ik, &key)) {
                    return Err(StoreError::constraint(format!(
                        "Unable to add key to index '{name}': at least one key does not satisfy the uniqueness requirements"
                    )));
                }
            }
        }

        self.observe_key(&key);
        self.unindex(&key);
        for (name, keys) in index_keys {
            if let Some(index) = self.indexes.get_mut(&name) {
                for ik in keys {
                    index.entries.entry(ik).or_default().insert(key.clone());
                }
            }
        }
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn unindex(&mut self, key: &Key) {
        let Some(old) = self.records.get(key) else {
            return;
        };
        for index in self.indexes.values_mut() {
            for ik in index.keys_for(old) {
                if let Some(primaries) = index.entries.get_mut(&ik) {
                    primaries.remove(key);
                    if primaries.is_empty() {
                        index.entries.remove(&ik);
                    }
                }
            }
        }
    }

    /// Remove every record in `range`.
    pub(crate) fn delete_range(&mut self, range: &KeyRange) {
        let keys: Vec<Key> = self.records_in(range, false).map(|(key, _)| key.clone()).collect();
        for key in keys {
            self.unindex(&key);
            self.records.remove(&key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    pub(crate) fn records_in<'a>(
        &'a self,
        range: &KeyRange,
        reverse: bool,
    ) -> Box<dyn Iterator<Item = (&'a Key, &'a Value)> + 'a> {
        let (lower, upper) = range.bounds();
        if range_is_empty(lower, upper) {
            return Box::new(std::iter::empty());
        }
        let iter = self.records.range::<Key, _>((lower, upper));
        if reverse {
            Box::new(iter.rev())
        } else {
            Box::new(iter)
        }
    }

    /// Build a new index over the existing records.
    pub(crate) fn create_index(&mut self, name: &str, index: IndexData) -> Result<(), StoreError> {
        let mut index = index;
        for (key, value) in &self.records {
            for ik in index.keys_for(value) {
                if index.unique && index.holds_other(&ik, key) {
                    let emptied = IndexData {
                        entries: BTreeMap::new(),
                        ..index
                    };
                    self.indexes.insert(name.to_string(), emptied);
                    return Err(StoreError::constraint(format!(
                        "Unable to create index '{name}': existing records violate its uniqueness requirement"
                    )));
                }
                index.entries.entry(ik).or_default().insert(key.clone());
            }
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    pub(crate) fn index(&self, name: &str) -> Result<&IndexData, StoreError> {
        self.indexes.get(name).ok_or_else(|| {
            StoreError::invalid_state(format!("The index '{name}' has been deleted"))
        })
    }
}

impl IndexData {
    pub(crate) fn new(key_path: KeyPath, unique: bool, multi_entry: bool) -> Self {
        Self {
            key_path,
            unique,
            multi_entry,
            entries: BTreeMap::new(),
        }
    }

    fn keys_for(&self, value: &Value) -> Vec<Key> {
        self.key_path.extract_index_keys(value, self.multi_entry)
    }

    fn holds_other(&self, index_key: &Key, primary: &Key) -> bool {
        self.entries
            .get(index_key)
            .is_some_and(|primaries| primaries.iter().any(|pk| pk != primary))
    }

    /// `(index key, primary key)` pairs in `range`, in cursor order.
    pub(crate) fn entries_in<'a>(
        &'a self,
        range: &KeyRange,
        reverse: bool,
    ) -> Box<dyn Iterator<Item = (&'a Key, &'a Key)> + 'a> {
        let (lower, upper) = range.bounds();
        if range_is_empty(lower, upper) {
            return Box::new(std::iter::empty());
        }
        let iter = self.entries.range::<Key, _>((lower, upper));
        if reverse {
            Box::new(iter.rev().flat_map(|(ik, pks)| pks.iter().rev().map(move |pk| (ik, pk))))
        } else {
            Box::new(iter.flat_map(|(ik, pks)| pks.iter().map(move |pk| (ik, pk))))
        }
    }
}

/// Whether no key can satisfy both bounds.
pub(crate) fn range_is_empty(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

fn bound_key<'a>(bound: &Bound<&'a Key>) -> Option<&'a Key> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    }
}

/// The stricter of two lower bounds.
pub(crate) fn tighter_lower<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (bound_key(&a), bound_key(&b)) {
        (None, _) => b,
        (_, None) => a,
        (Some(x), Some(y)) if x > y => a,
        (Some(x), Some(y)) if x < y => b,
        _ if matches!(a, Bound::Excluded(_)) => a,
        _ => b,
    }
}

/// The stricter of two upper bounds.
pub(crate) fn tighter_upper<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (bound_key(&a), bound_key(&b)) {
        (None, _) => b,
        (_, None) => a,
        (Some(x), Some(y)) if x < y => a,
        (Some(x), Some(y)) if x > y => b,
        _ if matches!(a, Bound::Excluded(_)) => a,
        _ => b,
    }
}

/// Ordered `(key, primary key)` positions a cursor can visit.
pub(crate) trait Positions {
    /// The first key within the bounds, walking backwards when `reverse` is set.
    fn first_key(&self, lower: Bound<&Key>, upper: Bound<&Key>, reverse: bool) -> Option<Key>;

    /// The primary key following `primary` under `key`.
    fn primary_after(
        &self,
        key: &Key,
        primary: &Key,
        reverse: bool,
        inclusive: bool,
    ) -> Option<Key>;

    /// The first or last primary key under `key`.
    fn edge_primary(&self, key: &Key, last: bool) -> Option<Key>;
}

fn first_in<'a, V>(
    map: &'a BTreeMap<Key, V>,
    lower: Bound<&Key>,
    upper: Bound<&Key>,
    reverse: bool,
) -> Option<&'a Key> {
    if range_is_empty(lower, upper) {
        return None;
    }
    let mut range = map.range::<Key, _>((lower, upper));
    if reverse {
        range.next_back().map(|(key, _)| key)
    } else {
        range.next().map(|(key, _)| key)
    }
}

impl Positions for StoreData {
    fn first_key(&self, lower: Bound<&Key>, upper: Bound<&Key>, reverse: bool) -> Option<Key> {
        first_in(&self.records, lower, upper, reverse).cloned()
    }

    fn primary_after(
        &self,
        _key: &Key,
        _primary: &Key,
        _reverse: bool,
        _inclusive: bool,
    ) -> Option<Key> {
        None
    }

    fn edge_primary(&self, key: &Key, _last: bool) -> Option<Key> {
        self.records.contains_key(key).then(|| key.clone())
    }
}

impl Positions for IndexData {
    fn first_key(&self, lower: Bound<&Key>, upper: Bound<&Key>, reverse: bool) -> Option<Key> {
        first_in(&self.entries, lower, upper, reverse).cloned()
    }

    fn primary_after(
        &self,
        key: &Key,
        primary: &Key,
        reverse: bool,
        inclusive: bool,
    ) -> Option<Key> {
        let primaries = self.entries.get(key)?;
        let from = if inclusive {
            Bound::Included(primary)
        } else {
            Bound::Excluded(primary)
        };
        let next = if reverse {
            primaries.range::<Key, _>((Bound::Unbounded, from)).next_back()
        } else {
            primaries.range::<Key, _>((from, Bound::Unbounded)).next()
        };
        next.cloned()
    }

    fn edge_primary(&self, key: &Key, last: bool) -> Option<Key> {
        let primaries = self.entries.get(key)?;
        if last {
            primaries.last().cloned()
        } else {
            primaries.first().cloned()
        }
    }
}

/// One cursor movement.
pub(crate) struct Seek<'a> {
    pub(crate) range: &'a KeyRange,
    pub(crate) direction: CursorDirection,
    /// Current `(key, primary key)`, unset before the first move.
    pub(crate) position: Option<(&'a Key, &'a Key)>,
    pub(crate) target: Option<&'a Key>,
    pub(crate) target_primary: Option<&'a Key>,
}

impl Seek<'_> {
    /// The next position, if any.
    pub(crate) fn run(&self, source: &impl Positions) -> Option<(Key, Key)> {
        let reverse = self.direction.is_reverse();
        let unique = self.direction.is_unique();

        if !unique {
            if let Some((key, primary)) = self.position {
                let next = match (self.target, self.target_primary) {
                    (None, _) => source.primary_after(key, primary, reverse, false),
                    (Some(target), Some(target_primary)) if target == key => {
                        source.primary_after(key, target_primary, reverse, true)
                    }
                    _ => None,
                };
                if let Some(next) = next {
                    return Some((key.clone(), next));
                }
            }
        }

        let (mut lower, mut upper) = self.range.bounds();
        if let Some((key, _)) = self.position {
            if reverse {
                upper = tighter_upper(upper, Bound::Excluded(key));
            } else {
                lower = tighter_lower(lower, Bound::Excluded(key));
            }
        }
        if let Some(target) = self.target {
            if reverse {
                upper = tighter_upper(upper, Bound::Included(target));
            } else {
                lower = tighter_lower(lower, Bound::Included(target));
            }
        }

        let key = source.first_key(lower, upper, reverse)?;
        if let (Some(target), Some(target_primary)) = (self.target, self.target_primary) {
            if &key == target {
                if let Some(primary) = source.primary_after(&key, target_primary, reverse, true) {
                    return Some((key, primary));
                }
                if reverse {
                    upper = tighter_upper(upper, Bound::Excluded(target));
                } else {
                    lower = tighter_lower(lower, Bound::Excluded(target));
                }
                let key = source.first_key(lower, upper, reverse)?;
                let primary = source.edge_primary(&key, reverse && !unique)?;
                return Some((key, primary));
            }
        }
        let primary = source.edge_primary(&key, reverse && !unique)?;
        Some((key, primary))
    }
}

/// `DataError` unless `target` lies strictly beyond `position` in `direction`.
pub(crate) fn check_beyond(
    position: &Key,
    target: &Key,
    direction: CursorDirection,
) -> Result<(), StoreError> {
    let beyond = if direction.is_reverse() {
        target < position
    } else {
        target > position
    };
    if beyond {
        Ok(())
    } else {
        Err(StoreError::new(
            ErrorKind::DataError,
            "The key is not beyond the cursor's current position",
        ))
    }
}
