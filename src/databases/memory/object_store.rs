use super::cursor::{CursorOrigin, MemoryCursor};
use super::data::{DatabaseData, IndexData, StoreData};
use super::index::MemoryIndex;
use super::request::Produced;
use super::transaction::{MemoryTransaction, Phase};
use crate::config::IndexParameters;
use crate::error::{ErrorKind, StoreError};
use crate::traits::{
    HandleId, Issued, RawIdentity, RawIndex, RawObjectStore, RawRequest, RawResult, RawTransaction,
};
use crate::types::{CursorDirection, Key, KeyPath, Query, Value};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Bound;
use std::rc::{Rc, Weak};

/// Number of items a `get_all` style request may return.
pub(crate) fn limit(count: Option<u32>) -> usize {
    match count {
        Some(0) | None => usize::MAX,
        Some(count) => count as usize,
    }
}

pub(crate) fn check_query(query: &Query) -> Result<(), StoreError> {
    let valid = match query {
        Query::All => true,
        Query::Key(key) => key.is_valid(),
        Query::Range(range) => {
            let (lower, upper) = range.bounds();
            bound_is_valid(lower) && bound_is_valid(upper)
        }
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::data("The parameter is not a valid key or key range"))
    }
}

fn bound_is_valid(bound: Bound<&Key>) -> bool {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => key.is_valid(),
        Bound::Unbounded => true,
    }
}

pub(crate) struct MemoryObjectStore {
    id: HandleId,
    weak_self: Weak<MemoryObjectStore>,
    tx: Rc<MemoryTransaction>,
    name: RefCell<String>,
    indexes: RefCell<HashMap<String, Rc<MemoryIndex>>>,
}

impl MemoryObjectStore {
    pub(crate) fn new(tx: Rc<MemoryTransaction>, name: &str) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            id: HandleId::next(),
            weak_self: weak_self.clone(),
            tx,
            name: RefCell::new(name.to_string()),
            indexes: RefCell::new(HashMap::new()),
        })
    }

    pub(crate) fn tx(&self) -> &Rc<MemoryTransaction> {
        &self.tx
    }

    fn me(&self) -> Result<Rc<Self>, StoreError> {
        self.weak_self
            .upgrade()
            .ok_or_else(|| StoreError::invalid_state("The object store has been released"))
    }

    /// Drop cached index handles once the transaction is over.
    pub(crate) fn release(&self) {
        let indexes = self.indexes.take();
        drop(indexes);
    }

    pub(crate) fn forget_index(&self, name: &str) {
        let removed = self.indexes.borrow_mut().remove(name);
        drop(removed);
    }

    pub(crate) fn rename_index(&self, from: &str, to: &str) {
        let mut indexes = self.indexes.borrow_mut();
        if let Some(index) = indexes.remove(from) {
            indexes.insert(to.to_string(), index);
        }
    }

    /// Run `read` against this store's current contents.
    pub(crate) fn read<T>(&self, read: impl FnOnce(&StoreData) -> T) -> Result<T, StoreError> {
        let data = self.tx.entry().data.borrow();
        let data = data
            .as_ref()
            .ok_or_else(|| StoreError::invalid_state("The database has been deleted"))?;
        Ok(read(data.store(&self.name.borrow())?))
    }

    fn issue<F>(&self, write: bool, operation: F) -> Issued
    where
        F: FnOnce(&mut StoreData) -> Result<RawResult, StoreError> + 'static,
    {
        self.tx.check_active()?;
        if write {
            self.tx.check_writable()?;
        }
        self.read(|_| ())?;
        let store = self.me()?;
        let request: Rc<dyn RawRequest> = self.tx.issue(Box::new(move |data: &mut DatabaseData| {
            let store = data.store_mut(&store.name.borrow())?;
            operation(store).map(Produced::Result)
        }));
        Ok(request)
    }

    fn insert(&self, value: Value, key: Option<Key>, overwrite: bool) -> Issued {
        self.tx.check_active()?;
        self.tx.check_writable()?;
        self.read(|store| store.validate_insert(&value, key.as_ref()))??;
        self.issue(true, move |store| {
            store.store_record(value, key, overwrite).map(RawResult::Key)
        })
    }

    fn open(&self, query: Query, direction: CursorDirection, key_only: bool) -> Issued {
        self.tx.check_active()?;
        check_query(&query)?;
        self.read(|_| ())?;
        MemoryCursor::open(CursorOrigin::Store(self.me()?), query.to_range(), direction, key_only)
    }
}

impl RawIdentity for MemoryObjectStore {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl RawObjectStore for MemoryObjectStore {
    fn name(&self) -> String {
        self.name.borrow().clone()
    }

    fn set_name(&self, name: &str) -> Result<(), StoreError> {
        self.tx.check_upgrading()?;
        let old = self.name();
        if old == name {
            return Ok(());
        }
        {
            let mut data = self.tx.entry().data.borrow_mut();
            let data = data
                .as_mut()
                .ok_or_else(|| StoreError::invalid_state("The database has been deleted"))?;
            if data.stores.contains_key(name) {
                return Err(StoreError::constraint(format!(
                    "An object store named '{name}' already exists"
                )));
            }
            let store = data.stores.remove(&old).ok_or_else(|| {
                StoreError::invalid_state(format!("The object store '{old}' has been deleted"))
            })?;
            data.stores.insert(name.to_string(), store);
        }
        debug!("renamed object store {old} to {name}");
        self.tx.rename_store(&old, name);
        *self.name.borrow_mut() = name.to_string();
        Ok(())
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.read(|store| store.key_path.clone()).ok().flatten()
    }

    fn auto_increment(&self) -> bool {
        self.read(|store| store.auto_increment).unwrap_or(false)
    }

    fn index_names(&self) -> Vec<String> {
        self.read(|store| store.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(&self) -> Rc<dyn RawTransaction> {
        self.tx.clone()
    }

    fn add(&self, value: Value, key: Option<Key>) -> Issued {
        self.insert(value, key, false)
    }

    fn put(&self, value: Value, key: Option<Key>) -> Issued {
        self.insert(value, key, true)
    }

    fn delete(&self, query: Query) -> Issued {
        check_query(&query)?;
        let range = query.to_range();
        self.issue(true, move |store| {
            store.delete_range(&range);
            Ok(RawResult::Undefined)
        })
    }

    fn clear(&self) -> Issued {
        self.issue(true, |store| {
            store.clear();
            Ok(RawResult::Undefined)
        })
    }

    fn get(&self, query: Query) -> Issued {
        check_query(&query)?;
        let range = query.to_range();
        self.issue(false, move |store| {
            Ok(store
                .records_in(&range, false)
                .next()
                .map(|(_, value)| RawResult::Value(value.clone()))
                .unwrap_or(RawResult::Undefined))
        })
    }

    fn get_key(&self, query: Query) -> Issued {
        check_query(&query)?;
        let range = query.to_range();
        self.issue(false, move |store| {
            Ok(store
                .records_in(&range, false)
                .next()
                .map(|(key, _)| RawResult::Key(key.clone()))
                .unwrap_or(RawResult::Undefined))
        })
    }

    fn get_all(&self, query: Query, count: Option<u32>) -> Issued {
        check_query(&query)?;
        let range = query.to_range();
        self.issue(false, move |store| {
            Ok(RawResult::Values(
                store
                    .records_in(&range, false)
                    .take(limit(count))
                    .map(|(_, value)| value.clone())
                    .collect(),
            ))
        })
    }

    fn get_all_keys(&self, query: Query, count: Option<u32>) -> Issued {
        check_query(&query)?;
        let range = query.to_range();
        self.issue(false, move |store| {
            Ok(RawResult::Keys(
                store
                    .records_in(&range, false)
                    .take(limit(count))
                    .map(|(key, _)| key.clone())
                    .collect(),
            ))
        })
    }

    fn count(&self, query: Query) -> Issued {
        check_query(&query)?;
        let range = query.to_range();
        self.issue(false, move |store| {
            Ok(RawResult::Count(store.records_in(&range, false).count() as u64))
        })
    }

    fn open_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        self.open(query, direction, false)
    }

    fn open_key_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        self.open(query, direction, true)
    }

    fn index(&self, name: &str) -> Result<Rc<dyn RawIndex>, StoreError> {
        if self.tx.phase() == Phase::Finished {
            return Err(StoreError::invalid_state("The transaction has finished"));
        }
        if !self.read(|store| store.indexes.contains_key(name))? {
            return Err(StoreError::not_found(format!("No index named '{name}'")));
        }
        let store = self.me()?;
        let index: Rc<MemoryIndex> = self
            .indexes
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| MemoryIndex::new(store, name))
            .clone();
        Ok(index)
    }

    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParameters,
    ) -> Result<Rc<dyn RawIndex>, StoreError> {
        self.tx.check_upgrading()?;
        if params.multi_entry && key_path.is_sequence() {
            return Err(StoreError::new(
                ErrorKind::InvalidAccessError,
                "A multi-entry index cannot use a sequence key path",
            ));
        }
        if self.read(|store| store.indexes.contains_key(name))? {
            return Err(StoreError::constraint(format!("An index named '{name}' already exists")));
        }
        let built = {
            let mut data = self.tx.entry().data.borrow_mut();
            let data = data
                .as_mut()
                .ok_or_else(|| StoreError::invalid_state("The database has been deleted"))?;
            data.store_mut(&self.name.borrow())?.create_index(
                name,
                IndexData::new(key_path, params.unique, params.multi_entry),
            )
        };
        if let Err(error) = built {
            debug!("building index {name} failed: {error}");
            let tx = self.tx.clone();
            self.tx.entry().tasks.queue(move || tx.abort_with(Some(error)));
        }
        self.index(name)
    }

    fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        self.tx.check_upgrading()?;
        let removed = {
            let mut data = self.tx.entry().data.borrow_mut();
            let data = data
                .as_mut()
                .ok_or_else(|| StoreError::invalid_state("The database has been deleted"))?;
            data.store_mut(&self.name.borrow())?.indexes.remove(name)
        };
        if removed.is_none() {
            return Err(StoreError::not_found(format!("No index named '{name}'")));
        }
        self.forget_index(name);
        Ok(())
    }
}
