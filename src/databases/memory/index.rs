use super::cursor::{CursorOrigin, MemoryCursor};
use super::data::{DatabaseData, IndexData, StoreData};
use super::object_store::{check_query, limit, MemoryObjectStore};
use super::request::Produced;
use crate::error::StoreError;
use crate::traits::{
    HandleId, Issued, RawIdentity, RawIndex, RawObjectStore, RawRequest, RawResult,
};
use crate::types::{CursorDirection, KeyPath, KeyRange, Query};
use log::debug;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) struct MemoryIndex {
    id: HandleId,
    weak_self: Weak<MemoryIndex>,
    store: Rc<MemoryObjectStore>,
    name: RefCell<String>,
}

impl MemoryIndex {
    pub(crate) fn new(store: Rc<MemoryObjectStore>, name: &str) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            id: HandleId::next(),
            weak_self: weak_self.clone(),
            store,
            name: RefCell::new(name.to_string()),
        })
    }

    pub(crate) fn store(&self) -> &Rc<MemoryObjectStore> {
        &self.store
    }

    /// Run `read` against this index and the store it belongs to.
    pub(crate) fn read<T>(
        &self,
        read: impl FnOnce(&IndexData, &StoreData) -> T,
    ) -> Result<T, StoreError> {
        let name = self.name.borrow().clone();
        self.store
            .read(|store| store.index(&name).map(|index| read(index, store)))?
    }

    fn issue<F>(&self, query: Query, operation: F) -> Issued
    where
        F: FnOnce(&IndexData, &StoreData, &KeyRange) -> RawResult + 'static,
    {
        let tx = self.store.tx();
        tx.check_active()?;
        check_query(&query)?;
        self.read(|_, _| ())?;
        let index = self
            .weak_self
            .upgrade()
            .ok_or_else(|| StoreError::invalid_state("The index has been released"))?;
        let range = query.to_range();
        let request: Rc<dyn RawRequest> = tx.issue(Box::new(move |data: &mut DatabaseData| {
            let store = data.store(&index.store.name())?;
            let found = store.index(&index.name.borrow())?;
            Ok(Produced::Result(operation(found, store, &range)))
        }));
        Ok(request)
    }

    fn open(&self, query: Query, direction: CursorDirection, key_only: bool) -> Issued {
        self.store.tx().check_active()?;
        check_query(&query)?;
        self.read(|_, _| ())?;
        let index = self
            .weak_self
            .upgrade()
            .ok_or_else(|| StoreError::invalid_state("The index has been released"))?;
        MemoryCursor::open(CursorOrigin::Index(index), query.to_range(), direction, key_only)
    }
}

impl RawIdentity for MemoryIndex {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl RawIndex for MemoryIndex {
    fn name(&self) -> String {
        self.name.borrow().clone()
    }

    fn set_name(&self, name: &str) -> Result<(), StoreError> {
        self.store.tx().check_upgrading()?;
        let old = self.name();
        if old == name {
            return Ok(());
        }
        {
            let mut data = self.store.tx().entry().data.borrow_mut();
            let data = data
                .as_mut()
                .ok_or_else(|| StoreError::invalid_state("The database has been deleted"))?;
            let store = data.store_mut(&self.store.name())?;
            if store.indexes.contains_key(name) {
                return Err(StoreError::constraint(format!(
                    "An index named '{name}' already exists"
                )));
            }
            let index = store.indexes.remove(&old).ok_or_else(|| {
                StoreError::invalid_state(format!("The index '{old}' has been deleted"))
            })?;
            store.indexes.insert(name.to_string(), index);
        }
        debug!("renamed index {old} to {name}");
        self.store.rename_index(&old, name);
        *self.name.borrow_mut() = name.to_string();
        Ok(())
    }

    fn key_path(&self) -> KeyPath {
        self.read(|index, _| index.key_path.clone())
            .unwrap_or_else(|_| KeyPath::Single(String::new()))
    }

    fn unique(&self) -> bool {
        self.read(|index, _| index.unique).unwrap_or(false)
    }

    fn multi_entry(&self) -> bool {
        self.read(|index, _| index.multi_entry).unwrap_or(false)
    }

    fn object_store(&self) -> Rc<dyn RawObjectStore> {
        self.store.clone()
    }

    fn get(&self, query: Query) -> Issued {
        self.issue(query, |index, store, range| {
            index
                .entries_in(range, false)
                .next()
                .and_then(|(_, primary)| store.records.get(primary))
                .map(|value| RawResult::Value(value.clone()))
                .unwrap_or(RawResult::Undefined)
        })
    }

    fn get_key(&self, query: Query) -> Issued {
        self.issue(query, |index, _, range| {
            index
                .entries_in(range, false)
                .next()
                .map(|(_, primary)| RawResult::Key(primary.clone()))
                .unwrap_or(RawResult::Undefined)
        })
    }

    fn get_all(&self, query: Query, count: Option<u32>) -> Issued {
        self.issue(query, move |index, store, range| {
            RawResult::Values(
                index
                    .entries_in(range, false)
                    .filter_map(|(_, primary)| store.records.get(primary).cloned())
                    .take(limit(count))
                    .collect(),
            )
        })
    }

    fn get_all_keys(&self, query: Query, count: Option<u32>) -> Issued {
        self.issue(query, move |index, _, range| {
            RawResult::Keys(
                index
                    .entries_in(range, false)
                    .take(limit(count))
                    .map(|(_, primary)| primary.clone())
                    .collect(),
            )
        })
    }

    fn count(&self, query: Query) -> Issued {
        self.issue(query, |index, _, range| {
            RawResult::Count(index.entries_in(range, false).count() as u64)
        })
    }

    fn open_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        self.open(query, direction, false)
    }

    fn open_key_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        self.open(query, direction, true)
    }
}
