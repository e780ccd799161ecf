use super::{Index, Transaction};
use crate::config::IndexParameters;
use crate::error::NetabaseResult;
use crate::traits::{RawHandle, RawObjectStore};
use crate::types::{CursorDirection, Key, KeyPath, Query, Value};
use crate::wrap::{
    wrap_raw, CursorStream, Operation, Rebound, ReceiverKind, RequestFuture, Unwrap, Wrap, Wrapped,
};
use std::rc::Rc;

type Raw = dyn RawObjectStore;

const ADD: Rebound<Raw, (Value, Option<Key>)> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::Add, |store, (value, key)| {
        store.add(value, key)
    });
const PUT: Rebound<Raw, (Value, Option<Key>)> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::Put, |store, (value, key)| {
        store.put(value, key)
    });
const DELETE: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::Delete, |store, query| store.delete(query));
const CLEAR: Rebound<Raw, ()> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::Clear, |store, ()| store.clear());
const GET: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::Get, |store, query| store.get(query));
const GET_KEY: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::GetKey, |store, query| store.get_key(query));
const GET_ALL: Rebound<Raw, (Query, Option<u32>)> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::GetAll, |store, (query, count)| {
        store.get_all(query, count)
    });
const GET_ALL_KEYS: Rebound<Raw, (Query, Option<u32>)> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::GetAllKeys, |store, (query, count)| {
        store.get_all_keys(query, count)
    });
const COUNT: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::ObjectStore, Operation::Count, |store, query| store.count(query));
const OPEN_CURSOR: Rebound<Raw, (Query, CursorDirection)> = Rebound::new(
    ReceiverKind::ObjectStore,
    Operation::OpenCursor,
    |store, (query, direction)| store.open_cursor(query, direction),
);
const OPEN_KEY_CURSOR: Rebound<Raw, (Query, CursorDirection)> = Rebound::new(
    ReceiverKind::ObjectStore,
    Operation::OpenKeyCursor,
    |store, (query, direction)| store.open_key_cursor(query, direction),
);

/// An object store as seen from one transaction.
#[derive(Clone)]
pub struct ObjectStore {
    pub(crate) inner: Rc<Wrapped<dyn RawObjectStore>>,
}

facade_identity!(ObjectStore, RawObjectStore, RawHandle::into_object_store);

impl ObjectStore {
    pub(crate) fn from_raw(raw: Rc<dyn RawObjectStore>) -> Self {
        Self {
            inner: wrap_raw(raw, RawHandle::ObjectStore, |_| ()),
        }
    }

    pub fn name(&self) -> String {
        self.unwrap_raw().name()
    }

    /// Rename the store. Only valid inside an upgrade transaction.
    pub fn set_name(&self, name: &str) -> NetabaseResult<()> {
        Ok(self.unwrap_raw().set_name(name)?)
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.unwrap_raw().key_path()
    }

    pub fn auto_increment(&self) -> bool {
        self.unwrap_raw().auto_increment()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.unwrap_raw().index_names()
    }

    pub fn contains_index(&self, name: &str) -> bool {
        self.index_names().iter().any(|n| n == name)
    }

    pub fn transaction(&self) -> Transaction {
        self.unwrap_raw().transaction().wrap()
    }

    /// Insert a record, failing with `ConstraintError` if its key is taken.
    pub fn add(&self, value: impl Into<Value>) -> RequestFuture<Key> {
        ADD.call(self, (value.into(), None)).into_future()
    }

    /// Insert a record under an out-of-line key.
    pub fn add_with_key(&self, value: impl Into<Value>, key: impl Into<Key>) -> RequestFuture<Key> {
        ADD.call(self, (value.into(), Some(key.into()))).into_future()
    }

    /// Insert or replace a record.
    pub fn put(&self, value: impl Into<Value>) -> RequestFuture<Key> {
        PUT.call(self, (value.into(), None)).into_future()
    }

    pub fn put_with_key(&self, value: impl Into<Value>, key: impl Into<Key>) -> RequestFuture<Key> {
        PUT.call(self, (value.into(), Some(key.into()))).into_future()
    }

    pub fn delete(&self, query: impl Into<Query>) -> RequestFuture<()> {
        DELETE.call(self, query.into()).into_future()
    }

    pub fn clear(&self) -> RequestFuture<()> {
        CLEAR.call(self, ()).into_future()
    }

    /// The first record matching `query`, or `None`.
    pub fn get(&self, query: impl Into<Query>) -> RequestFuture<Option<Value>> {
        GET.call(self, query.into()).into_future()
    }

    pub fn get_key(&self, query: impl Into<Query>) -> RequestFuture<Option<Key>> {
        GET_KEY.call(self, query.into()).into_future()
    }

    pub fn get_all(
        &self,
        query: impl Into<Query>,
        count: Option<u32>,
    ) -> RequestFuture<Vec<Value>> {
        GET_ALL.call(self, (query.into(), count)).into_future()
    }

    pub fn get_all_keys(
        &self,
        query: impl Into<Query>,
        count: Option<u32>,
    ) -> RequestFuture<Vec<Key>> {
        GET_ALL_KEYS.call(self, (query.into(), count)).into_future()
    }

    pub fn count(&self, query: impl Into<Query>) -> RequestFuture<u64> {
        COUNT.call(self, query.into()).into_future()
    }

    /// Iterate records matching `query` in ascending key order.
    pub fn open_cursor(&self, query: impl Into<Query>) -> CursorStream {
        self.open_cursor_with_direction(query, CursorDirection::Next)
    }

    pub fn open_cursor_with_direction(
        &self,
        query: impl Into<Query>,
        direction: CursorDirection,
    ) -> CursorStream {
        OPEN_CURSOR.call(self, (query.into(), direction)).into_stream()
    }

    /// Iterate keys only; yielded cursors carry no value.
    pub fn open_key_cursor(&self, query: impl Into<Query>) -> CursorStream {
        self.open_key_cursor_with_direction(query, CursorDirection::Next)
    }

    pub fn open_key_cursor_with_direction(
        &self,
        query: impl Into<Query>,
        direction: CursorDirection,
    ) -> CursorStream {
        OPEN_KEY_CURSOR.call(self, (query.into(), direction)).into_stream()
    }

    pub fn index(&self, name: &str) -> NetabaseResult<Index> {
        Ok(self.unwrap_raw().index(name)?.wrap())
    }

    /// Only valid inside an upgrade transaction.
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        params: IndexParameters,
    ) -> NetabaseResult<Index> {
        Ok(self
            .unwrap_raw()
            .create_index(name, key_path.into(), params)?
            .wrap())
    }

    /// Only valid inside an upgrade transaction.
    pub fn delete_index(&self, name: &str) -> NetabaseResult<()> {
        Ok(self.unwrap_raw().delete_index(name)?)
    }
}
