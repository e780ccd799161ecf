use super::ObjectStore;
use crate::error::NetabaseResult;
use crate::traits::{RawHandle, RawIndex};
use crate::types::{CursorDirection, Key, KeyPath, Query, Value};
use crate::wrap::{
    wrap_raw, CursorStream, Operation, Rebound, ReceiverKind, RequestFuture, Unwrap, Wrap, Wrapped,
};
use std::rc::Rc;

type Raw = dyn RawIndex;

const GET: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::Index, Operation::Get, |index, query| index.get(query));
const GET_KEY: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::Index, Operation::GetKey, |index, query| index.get_key(query));
const GET_ALL: Rebound<Raw, (Query, Option<u32>)> =
    Rebound::new(ReceiverKind::Index, Operation::GetAll, |index, (query, count)| {
        index.get_all(query, count)
    });
const GET_ALL_KEYS: Rebound<Raw, (Query, Option<u32>)> =
    Rebound::new(ReceiverKind::Index, Operation::GetAllKeys, |index, (query, count)| {
        index.get_all_keys(query, count)
    });
const COUNT: Rebound<Raw, Query> =
    Rebound::new(ReceiverKind::Index, Operation::Count, |index, query| index.count(query));
const OPEN_CURSOR: Rebound<Raw, (Query, CursorDirection)> =
    Rebound::new(ReceiverKind::Index, Operation::OpenCursor, |index, (query, direction)| {
        index.open_cursor(query, direction)
    });
const OPEN_KEY_CURSOR: Rebound<Raw, (Query, CursorDirection)> =
    Rebound::new(ReceiverKind::Index, Operation::OpenKeyCursor, |index, (query, direction)| {
        index.open_key_cursor(query, direction)
    });

/// A secondary index of an object store.
///
/// Queries match index keys; `get_key` and key cursors report primary keys.
#[derive(Clone)]
pub struct Index {
    pub(crate) inner: Rc<Wrapped<dyn RawIndex>>,
}

facade_identity!(Index, RawIndex, RawHandle::into_index);

impl Index {
    pub(crate) fn from_raw(raw: Rc<dyn RawIndex>) -> Self {
        Self {
            inner: wrap_raw(raw, RawHandle::Index, |_| ()),
        }
    }

    pub fn name(&self) -> String {
        self.unwrap_raw().name()
    }

    pub fn set_name(&self, name: &str) -> NetabaseResult<()> {
        Ok(self.unwrap_raw().set_name(name)?)
    }

    pub fn key_path(&self) -> KeyPath {
        self.unwrap_raw().key_path()
    }

    pub fn unique(&self) -> bool {
        self.unwrap_raw().unique()
    }

    pub fn multi_entry(&self) -> bool {
        self.unwrap_raw().multi_entry()
    }

    pub fn object_store(&self) -> ObjectStore {
        self.unwrap_raw().object_store().wrap()
    }

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
}
