use super::{Index, ObjectStore};
use crate::error::NetabaseResult;
use crate::traits::{CursorSource, RawCursor, RawHandle};
use crate::types::{CursorDirection, Key, Value};
use crate::wrap::{wrap_raw, Operation, Rebound, ReceiverKind, RequestFuture, Unwrap, Wrap, Wrapped};
use std::rc::Rc;

type Raw = dyn RawCursor;

const UPDATE: Rebound<Raw, Value> =
    Rebound::new(ReceiverKind::Cursor, Operation::Update, |cursor, value| cursor.update(value));
const DELETE: Rebound<Raw, ()> =
    Rebound::new(ReceiverKind::Cursor, Operation::Delete, |cursor, ()| cursor.delete());

/// Where a cursor iterates, wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorSourceHandle {
    ObjectStore(ObjectStore),
    Index(Index),
}

/// One position of a traversal.
///
/// The same cursor is yielded for every position of a stream; its key and value change as it
/// moves.
#[derive(Clone)]
pub struct Cursor {
    pub(crate) inner: Rc<Wrapped<dyn RawCursor>>,
}

facade_identity!(Cursor, RawCursor, RawHandle::into_cursor);

impl Cursor {
    pub(crate) fn from_raw(raw: Rc<dyn RawCursor>) -> Self {
        Self {
            inner: wrap_raw(raw, RawHandle::Cursor, |_| ()),
        }
    }

    pub fn source(&self) -> CursorSourceHandle {
        match self.unwrap_raw().source() {
            CursorSource::ObjectStore(store) => CursorSourceHandle::ObjectStore(store.wrap()),
            CursorSource::Index(index) => CursorSourceHandle::Index(index.wrap()),
        }
    }

    pub fn direction(&self) -> CursorDirection {
        self.unwrap_raw().direction()
    }

    pub fn key(&self) -> Option<Key> {
        self.unwrap_raw().key()
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.unwrap_raw().primary_key()
    }

    /// `None` for key cursors.
    pub fn value(&self) -> Option<Value> {
        self.unwrap_raw().value()
    }

    pub fn advance(&self, count: u32) -> NetabaseResult<()> {
        Ok(self.unwrap_raw().advance(count)?)
    }

    /// Move to the next position, or to the first one at or past `key`.
    pub fn continue_(&self, key: Option<Key>) -> NetabaseResult<()> {
        Ok(self.unwrap_raw().continue_(key)?)
    }

    pub fn continue_primary_key(
        &self,
        key: impl Into<Key>,
        primary_key: impl Into<Key>,
    ) -> NetabaseResult<()> {
        Ok(self
            .unwrap_raw()
            .continue_primary_key(key.into(), primary_key.into())?)
    }

    /// Replace the record at this position.
    pub fn update(&self, value: impl Into<Value>) -> RequestFuture<Key> {
        UPDATE.call(self, value.into()).into_future()
    }

    /// Delete the record at this position.
    pub fn delete(&self) -> RequestFuture<()> {
        DELETE.call(self, ()).into_future()
    }
}
