//! Cursors over object stores and indexes.
//!
//! A cursor settles the request that opened it once per position. Moving it re-queues that same
//! request on the transaction; the position is computed when the request runs, not when the move
//! is asked for.

use super::data::{check_beyond, DatabaseData, Seek};
use super::index::MemoryIndex;
use super::object_store::MemoryObjectStore;
use super::request::{MemoryRequest, Produced};
use super::transaction::{MemoryTransaction, Operation};
use crate::error::{ErrorKind, StoreError};
use crate::traits::{
    CursorSource, HandleId, Issued, RawCursor, RawIdentity, RawIndex, RawObjectStore, RawRequest,
    RawResult,
};
use crate::types::{CursorDirection, Key, KeyRange, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) enum CursorOrigin {
    Store(Rc<MemoryObjectStore>),
    Index(Rc<MemoryIndex>),
}

impl CursorOrigin {
    fn store(&self) -> &Rc<MemoryObjectStore> {
        match self {
            CursorOrigin::Store(store) => store,
            CursorOrigin::Index(index) => index.store(),
        }
    }
}

#[derive(Default)]
struct Position {
    key: Option<Key>,
    primary_key: Option<Key>,
    value: Option<Value>,
    got_value: bool,
}

pub(crate) struct MemoryCursor {
    id: HandleId,
    weak_self: Weak<MemoryCursor>,
    origin: CursorOrigin,
    request: Rc<MemoryRequest>,
    range: KeyRange,
    direction: CursorDirection,
    key_only: bool,
    position: RefCell<Position>,
}

impl MemoryCursor {
    /// Create a cursor and queue the request that finds its first position.
    pub(crate) fn open(
        origin: CursorOrigin,
        range: KeyRange,
        direction: CursorDirection,
        key_only: bool,
    ) -> Issued {
        let tx = origin.store().tx().clone();
        let request = MemoryRequest::new(Some(tx.clone()));
        let cursor = Rc::new_cyclic(|weak_self| Self {
            id: HandleId::next(),
            weak_self: weak_self.clone(),
            origin,
            request: request.clone(),
            range,
            direction,
            key_only,
            position: RefCell::new(Position::default()),
        });
        tx.track_cursor(cursor.clone());
        tx.place(request.clone(), cursor.step(None, None, 1));
        Ok(request)
    }

    fn tx(&self) -> &Rc<MemoryTransaction> {
        self.origin.store().tx()
    }

    fn step(
        self: &Rc<Self>,
        target: Option<Key>,
        target_primary: Option<Key>,
        count: u32,
    ) -> Operation {
        let cursor = self.clone();
        Box::new(move |data: &mut DatabaseData| {
            let found = cursor.seek(data, target.as_ref(), target_primary.as_ref(), count)?;
            let mut position = cursor.position.borrow_mut();
            match found {
                Some((key, primary_key, value)) => {
                    *position = Position {
                        key: Some(key),
                        primary_key: Some(primary_key),
                        value,
                        got_value: true,
                    };
                    Ok(Produced::Cursor(Rc::downgrade(&cursor)))
                }
                None => {
                    *position = Position::default();
                    Ok(Produced::Result(RawResult::Cursor(None)))
                }
            }
        })
    }

    fn seek(
        &self,
        data: &DatabaseData,
        target: Option<&Key>,
        target_primary: Option<&Key>,
        count: u32,
    ) -> Result<Option<(Key, Key, Option<Value>)>, StoreError> {
        let store = data.store(&self.origin.store().name())?;
        let (mut key, mut primary) = {
            let position = self.position.borrow();
            (position.key.clone(), position.primary_key.clone())
        };

        for step in 0..count {
            let seek = Seek {
                range: &self.range,
                direction: self.direction,
                position: key.as_ref().zip(primary.as_ref()),
                target: if step == 0 { target } else { None },
                target_primary: if step == 0 { target_primary } else { None },
            };
            let next = match &self.origin {
                CursorOrigin::Store(_) => seek.run(store),
                CursorOrigin::Index(index) => seek.run(store.index(&index.name())?),
            };
            match next {
                Some((next_key, next_primary)) => {
                    key = Some(next_key);
                    primary = Some(next_primary);
                }
                None => return Ok(None),
            }
        }

        let (Some(key), Some(primary)) = (key, primary) else {
            return Ok(None);
        };
        let value = if self.key_only {
            None
        } else {
            store.records.get(&primary).cloned()
        };
        Ok(Some((key, primary, value)))
    }

    // Shared checks before the cursor may move.
    fn check_movable(&self) -> Result<(), StoreError> {
        self.tx().check_active()?;
        self.check_source()?;
        if !self.position.borrow().got_value {
            return Err(StoreError::invalid_state(
                "The cursor is being iterated or has iterated past its end",
            ));
        }
        Ok(())
    }

    fn check_source(&self) -> Result<(), StoreError> {
        match &self.origin {
            CursorOrigin::Store(store) => store.read(|_| ()),
            CursorOrigin::Index(index) => index.read(|_, _| ()),
        }
    }

    fn move_to(
        &self,
        target: Option<Key>,
        target_primary: Option<Key>,
        count: u32,
    ) -> Result<(), StoreError> {
        let Some(cursor) = self.weak_self.upgrade() else {
            return Err(StoreError::invalid_state("The cursor has been released"));
        };
        self.position.borrow_mut().got_value = false;
        self.tx()
            .place(self.request.clone(), cursor.step(target, target_primary, count));
        Ok(())
    }

    fn current_key(&self) -> Result<Key, StoreError> {
        self.position
            .borrow()
            .key
            .clone()
            .ok_or_else(|| StoreError::invalid_state("The cursor has no current position"))
    }

    fn check_writable_position(&self) -> Result<Key, StoreError> {
        let tx = self.tx();
        tx.check_active()?;
        tx.check_writable()?;
        self.check_source()?;
        if self.key_only {
            return Err(StoreError::invalid_state("A key cursor cannot modify records"));
        }
        let position = self.position.borrow();
        match (&position.primary_key, position.got_value) {
            (Some(primary), true) => Ok(primary.clone()),
            _ => Err(StoreError::invalid_state(
                "The cursor is being iterated or has iterated past its end",
            )),
        }
    }
}

impl RawIdentity for MemoryCursor {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl RawCursor for MemoryCursor {
    fn source(&self) -> CursorSource {
        match &self.origin {
            CursorOrigin::Store(store) => CursorSource::ObjectStore(store.clone()),
            CursorOrigin::Index(index) => CursorSource::Index(index.clone()),
        }
    }

    fn direction(&self) -> CursorDirection {
        self.direction
    }

    fn key(&self) -> Option<Key> {
        self.position.borrow().key.clone()
    }

    fn primary_key(&self) -> Option<Key> {
        self.position.borrow().primary_key.clone()
    }

    fn value(&self) -> Option<Value> {
        self.position.borrow().value.clone()
    }

    fn request(&self) -> Rc<dyn RawRequest> {
        self.request.clone()
    }

    fn advance(&self, count: u32) -> Result<(), StoreError> {
        if count == 0 {
            return Err(StoreError::new(
                ErrorKind::TypeError,
                "The count must be greater than zero",
            ));
        }
        self.check_movable()?;
        self.move_to(None, None, count)
    }

    fn continue_(&self, key: Option<Key>) -> Result<(), StoreError> {
        self.check_movable()?;
        if let Some(key) = &key {
            if !key.is_valid() {
                return Err(StoreError::data("The parameter is not a valid key"));
            }
            check_beyond(&self.current_key()?, key, self.direction)?;
        }
        self.move_to(key, None, 1)
    }

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> Result<(), StoreError> {
        if matches!(self.origin, CursorOrigin::Store(_)) || self.direction.is_unique() {
            return Err(StoreError::new(
                ErrorKind::InvalidAccessError,
                "continuePrimaryKey needs an index cursor with a non-unique direction",
            ));
        }
        self.check_movable()?;
        if !key.is_valid() || !primary_key.is_valid() {
            return Err(StoreError::data("The parameter is not a valid key"));
        }
        let current = self.current_key()?;
        if key == current {
            let current_primary = self
                .position
                .borrow()
                .primary_key
                .clone()
                .ok_or_else(|| StoreError::invalid_state("The cursor has no current position"))?;
            check_beyond(&current_primary, &primary_key, self.direction)?;
        } else {
            check_beyond(&current, &key, self.direction)?;
        }
        self.move_to(Some(key), Some(primary_key), 1)
    }

    fn update(&self, value: Value) -> Issued {
        let primary = self.check_writable_position()?;
        let store = self.origin.store().clone();
        let key_path = store.key_path();
        if let Some(path) = &key_path {
            if path.extract(&value).as_ref() != Some(&primary) {
                return Err(StoreError::data(
                    "The effective key of the new value does not match the cursor's primary key",
                ));
            }
        }
        let key = key_path.is_none().then_some(primary);
        let request: Rc<dyn RawRequest> = self.tx().issue(Box::new(move |data: &mut DatabaseData| {
            data.store_mut(&store.name())?
                .store_record(value, key, true)
                .map(|key| Produced::Result(RawResult::Key(key)))
        }));
        Ok(request)
    }

    fn delete(&self) -> Issued {
        let primary = self.check_writable_position()?;
        let store = self.origin.store().clone();
        let request: Rc<dyn RawRequest> = self.tx().issue(Box::new(move |data: &mut DatabaseData| {
            data.store_mut(&store.name())?
                .delete_range(&KeyRange::only(primary));
            Ok(Produced::Result(RawResult::Undefined))
        }));
        Ok(request)
    }
}
