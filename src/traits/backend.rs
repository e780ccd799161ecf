//! The surface of the underlying event-driven store.
//!
//! Each resource kind has its own trait. Operations that complete asynchronously return a
//! [`RawRequest`] whose `success` or `error` event reports the outcome; everything else is
//! synchronous. Backends live in [`crate::databases`]; the adapters in [`crate::wrap`] only
//! ever talk to these traits.

use super::events::EventTarget;
use crate::config::{IndexParameters, ObjectStoreParameters, TransactionOptions};
use crate::error::StoreError;
use crate::types::{
    CursorDirection, Durability, Key, KeyPath, Query, ReadyState, TransactionMode, Value,
};
use derive_more::{Display, From};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Process-unique identity of a raw handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Display)]
#[display("handle#{_0}")]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandleId(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

pub trait RawIdentity {
    fn handle_id(&self) -> HandleId;
}

/// A request handed back by the store, or the reason it could not be issued.
pub type Issued = Result<Rc<dyn RawRequest>, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Entry point of the store.
pub trait RawFactory {
    /// Open a connection. The returned request also dispatches `blocked` and
    /// `upgradeneeded`.
    fn open(&self, name: &str, version: Option<u64>) -> Issued;

    fn delete_database(&self, name: &str) -> Issued;

    fn databases(&self) -> Issued;

    fn cmp(&self, a: &Key, b: &Key) -> Ordering {
        a.cmp(b)
    }
}

/// An open connection. Dispatches `versionchange` and `close`.
pub trait RawDatabase: RawIdentity + EventTarget {
    fn name(&self) -> String;

    fn version(&self) -> u64;

    fn object_store_names(&self) -> Vec<String>;

    fn create_object_store(
        &self,
        name: &str,
        params: &ObjectStoreParameters,
    ) -> Result<Rc<dyn RawObjectStore>, StoreError>;

    fn delete_object_store(&self, name: &str) -> Result<(), StoreError>;

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
        options: TransactionOptions,
    ) -> Result<Rc<dyn RawTransaction>, StoreError>;

    fn close(&self);
}

/// Dispatches `complete`, `error` and `abort`.
pub trait RawTransaction: RawIdentity + EventTarget {
    fn mode(&self) -> TransactionMode;

    fn durability(&self) -> Durability;

    fn object_store_names(&self) -> Vec<String>;

    fn db(&self) -> Rc<dyn RawDatabase>;

    fn error(&self) -> Option<StoreError>;

    fn object_store(&self, name: &str) -> Result<Rc<dyn RawObjectStore>, StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn abort(&self) -> Result<(), StoreError>;

    /// A completion the backend already exposes natively. When present the completion
    /// adapter hands it out instead of listening for events.
    fn native_completion(&self) -> Option<LocalBoxFuture<'static, Result<(), StoreError>>> {
        None
    }
}

pub trait RawObjectStore: RawIdentity {
    fn name(&self) -> String;

    fn set_name(&self, name: &str) -> Result<(), StoreError>;

    fn key_path(&self) -> Option<KeyPath>;

    fn auto_increment(&self) -> bool;

    fn index_names(&self) -> Vec<String>;

    fn transaction(&self) -> Rc<dyn RawTransaction>;

    fn add(&self, value: Value, key: Option<Key>) -> Issued;

    fn put(&self, value: Value, key: Option<Key>) -> Issued;

    fn delete(&self, query: Query) -> Issued;

    fn clear(&self) -> Issued;

    fn get(&self, query: Query) -> Issued;

    fn get_key(&self, query: Query) -> Issued;

    fn get_all(&self, query: Query, count: Option<u32>) -> Issued;

    fn get_all_keys(&self, query: Query, count: Option<u32>) -> Issued;

    fn count(&self, query: Query) -> Issued;

    fn open_cursor(&self, query: Query, direction: CursorDirection) -> Issued;

    fn open_key_cursor(&self, query: Query, direction: CursorDirection) -> Issued;

    fn index(&self, name: &str) -> Result<Rc<dyn RawIndex>, StoreError>;

    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParameters,
    ) -> Result<Rc<dyn RawIndex>, StoreError>;

    fn delete_index(&self, name: &str) -> Result<(), StoreError>;
}

pub trait RawIndex: RawIdentity {
    fn name(&self) -> String;

    fn set_name(&self, name: &str) -> Result<(), StoreError>;

    fn key_path(&self) -> KeyPath;

    fn unique(&self) -> bool;

    fn multi_entry(&self) -> bool;

    fn object_store(&self) -> Rc<dyn RawObjectStore>;

    fn get(&self, query: Query) -> Issued;

    fn get_key(&self, query: Query) -> Issued;

    fn get_all(&self, query: Query, count: Option<u32>) -> Issued;

    fn get_all_keys(&self, query: Query, count: Option<u32>) -> Issued;

    fn count(&self, query: Query) -> Issued;

    fn open_cursor(&self, query: Query, direction: CursorDirection) -> Issued;

    fn open_key_cursor(&self, query: Query, direction: CursorDirection) -> Issued;
}

/// Where a cursor iterates.
#[derive(Clone)]
pub enum CursorSource {
    ObjectStore(Rc<dyn RawObjectStore>),
    Index(Rc<dyn RawIndex>),
}

/// A positioned traversal. Advancing re-fires the request that opened the cursor.
pub trait RawCursor: RawIdentity {
    fn source(&self) -> CursorSource;

    fn direction(&self) -> CursorDirection;

    fn key(&self) -> Option<Key>;

    fn primary_key(&self) -> Option<Key>;

    /// `None` for key-only cursors.
    fn value(&self) -> Option<Value>;

    fn request(&self) -> Rc<dyn RawRequest>;

    fn advance(&self, count: u32) -> Result<(), StoreError>;

    fn continue_(&self, key: Option<Key>) -> Result<(), StoreError>;

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> Result<(), StoreError>;

    fn update(&self, value: Value) -> Issued;

    fn delete(&self) -> Issued;
}

/// One in-flight operation. Dispatches `success` or `error`; open and delete requests
/// additionally dispatch `blocked` and `upgradeneeded`.
pub trait RawRequest: RawIdentity + EventTarget {
    fn ready_state(&self) -> ReadyState;

    /// The result, once `ready_state` is done and no error occurred.
    fn result(&self) -> Result<RawResult, StoreError>;

    fn error(&self) -> Option<StoreError>;

    fn transaction(&self) -> Option<Rc<dyn RawTransaction>>;

    /// A completion the backend already exposes natively. When present the request
    /// adapter awaits it instead of listening for events.
    fn native_completion(&self) -> Option<LocalBoxFuture<'static, Result<RawResult, StoreError>>> {
        None
    }
}

/// What a request produced.
#[derive(Clone, strum::IntoStaticStr)]
pub enum RawResult {
    Undefined,
    Value(Value),
    Key(Key),
    Count(u64),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Cursor(Option<Rc<dyn RawCursor>>),
    Database(Rc<dyn RawDatabase>),
    Databases(Vec<DatabaseInfo>),
}

impl RawResult {
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Debug for RawResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawResult::Value(v) => f.debug_tuple("Value").field(v).finish(),
            RawResult::Key(k) => f.debug_tuple("Key").field(k).finish(),
            RawResult::Count(n) => f.debug_tuple("Count").field(n).finish(),
            RawResult::Values(v) => f.debug_tuple("Values").field(v).finish(),
            RawResult::Keys(k) => f.debug_tuple("Keys").field(k).finish(),
            RawResult::Cursor(c) => f
                .debug_tuple("Cursor")
                .field(&c.as_ref().map(|c| c.handle_id()))
                .finish(),
            RawResult::Database(db) => f.debug_tuple("Database").field(&db.handle_id()).finish(),
            RawResult::Databases(d) => f.debug_tuple("Databases").field(d).finish(),
            RawResult::Undefined => f.write_str("Undefined"),
        }
    }
}

/// Any raw handle, owned.
#[derive(Clone)]
pub enum RawHandle {
    Database(Rc<dyn RawDatabase>),
    Transaction(Rc<dyn RawTransaction>),
    ObjectStore(Rc<dyn RawObjectStore>),
    Index(Rc<dyn RawIndex>),
    Cursor(Rc<dyn RawCursor>),
    Request(Rc<dyn RawRequest>),
}

impl RawHandle {
    pub fn handle_id(&self) -> HandleId {
        match self {
            RawHandle::Database(h) => h.handle_id(),
            RawHandle::Transaction(h) => h.handle_id(),
            RawHandle::ObjectStore(h) => h.handle_id(),
            RawHandle::Index(h) => h.handle_id(),
            RawHandle::Cursor(h) => h.handle_id(),
            RawHandle::Request(h) => h.handle_id(),
        }
    }

    pub fn downgrade(&self) -> WeakRawHandle {
        match self {
            RawHandle::Database(h) => WeakRawHandle::Database(Rc::downgrade(h)),
            RawHandle::Transaction(h) => WeakRawHandle::Transaction(Rc::downgrade(h)),
            RawHandle::ObjectStore(h) => WeakRawHandle::ObjectStore(Rc::downgrade(h)),
            RawHandle::Index(h) => WeakRawHandle::Index(Rc::downgrade(h)),
            RawHandle::Cursor(h) => WeakRawHandle::Cursor(Rc::downgrade(h)),
            RawHandle::Request(h) => WeakRawHandle::Request(Rc::downgrade(h)),
        }
    }

    /// Whether both values refer to the same raw object.
    pub fn same_as(&self, other: &RawHandle) -> bool {
        self.handle_id() == other.handle_id()
    }

    pub fn into_database(self) -> Option<Rc<dyn RawDatabase>> {
        match self {
            RawHandle::Database(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_transaction(self) -> Option<Rc<dyn RawTransaction>> {
        match self {
            RawHandle::Transaction(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_object_store(self) -> Option<Rc<dyn RawObjectStore>> {
        match self {
            RawHandle::ObjectStore(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_index(self) -> Option<Rc<dyn RawIndex>> {
        match self {
            RawHandle::Index(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_cursor(self) -> Option<Rc<dyn RawCursor>> {
        match self {
            RawHandle::Cursor(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_request(self) -> Option<Rc<dyn RawRequest>> {
        match self {
            RawHandle::Request(h) => Some(h),
            _ => None,
        }
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            RawHandle::Database(_) => "Database",
            RawHandle::Transaction(_) => "Transaction",
            RawHandle::ObjectStore(_) => "ObjectStore",
            RawHandle::Index(_) => "Index",
            RawHandle::Cursor(_) => "Cursor",
            RawHandle::Request(_) => "Request",
        };
        write!(f, "{kind}({})", self.handle_id())
    }
}

/// Non-owning counterpart of [`RawHandle`].
#[derive(Clone)]
pub enum WeakRawHandle {
    Database(Weak<dyn RawDatabase>),
    Transaction(Weak<dyn RawTransaction>),
    ObjectStore(Weak<dyn RawObjectStore>),
    Index(Weak<dyn RawIndex>),
    Cursor(Weak<dyn RawCursor>),
    Request(Weak<dyn RawRequest>),
}

impl WeakRawHandle {
    pub fn upgrade(&self) -> Option<RawHandle> {
        Some(match self {
            WeakRawHandle::Database(h) => RawHandle::Database(h.upgrade()?),
            WeakRawHandle::Transaction(h) => RawHandle::Transaction(h.upgrade()?),
            WeakRawHandle::ObjectStore(h) => RawHandle::ObjectStore(h.upgrade()?),
            WeakRawHandle::Index(h) => RawHandle::Index(h.upgrade()?),
            WeakRawHandle::Cursor(h) => RawHandle::Cursor(h.upgrade()?),
            WeakRawHandle::Request(h) => RawHandle::Request(h.upgrade()?),
        })
    }
}
