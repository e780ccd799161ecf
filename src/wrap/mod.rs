//! The interception layer.
//!
//! Every raw handle that crosses into caller code is converted by [`Wrap`]: resource handles
//! become façades from [`crate::handles`], requests become futures or streams, and plain data
//! passes through untouched. [`Unwrap`] goes the other way and is how rebound methods find the
//! raw receiver to call.
//!
//! Wrapping is idempotent. Wrapping the same raw handle twice while the first façade is alive
//! yields the same façade, and wrapping a façade yields the façade itself.

pub mod completion;
pub mod cursor;
pub mod identity;
pub mod rebind;
pub mod request;
pub(crate) mod subscription;

pub use completion::TransactionDone;
pub use cursor::{CursorState, CursorStream};
pub use identity::{IdentityCache, WrapperId};
pub use rebind::{Operation, Rebound, ReceiverKind};
pub use request::{FromRawResult, Pending, RequestFuture};

use crate::handles::{Cursor, Database, Index, ObjectStore, Transaction};
use crate::traits::{
    DatabaseInfo, HandleId, RawCursor, RawDatabase, RawHandle, RawIdentity, RawIndex,
    RawObjectStore, RawRequest, RawTransaction,
};
use crate::types::{Key, Value};
use log::trace;
use std::any::Any;
use std::rc::Rc;

/// Shared inner state of a façade.
pub(crate) struct Wrapped<R: ?Sized, S = ()> {
    pub(crate) id: WrapperId,
    handle: HandleId,
    pub(crate) raw: Rc<R>,
    pub(crate) state: S,
}

impl<R: ?Sized, S> Wrapped<R, S> {
    /// The raw handle this façade stands for, looked up through the identity cache.
    pub(crate) fn resolve(&self, pick: fn(RawHandle) -> Option<Rc<R>>) -> Rc<R> {
        IdentityCache::with(|cache| cache.raw_for(self.id))
            .and_then(pick)
            .unwrap_or_else(|| self.raw.clone())
    }
}

impl<R: ?Sized, S> Drop for Wrapped<R, S> {
    fn drop(&mut self) {
        IdentityCache::evict_quietly(self.handle, self.id);
    }
}

/// Find the live façade inner for `raw`, or build and record a new one.
pub(crate) fn wrap_raw<R, S>(
    raw: Rc<R>,
    as_handle: fn(Rc<R>) -> RawHandle,
    init: impl FnOnce(&Rc<R>) -> S,
) -> Rc<Wrapped<R, S>>
where
    R: ?Sized + RawIdentity + 'static,
    S: 'static,
{
    let handle = raw.handle_id();
    if let Some(existing) = IdentityCache::with(|cache| cache.wrapped_for::<Wrapped<R, S>>(handle))
    {
        return existing;
    }

    let state = init(&raw);
    let wrapped = Rc::new(Wrapped {
        id: WrapperId::next(),
        handle,
        raw: raw.clone(),
        state,
    });
    let erased: Rc<dyn Any> = wrapped.clone();
    let raw_handle = as_handle(raw);
    IdentityCache::with(|cache| cache.associate(&raw_handle, wrapped.id, Rc::downgrade(&erased)));
    trace!("wrapped {raw_handle:?} as {}", wrapped.id);
    wrapped
}

/// Conversion of a store value into the form handed to callers.
pub trait Wrap {
    type Output;

    fn wrap(self) -> Self::Output;
}

/// Recovery of the raw handle behind a wrapped value.
pub trait Unwrap {
    type Raw: ?Sized;

    fn unwrap_raw(&self) -> Rc<Self::Raw>;
}

/// Wrap any store value.
pub fn wrap<T: Wrap>(value: T) -> T::Output {
    value.wrap()
}

/// The raw handle behind `value`. Raw handles are returned unchanged.
pub fn unwrap<T: Unwrap + ?Sized>(value: &T) -> Rc<T::Raw> {
    value.unwrap_raw()
}

impl<R: ?Sized> Unwrap for Rc<R> {
    type Raw = R;

    fn unwrap_raw(&self) -> Rc<R> {
        self.clone()
    }
}

macro_rules! wrap_resource {
    ($($raw:ident => $facade:ident),* $(,)?) => {
        $(
            impl Wrap for Rc<dyn $raw> {
                type Output = $facade;

                fn wrap(self) -> $facade {
                    $facade::from_raw(self)
                }
            }

            impl Wrap for $facade {
                type Output = $facade;

                fn wrap(self) -> $facade {
                    self
                }
            }
        )*
    };
}

wrap_resource!(
    RawDatabase => Database,
    RawTransaction => Transaction,
    RawObjectStore => ObjectStore,
    RawIndex => Index,
    RawCursor => Cursor,
);

impl Wrap for Rc<dyn RawRequest> {
    type Output = Pending;

    fn wrap(self) -> Pending {
        Pending::from_request(self)
    }
}

impl Wrap for Pending {
    type Output = Pending;

    fn wrap(self) -> Pending {
        self
    }
}

macro_rules! pass_through {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Wrap for $ty {
                type Output = $ty;

                fn wrap(self) -> $ty {
                    self
                }
            }
        )*
    };
}

pass_through!(Value, Key, DatabaseInfo, String, bool, u32, u64);

impl<T: Wrap> Wrap for Option<T> {
    type Output = Option<T::Output>;

    fn wrap(self) -> Self::Output {
        self.map(Wrap::wrap)
    }
}

impl<T: Wrap> Wrap for Vec<T> {
    type Output = Vec<T::Output>;

    fn wrap(self) -> Self::Output {
        self.into_iter().map(Wrap::wrap).collect()
    }
}

/// Any wrapped handle.
#[derive(Debug)]
pub enum Handle {
    Database(Database),
    Transaction(Transaction),
    ObjectStore(ObjectStore),
    Index(Index),
    Cursor(Cursor),
    Request(Pending),
}

impl Wrap for RawHandle {
    type Output = Handle;

    fn wrap(self) -> Handle {
        match self {
            RawHandle::Database(h) => Handle::Database(h.wrap()),
            RawHandle::Transaction(h) => Handle::Transaction(h.wrap()),
            RawHandle::ObjectStore(h) => Handle::ObjectStore(h.wrap()),
            RawHandle::Index(h) => Handle::Index(h.wrap()),
            RawHandle::Cursor(h) => Handle::Cursor(h.wrap()),
            RawHandle::Request(h) => Handle::Request(h.wrap()),
        }
    }
}

impl Handle {
    /// The raw handle behind this one. Requests are never cached, so they map to themselves;
    /// a request that failed to issue has none.
    pub fn to_raw(&self) -> Option<RawHandle> {
        Some(match self {
            Handle::Database(h) => RawHandle::Database(h.unwrap_raw()),
            Handle::Transaction(h) => RawHandle::Transaction(h.unwrap_raw()),
            Handle::ObjectStore(h) => RawHandle::ObjectStore(h.unwrap_raw()),
            Handle::Index(h) => RawHandle::Index(h.unwrap_raw()),
            Handle::Cursor(h) => RawHandle::Cursor(h.unwrap_raw()),
            Handle::Request(h) => RawHandle::Request(h.request()?),
        })
    }
}
