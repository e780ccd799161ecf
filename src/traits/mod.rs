//! Traits describing the underlying store.

pub mod backend;
pub mod events;

pub use backend::{
    CursorSource, DatabaseInfo, HandleId, Issued, RawCursor, RawDatabase, RawFactory, RawHandle,
    RawIdentity, RawIndex, RawObjectStore, RawRequest, RawResult, RawTransaction, WeakRawHandle,
};
pub use events::{
    Event, EventKind, EventTarget, Listener, ListenerId, ListenerOptions, VersionChange,
};
