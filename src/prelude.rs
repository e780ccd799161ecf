//! Prelude module for convenient imports.
//!
//! ```
//! use netabase_idb::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - Façades: [`Database`], [`Transaction`], [`ObjectStore`], [`Index`], [`Cursor`]
//! - Futures and streams: [`RequestFuture`], [`CursorStream`], [`TransactionDone`]
//! - Entry points: [`open_database`], [`delete_database`], [`Migration`], [`OpenOptions`]
//! - Data: [`Key`], [`KeyRange`], [`Query`], [`Value`], [`KeyPath`] and the mode enums
//! - Configuration builders and the error types
//! - [`MemoryFactory`] when the `memory` feature is on
//!
//! Raw store traits stay in [`crate::traits`]; import them when implementing a backend.

pub use crate::config::{IndexParameters, MemoryConfig, ObjectStoreParameters, TransactionOptions};
pub use crate::error::{ErrorKind, NetabaseError, NetabaseResult, StoreError};
pub use crate::handles::{Cursor, CursorSourceHandle, Database, Index, ObjectStore, Transaction};
pub use crate::open::{databases, delete_database, open_database, Migration, OpenOptions};
pub use crate::traits::{DatabaseInfo, VersionChange};
pub use crate::types::{
    CursorDirection, Durability, Key, KeyPath, KeyRange, Query, ReadyState, TransactionMode, Value,
};
pub use crate::wrap::{CursorStream, RequestFuture, TransactionDone};

#[cfg(feature = "memory")]
pub use crate::databases::memory::MemoryFactory;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub use crate::databases::indexeddb::WebFactory;

pub use futures::{StreamExt, TryStreamExt};
