//! # Netabase IDB
//!
//! Futures and streams over an event-driven, transactional key-value store such as the
//! browser's IndexedDB.
//!
//! The underlying store reports every outcome through events on request and transaction
//! objects. This crate wraps those objects so callers can `await` requests, iterate cursors as
//! [`Stream`](futures::Stream)s and await a transaction's commit, without losing the store's own
//! transaction lifetime rules.
//!
//! ## Features
//!
//! - **Futures for requests**: every request-issuing method returns a [`RequestFuture`] that
//!   resolves with the request's typed result or rejects with the store's own error
//! - **Cursor streams**: [`CursorStream`] yields one [`Cursor`] per position and advances the
//!   cursor for you unless you moved it yourself
//! - **Transaction completion**: [`Transaction::done`] resolves on commit and rejects on abort
//! - **Stable identity**: wrapping the same store object twice yields the same façade
//! - **Migrations**: [`open_database`] runs versioned migrations inside the upgrade transaction
//! - **Backends**: an in-memory reference store (feature `memory`) and the browser's IndexedDB
//!   (feature `wasm`, `wasm32` only)
//!
//! ## Quick Start
//!
//! ```
//! use netabase_idb::prelude::*;
//!
//! let factory = MemoryFactory::new();
//! let migrations = vec![Migration::new(|tx| {
//!     tx.db().create_object_store(
//!         "books",
//!         ObjectStoreParameters::builder().key_path("isbn").build(),
//!     )?;
//!     Ok(())
//! })];
//!
//! let db = factory
//!     .run_until(open_database(&factory, "library", migrations, None))
//!     .unwrap()
//!     .unwrap();
//!
//! let tx = db.transaction(["books"], TransactionMode::ReadWrite).unwrap();
//! let books = tx.object_store("books").unwrap();
//! let stored = factory.run_until(async move {
//!     let dune = Value::object([
//!         ("isbn", Value::from("0-441-17271-7")),
//!         ("title", Value::from("Dune")),
//!     ]);
//!     books.put(dune).await?;
//!     tx.done().await?;
//!     Ok::<_, NetabaseError>(())
//! });
//! assert!(stored.unwrap().is_ok());
//! ```

pub mod config;
pub mod databases;
pub mod error;
pub mod handles;
pub mod open;
pub mod prelude;
pub mod traits;
pub mod types;
pub mod wrap;

pub use error::{NetabaseError, NetabaseResult, StoreError};
pub use handles::{Cursor, Database, Index, ObjectStore, Transaction};
pub use open::{delete_database, open_database};
pub use wrap::{CursorStream, RequestFuture};
