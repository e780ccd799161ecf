//! An in-memory, event-driven store.
//!
//! Everything runs on one [`EventLoop`] owned by the factory. Nothing happens until the loop is
//! driven, which is what [`MemoryFactory::run_until`] does: it polls a future and runs queued
//! store tasks until the future resolves.
//!
//! ```
//! use netabase_idb::databases::memory::MemoryFactory;
//! use netabase_idb::open::{open_database, Migration};
//! use netabase_idb::config::ObjectStoreParameters;
//!
//! let factory = MemoryFactory::new();
//! let migrations = vec![Migration::new(|tx| {
//!     tx.db().create_object_store("books", ObjectStoreParameters::default())?;
//!     Ok(())
//! })];
//! let db = factory
//!     .run_until(open_database(&factory, "library", migrations, None))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(db.version(), 1);
//! ```

mod cursor;
mod data;
mod database;
mod entry;
mod event_loop;
mod index;
mod listeners;
mod object_store;
mod request;
mod transaction;

use crate::config::MemoryConfig;
use crate::error::{ErrorKind, NetabaseResult, StoreError};
use crate::traits::{DatabaseInfo, Event, EventKind, Issued, RawFactory, RawRequest, RawResult};
use data::DatabaseData;
use entry::DatabaseEntry;
use event_loop::EventLoop;
use log::{debug, info};
use request::{MemoryRequest, Produced};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::rc::Rc;

/// Entry point of the memory store.
pub struct MemoryFactory {
    tasks: Rc<EventLoop>,
    config: MemoryConfig,
    entries: RefCell<BTreeMap<String, Rc<DatabaseEntry>>>,
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            tasks: Rc::new(EventLoop::default()),
            config,
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn entry(&self, name: &str) -> Rc<DatabaseEntry> {
        self.entries
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| DatabaseEntry::new(name, self.tasks.clone(), None))
            .clone()
    }

    /// Drive the store until `future` resolves.
    ///
    /// Fails with [`NetabaseError::Stalled`](crate::error::NetabaseError::Stalled) when no
    /// queued task is left to make progress, or when the configured task budget runs out.
    pub fn run_until<F: Future>(&self, future: F) -> NetabaseResult<F::Output> {
        self.tasks.run_until(future, self.config.task_budget)
    }

    /// Run every queued task, including the ones they queue in turn.
    pub fn drain(&self) {
        self.tasks.drain();
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending_tasks()
    }

    pub fn tasks_run(&self) -> u64 {
        self.tasks.tasks_run()
    }

    fn contents(&self) -> BTreeMap<String, DatabaseData> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|(name, entry)| {
                entry
                    .data
                    .borrow()
                    .as_ref()
                    .map(|data| (name.clone(), data.clone()))
            })
            .collect()
    }

    /// Encode every database into a byte snapshot.
    ///
    /// Writes of transactions still running are included as they stand.
    pub fn snapshot(&self) -> NetabaseResult<Vec<u8>> {
        let contents = self.contents();
        let bytes = bincode::serde::encode_to_vec(&contents, bincode::config::standard())?;
        debug!("snapshot of {} databases, {} bytes", contents.len(), bytes.len());
        Ok(bytes)
    }

    /// Replace every database with the contents of `bytes`.
    ///
    /// Refused while any connection is open.
    pub fn restore(&self, bytes: &[u8]) -> NetabaseResult<()> {
        if self
            .entries
            .borrow()
            .values()
            .any(|entry| !entry.open_connections().is_empty())
        {
            return Err(
                StoreError::invalid_state("Cannot restore while connections are open").into(),
            );
        }
        let (contents, _): (BTreeMap<String, DatabaseData>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        debug!("restoring {} databases", contents.len());
        let entries = contents
            .into_iter()
            .map(|(name, data)| {
                let entry = DatabaseEntry::new(&name, self.tasks.clone(), Some(data));
                (name, entry)
            })
            .collect();
        *self.entries.borrow_mut() = entries;
        Ok(())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> NetabaseResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.snapshot()?)?;
        info!("saved memory store to {}", path.display());
        Ok(())
    }

    pub fn load_from(path: impl AsRef<Path>) -> NetabaseResult<Self> {
        Self::load_with_config(path, MemoryConfig::default())
    }

    pub fn load_with_config(path: impl AsRef<Path>, config: MemoryConfig) -> NetabaseResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let factory = Self::with_config(config);
        factory.restore(&bytes)?;
        info!("loaded memory store from {}", path.display());
        Ok(factory)
    }

    /// Close every connection to `name` as if the store went away, firing `close` on each.
    pub fn force_close(&self, name: &str) {
        let entry = self.entries.borrow().get(name).cloned();
        if let Some(entry) = entry {
            entry.force_close();
        }
    }
}

impl RawFactory for MemoryFactory {
    fn open(&self, name: &str, version: Option<u64>) -> Issued {
        if version == Some(0) {
            return Err(StoreError::new(
                ErrorKind::TypeError,
                "The version must be at least 1",
            ));
        }
        let request = MemoryRequest::new(None);
        self.entry(name).enqueue_open(request.clone(), version);
        Ok(request)
    }

    fn delete_database(&self, name: &str) -> Issued {
        let request = MemoryRequest::new(None);
        self.entry(name).enqueue_delete(request.clone());
        Ok(request)
    }

    fn databases(&self) -> Issued {
        let request = MemoryRequest::new(None);
        let entries: Vec<Rc<DatabaseEntry>> = self.entries.borrow().values().cloned().collect();
        let settled = request.clone();
        // Listed when the task runs, after open and delete requests queued before it.
        self.tasks.queue(move || {
            let infos = entries
                .iter()
                .filter_map(|entry| {
                    entry.version().map(|version| DatabaseInfo {
                        name: entry.name.clone(),
                        version,
                    })
                })
                .collect();
            settled.succeed(Produced::Result(RawResult::Databases(infos)));
            settled.dispatch(&Event::new(EventKind::Success));
        });
        let request: Rc<dyn RawRequest> = request;
        Ok(request)
    }
}

impl std::fmt::Debug for MemoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFactory")
            .field("databases", &self.entries.borrow().keys().collect::<Vec<_>>())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

impl From<MemoryConfig> for MemoryFactory {
    fn from(config: MemoryConfig) -> Self {
        Self::with_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectStoreParameters;
    use crate::error::NetabaseError;
    use crate::open::{databases, delete_database, open_database, Migration};
    use crate::types::{TransactionMode, Value};
    use tempfile::TempDir;

    fn books() -> Vec<Migration> {
        vec![Migration::new(|tx| {
            tx.db().create_object_store(
                "books",
                ObjectStoreParameters::builder().key_path("id").build(),
            )?;
            Ok(())
        })]
    }

    fn seeded(factory: &MemoryFactory) {
        let db = factory
            .run_until(open_database(factory, "library", books(), None))
            .unwrap()
            .unwrap();
        let tx = db.transaction(["books"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("books").unwrap();
        let _ = store.put(Value::object([("id", Value::from(1)), ("title", Value::from("Dune"))]));
        factory.run_until(tx.done()).unwrap().unwrap();
        db.close();
    }

    #[test]
    fn test_open_with_version_zero_fails_synchronously() {
        let factory = MemoryFactory::new();
        let err = factory.open("library", Some(0)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_databases_lists_created_databases() {
        let factory = MemoryFactory::new();
        seeded(&factory);
        let listed = factory.run_until(databases(&factory)).unwrap().unwrap();
        assert_eq!(
            listed,
            vec![DatabaseInfo {
                name: "library".to_string(),
                version: 1
            }]
        );

        factory
            .run_until(delete_database(&factory, "library", None))
            .unwrap()
            .unwrap();
        let listed = factory.run_until(databases(&factory)).unwrap().unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_snapshot_round_trips_through_a_file() {
        let factory = MemoryFactory::new();
        seeded(&factory);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");
        factory.save_to(&path).unwrap();

        let loaded = MemoryFactory::load_from(&path).unwrap();
        let db = loaded
            .run_until(open_database(&loaded, "library", books(), None))
            .unwrap()
            .unwrap();
        let tx = db.transaction(["books"], TransactionMode::ReadOnly).unwrap();
        let title = loaded
            .run_until(tx.object_store("books").unwrap().get(1))
            .unwrap()
            .unwrap()
            .and_then(|book| book.get("title").cloned());
        assert_eq!(title, Some(Value::from("Dune")));
    }

    #[test]
    fn test_restore_refused_with_open_connections() {
        let factory = MemoryFactory::new();
        let _db = factory
            .run_until(open_database(&factory, "library", books(), None))
            .unwrap()
            .unwrap();
        let snapshot = factory.snapshot().unwrap();
        let err = factory.restore(&snapshot).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidStateError));
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let factory = MemoryFactory::new();
        assert!(matches!(
            factory.restore(&[0xff, 0xff, 0xff]),
            Err(NetabaseError::Snapshot(_))
        ));
    }

    #[test]
    fn test_run_until_reports_stall() {
        let factory = MemoryFactory::new();
        let never = futures::future::pending::<()>();
        assert!(matches!(factory.run_until(never), Err(NetabaseError::Stalled)));
    }
}
