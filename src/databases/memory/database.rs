use super::data::StoreData;
use super::entry::DatabaseEntry;
use super::listeners::Listeners;
use super::transaction::MemoryTransaction;
use crate::config::{ObjectStoreParameters, TransactionOptions};
use crate::error::{ErrorKind, StoreError};
use crate::traits::{
    Event, EventKind, EventTarget, HandleId, Listener, ListenerId, ListenerOptions, RawDatabase,
    RawIdentity, RawObjectStore, RawTransaction,
};
use crate::types::{KeyPath, TransactionMode};
use log::debug;
use std::cell::Cell;
use std::rc::{Rc, Weak};

/// One open connection to a memory database.
pub(crate) struct MemoryDatabase {
    id: HandleId,
    weak_self: Weak<MemoryDatabase>,
    listeners: Listeners,
    entry: Rc<DatabaseEntry>,
    version: Cell<u64>,
    closed: Cell<bool>,
}

impl MemoryDatabase {
    pub(crate) fn new(entry: Rc<DatabaseEntry>, version: u64) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            id: HandleId::next(),
            weak_self: weak_self.clone(),
            listeners: Listeners::default(),
            entry,
            version: Cell::new(version),
            closed: Cell::new(false),
        })
    }

    pub(crate) fn entry(&self) -> &Rc<DatabaseEntry> {
        &self.entry
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.version.set(version);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        self.listeners.dispatch(event);
    }

    pub(crate) fn close_connection(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!("closed connection {} to {}", self.id, self.entry.name);
        self.entry.remove_connection(self.id);
        self.entry.try_resume();
    }

    // The version change transaction this connection is upgrading with.
    fn upgrade_transaction(&self) -> Result<Rc<MemoryTransaction>, StoreError> {
        let tx = self
            .entry
            .upgrade_transaction()
            .filter(|tx| tx.connection_id() == self.id)
            .ok_or_else(|| {
                StoreError::invalid_state(
                    "The database is not running a version change transaction",
                )
            })?;
        tx.check_active()?;
        Ok(tx)
    }
}

impl RawIdentity for MemoryDatabase {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl EventTarget for MemoryDatabase {
    fn add_event_listener(
        &self,
        kind: EventKind,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerId {
        self.listeners.add(kind, listener, options)
    }

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) {
        self.listeners.remove(kind, id)
    }
}

impl RawDatabase for MemoryDatabase {
    fn name(&self) -> String {
        self.entry.name.clone()
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn object_store_names(&self) -> Vec<String> {
        self.entry
            .data
            .borrow()
            .as_ref()
            .map(|data| data.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn create_object_store(
        &self,
        name: &str,
        params: &ObjectStoreParameters,
    ) -> Result<Rc<dyn RawObjectStore>, StoreError> {
        let tx = self.upgrade_transaction()?;
        let invalid_generator = match &params.key_path {
            Some(KeyPath::Sequence(_)) => true,
            Some(KeyPath::Single(path)) => path.is_empty(),
            None => false,
        };
        if params.auto_increment && invalid_generator {
            return Err(StoreError::new(
                ErrorKind::InvalidAccessError,
                "An auto-increment object store needs a single, non-empty key path",
            ));
        }
        {
            let mut data = self.entry.data.borrow_mut();
            let data = data
                .as_mut()
                .ok_or_else(|| StoreError::invalid_state("The database has been deleted"))?;
            if data.stores.contains_key(name) {
                return Err(StoreError::constraint(format!(
                    "An object store named '{name}' already exists"
                )));
            }
            data.stores.insert(
                name.to_string(),
                StoreData::new(params.key_path.clone(), params.auto_increment),
            );
        }
        debug!("created object store {name} in {}", self.entry.name);
        tx.object_store(name)
    }

    fn delete_object_store(&self, name: &str) -> Result<(), StoreError> {
        let tx = self.upgrade_transaction()?;
        let removed = self
            .entry
            .data
            .borrow_mut()
            .as_mut()
            .and_then(|data| data.stores.remove(name));
        if removed.is_none() {
            return Err(StoreError::not_found(format!("No object store named '{name}'")));
        }
        tx.forget_store(name);
        debug!("deleted object store {name} from {}", self.entry.name);
        Ok(())
    }

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
        options: TransactionOptions,
    ) -> Result<Rc<dyn RawTransaction>, StoreError> {
        if self.closed.get() {
            return Err(StoreError::invalid_state("The connection is closing"));
        }
        if self.entry.upgrade_transaction().is_some() {
            return Err(StoreError::invalid_state(
                "A version change transaction is running",
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(StoreError::new(
                ErrorKind::TypeError,
                "Version change transactions are only created by open",
            ));
        }
        let mut names: Vec<String> = scope.to_vec();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(StoreError::new(
                ErrorKind::InvalidAccessError,
                "The scope of a transaction cannot be empty",
            ));
        }
        let known = self.object_store_names();
        if let Some(missing) = names.iter().find(|name| !known.contains(name)) {
            return Err(StoreError::not_found(format!("No object store named '{missing}'")));
        }
        let Some(connection) = self.weak_self.upgrade() else {
            return Err(StoreError::invalid_state("The connection is closing"));
        };
        let tx = MemoryTransaction::new(connection, names, mode, options.durability);
        self.entry.schedule();
        Ok(tx)
    }

    fn close(&self) {
        self.close_connection();
    }
}
