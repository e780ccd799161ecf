use super::{ObjectStore, Transaction};
use crate::config::{ObjectStoreParameters, TransactionOptions};
use crate::error::NetabaseResult;
use crate::traits::{EventKind, ListenerId, ListenerOptions, RawDatabase, RawHandle, VersionChange};
use crate::types::TransactionMode;
use crate::wrap::{wrap_raw, Unwrap, Wrap, Wrapped};
use log::debug;
use std::rc::Rc;

/// An open connection.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Rc<Wrapped<dyn RawDatabase>>,
}

facade_identity!(Database, RawDatabase, RawHandle::into_database);

impl Database {
    pub(crate) fn from_raw(raw: Rc<dyn RawDatabase>) -> Self {
        Self {
            inner: wrap_raw(raw, RawHandle::Database, |_| ()),
        }
    }

    pub fn name(&self) -> String {
        self.unwrap_raw().name()
    }

    pub fn version(&self) -> u64 {
        self.unwrap_raw().version()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.unwrap_raw().object_store_names()
    }

    pub fn contains_object_store(&self, name: &str) -> bool {
        self.object_store_names().iter().any(|n| n == name)
    }

    /// Only valid inside an upgrade transaction.
    pub fn create_object_store(
        &self,
        name: &str,
        params: ObjectStoreParameters,
    ) -> NetabaseResult<ObjectStore> {
        debug!("creating object store {name}");
        Ok(self.unwrap_raw().create_object_store(name, &params)?.wrap())
    }

    /// Only valid inside an upgrade transaction.
    pub fn delete_object_store(&self, name: &str) -> NetabaseResult<()> {
        debug!("deleting object store {name}");
        Ok(self.unwrap_raw().delete_object_store(name)?)
    }

    /// Start a transaction over `scope`.
    pub fn transaction<I, S>(&self, scope: I, mode: TransactionMode) -> NetabaseResult<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transaction_with_options(scope, mode, TransactionOptions::default())
    }

    pub fn transaction_with_options<I, S>(
        &self,
        scope: I,
        mode: TransactionMode,
        options: TransactionOptions,
    ) -> NetabaseResult<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope: Vec<String> = scope.into_iter().map(Into::into).collect();
        Ok(self.unwrap_raw().transaction(&scope, mode, options)?.wrap())
    }

    /// Call `handler` whenever another connection wants to upgrade or delete this database.
    ///
    /// Handlers usually close the connection so the other side is not blocked.
    pub fn on_version_change(
        &self,
        mut handler: impl FnMut(VersionChange) + 'static,
    ) -> ListenerId {
        self.unwrap_raw().add_event_listener(
            EventKind::VersionChange,
            Box::new(move |event| {
                if let Some(change) = event.version_change {
                    handler(change);
                }
            }),
            ListenerOptions::PERSISTENT,
        )
    }

    /// Call `handler` when the store closes the connection without being asked to.
    pub fn on_close(&self, mut handler: impl FnMut() + 'static) -> ListenerId {
        self.unwrap_raw().add_event_listener(
            EventKind::Close,
            Box::new(move |_| handler()),
            ListenerOptions::ONCE,
        )
    }

    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) {
        self.unwrap_raw().remove_event_listener(kind, id);
    }

    pub fn close(&self) {
        debug!("closing {}", self.name());
        self.unwrap_raw().close();
    }
}
