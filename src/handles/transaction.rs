use super::{Database, ObjectStore};
use crate::error::{NetabaseResult, StoreError};
use crate::traits::{RawHandle, RawTransaction};
use crate::types::{Durability, TransactionMode};
use crate::wrap::completion::TransactionOutcome;
use crate::wrap::{wrap_raw, TransactionDone, Unwrap, Wrap, Wrapped};
use log::debug;
use std::rc::Rc;

/// A transaction over a fixed set of object stores.
///
/// Besides the members of the raw transaction, every transaction carries its completion:
/// [`Transaction::done`] resolves once it commits and fails once it aborts.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Rc<Wrapped<dyn RawTransaction, Rc<TransactionOutcome>>>,
}

facade_identity!(Transaction, RawTransaction, RawHandle::into_transaction);

impl Transaction {
    pub(crate) fn from_raw(raw: Rc<dyn RawTransaction>) -> Self {
        Self {
            inner: wrap_raw(raw, RawHandle::Transaction, TransactionOutcome::attach),
        }
    }

    pub(crate) fn outcome(&self) -> &Rc<TransactionOutcome> {
        &self.inner.state
    }

    pub fn mode(&self) -> TransactionMode {
        self.unwrap_raw().mode()
    }

    pub fn durability(&self) -> Durability {
        self.unwrap_raw().durability()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.unwrap_raw().object_store_names()
    }

    pub fn contains_object_store(&self, name: &str) -> bool {
        self.object_store_names().iter().any(|n| n == name)
    }

    /// The connection this transaction belongs to.
    pub fn db(&self) -> Database {
        self.unwrap_raw().db().wrap()
    }

    /// Why the transaction aborted, once it has.
    pub fn error(&self) -> Option<StoreError> {
        self.unwrap_raw().error()
    }

    pub fn object_store(&self, name: &str) -> NetabaseResult<ObjectStore> {
        Ok(self.unwrap_raw().object_store(name)?.wrap())
    }

    /// Commit without waiting for outstanding requests to be issued.
    pub fn commit(&self) -> NetabaseResult<()> {
        debug!("committing {:?}", self);
        Ok(self.unwrap_raw().commit()?)
    }

    pub fn abort(&self) -> NetabaseResult<()> {
        debug!("aborting {:?}", self);
        Ok(self.unwrap_raw().abort()?)
    }

    /// Completion of this transaction.
    ///
    /// Resolves only after every request issued through this crate against the transaction
    /// has settled. Aborts fail with [`crate::error::NetabaseError::TransactionAborted`]
    /// carrying the transaction's error.
    pub fn done(&self) -> TransactionDone {
        TransactionDone::new(self.clone())
    }
}
