//! Rebinding of store methods onto their raw receivers.
//!
//! A [`Rebound`] pairs an [`Operation`] with the raw method that implements it. Calling it
//! against a façade unwraps the façade to the raw handle the store expects as receiver, invokes
//! the raw method and wraps the request that comes back. Operations that open cursors tag their
//! request so the interception layer turns it into a stream rather than a single future.

use super::request::Pending;
use super::{Unwrap, Wrap};
use crate::traits::{HandleId, Issued};
use log::trace;
use std::cell::RefCell;
use std::collections::HashSet;
use strum::{AsRefStr, Display, EnumIter};

thread_local! {
    static CURSOR_REQUESTS: RefCell<HashSet<HandleId>> = RefCell::new(HashSet::new());
}

/// The kind of handle an operation is invoked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum ReceiverKind {
    Factory,
    ObjectStore,
    Index,
    Cursor,
}

/// Store methods that produce a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum Operation {
    Open,
    DeleteDatabase,
    Databases,
    Add,
    Put,
    Delete,
    Clear,
    Get,
    GetKey,
    GetAll,
    GetAllKeys,
    Count,
    OpenCursor,
    OpenKeyCursor,
    Update,
}

/// Operations whose request result is a cursor that keeps re-firing.
const CURSOR_OPENERS: [(ReceiverKind, Operation); 4] = [
    (ReceiverKind::ObjectStore, Operation::OpenCursor),
    (ReceiverKind::ObjectStore, Operation::OpenKeyCursor),
    (ReceiverKind::Index, Operation::OpenCursor),
    (ReceiverKind::Index, Operation::OpenKeyCursor),
];

/// A raw method bound to the operation it implements.
pub struct Rebound<R: ?Sized, A> {
    receiver: ReceiverKind,
    operation: Operation,
    method: fn(&R, A) -> Issued,
}

impl<R: ?Sized, A> Rebound<R, A> {
    pub const fn new(
        receiver: ReceiverKind,
        operation: Operation,
        method: fn(&R, A) -> Issued,
    ) -> Self {
        Self {
            receiver,
            operation,
            method,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn opens_cursor(&self) -> bool {
        CURSOR_OPENERS.contains(&(self.receiver, self.operation))
    }

    /// Invoke the raw method on the handle behind `target` and wrap the request it issues.
    ///
    /// A synchronous failure is not raised here; it comes back as an already-rejected
    /// [`Pending`].
    pub fn call<W>(&self, target: &W, args: A) -> Pending
    where
        W: Unwrap<Raw = R> + ?Sized,
    {
        let raw = target.unwrap_raw();
        trace!("{}.{}", self.receiver, self.operation);
        match (self.method)(&*raw, args) {
            Ok(request) => {
                if self.opens_cursor() {
                    mark_cursor_request(request.handle_id());
                }
                request.wrap()
            }
            Err(error) => Pending::Failed(error),
        }
    }
}

fn mark_cursor_request(request: HandleId) {
    CURSOR_REQUESTS.with(|marked| marked.borrow_mut().insert(request));
}

/// Whether `request` was issued by a cursor-opening operation. Clears the mark.
pub(crate) fn take_cursor_mark(request: HandleId) -> bool {
    CURSOR_REQUESTS.with(|marked| marked.borrow_mut().remove(&request))
}
