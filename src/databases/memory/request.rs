use super::cursor::MemoryCursor;
use super::listeners::Listeners;
use super::transaction::MemoryTransaction;
use crate::error::StoreError;
use crate::traits::{
    Event, EventKind, EventTarget, HandleId, Listener, ListenerId, ListenerOptions, RawCursor,
    RawIdentity, RawRequest, RawResult, RawTransaction,
};
use crate::types::ReadyState;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// What an executed operation produced.
pub(crate) enum Produced {
    Result(RawResult),
    /// The cursor is owned by its transaction; the request only points at it.
    Cursor(Weak<MemoryCursor>),
}

enum Settled {
    Pending,
    Success(Produced),
    Failed(StoreError),
}

pub(crate) struct MemoryRequest {
    id: HandleId,
    listeners: Listeners,
    settled: RefCell<Settled>,
    transaction: RefCell<Option<Rc<MemoryTransaction>>>,
}

impl MemoryRequest {
    pub(crate) fn new(transaction: Option<Rc<MemoryTransaction>>) -> Rc<Self> {
        Rc::new(Self {
            id: HandleId::next(),
            listeners: Listeners::default(),
            settled: RefCell::new(Settled::Pending),
            transaction: RefCell::new(transaction),
        })
    }

    /// Back to pending, for a cursor that is about to move again.
    pub(crate) fn reset(&self) {
        *self.settled.borrow_mut() = Settled::Pending;
    }

    pub(crate) fn succeed(&self, produced: Produced) {
        *self.settled.borrow_mut() = Settled::Success(produced);
    }

    pub(crate) fn fail(&self, error: StoreError) {
        *self.settled.borrow_mut() = Settled::Failed(error);
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        self.listeners.dispatch(event);
    }

    pub(crate) fn set_transaction(&self, transaction: Option<Rc<MemoryTransaction>>) {
        let previous = self.transaction.replace(transaction);
        drop(previous);
    }
}

impl RawIdentity for MemoryRequest {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl EventTarget for MemoryRequest {
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

impl RawRequest for MemoryRequest {
    fn ready_state(&self) -> ReadyState {
        match *self.settled.borrow() {
            Settled::Pending => ReadyState::Pending,
            _ => ReadyState::Done,
        }
    }

    fn result(&self) -> Result<RawResult, StoreError> {
        match &*self.settled.borrow() {
            Settled::Pending => Err(StoreError::invalid_state("The request has not finished")),
            Settled::Success(Produced::Result(result)) => Ok(result.clone()),
            Settled::Success(Produced::Cursor(cursor)) => Ok(RawResult::Cursor(
                cursor.upgrade().map(|cursor| cursor as Rc<dyn RawCursor>),
            )),
            Settled::Failed(error) => Err(error.clone()),
        }
    }

    fn error(&self) -> Option<StoreError> {
        match &*self.settled.borrow() {
            Settled::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    fn transaction(&self) -> Option<Rc<dyn RawTransaction>> {
        self.transaction
            .borrow()
            .clone()
            .map(|tx| tx as Rc<dyn RawTransaction>)
    }
}
