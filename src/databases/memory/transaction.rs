//! Transaction lifecycle for the memory backend.
//!
//! A transaction waits until no earlier unfinished transaction overlaps its scope, then runs its
//! requests one task at a time. It is active while it is being created and while one of its
//! requests dispatches; once it is inactive with nothing left to run it commits. Writes go
//! straight into the database, and the stores it may touch are copied when it starts so an abort
//! can put them back.

use super::cursor::MemoryCursor;
use super::data::{DatabaseData, StoreData};
use super::database::MemoryDatabase;
use super::entry::DatabaseEntry;
use super::event_loop::EventLoop;
use super::listeners::Listeners;
use super::object_store::MemoryObjectStore;
use super::request::{MemoryRequest, Produced};
use crate::error::{ErrorKind, StoreError};
use crate::traits::{
    Event, EventKind, EventTarget, HandleId, Listener, ListenerId, ListenerOptions, RawDatabase,
    RawIdentity, RawObjectStore, RawTransaction,
};
use crate::types::{Durability, TransactionMode};
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};

pub(crate) type Operation = Box<dyn FnOnce(&mut DatabaseData) -> Result<Produced, StoreError>>;

type FinishHook = Box<dyn FnOnce(bool)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Waiting,
    Running,
    Committing,
    Finished,
}

#[derive(Default)]
enum Snapshot {
    #[default]
    None,
    Stores(BTreeMap<String, StoreData>),
    Database(DatabaseData),
}

pub(crate) struct MemoryTransaction {
    id: HandleId,
    weak_self: Weak<MemoryTransaction>,
    listeners: Listeners,
    connection: Rc<MemoryDatabase>,
    mode: TransactionMode,
    durability: Durability,
    scope: Vec<String>,
    phase: Cell<Phase>,
    active: Cell<bool>,
    commit_requested: Cell<bool>,
    error: RefCell<Option<StoreError>>,
    requests: RefCell<VecDeque<(Rc<MemoryRequest>, Operation)>>,
    snapshot: RefCell<Snapshot>,
    stores: RefCell<HashMap<String, Rc<MemoryObjectStore>>>,
    cursors: RefCell<Vec<Rc<MemoryCursor>>>,
    on_finish: RefCell<Option<FinishHook>>,
}

impl MemoryTransaction {
    /// A new transaction, active until the current task ends. The caller schedules it.
    pub(crate) fn new(
        connection: Rc<MemoryDatabase>,
        scope: Vec<String>,
        mode: TransactionMode,
        durability: Durability,
    ) -> Rc<Self> {
        let tx = Rc::new_cyclic(|weak_self| Self {
            id: HandleId::next(),
            weak_self: weak_self.clone(),
            listeners: Listeners::default(),
            connection,
            mode,
            durability,
            scope,
            phase: Cell::new(Phase::Waiting),
            active: Cell::new(true),
            commit_requested: Cell::new(false),
            error: RefCell::new(None),
            requests: RefCell::new(VecDeque::new()),
            snapshot: RefCell::new(Snapshot::None),
            stores: RefCell::new(HashMap::new()),
            cursors: RefCell::new(Vec::new()),
            on_finish: RefCell::new(None),
        });
        debug!("created {} transaction {} over {:?}", tx.mode, tx.id, tx.scope);
        tx.entry().link(tx.clone());
        tx.deactivate_later();
        tx
    }

    pub(crate) fn entry(&self) -> &Rc<DatabaseEntry> {
        self.connection.entry()
    }

    fn tasks(&self) -> &Rc<EventLoop> {
        &self.entry().tasks
    }

    fn me(&self) -> Option<Rc<Self>> {
        self.weak_self.upgrade()
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn is_upgrade(&self) -> bool {
        self.mode == TransactionMode::VersionChange
    }

    pub(crate) fn connection_id(&self) -> HandleId {
        self.connection.handle_id()
    }

    pub(crate) fn set_on_finish(&self, hook: FinishHook) {
        *self.on_finish.borrow_mut() = Some(hook);
    }

    /// Whether the two transactions may not run side by side.
    pub(crate) fn conflicts_with(&self, other: &MemoryTransaction) -> bool {
        if self.mode == TransactionMode::VersionChange
            || other.mode == TransactionMode::VersionChange
        {
            return true;
        }
        if !self.mode.is_writable() && !other.mode.is_writable() {
            return false;
        }
        self.scope.iter().any(|name| other.scope.contains(name))
    }

    pub(crate) fn check_active(&self) -> Result<(), StoreError> {
        if self.phase.get() == Phase::Finished || !self.active.get() {
            return Err(StoreError::inactive());
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> Result<(), StoreError> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StoreError::read_only())
        }
    }

    pub(crate) fn check_upgrading(&self) -> Result<(), StoreError> {
        if self.mode != TransactionMode::VersionChange {
            return Err(StoreError::invalid_state(
                "The database is not running a version change transaction",
            ));
        }
        self.check_active()
    }

    fn deactivate_later(&self) {
        let Some(tx) = self.me() else {
            return;
        };
        self.tasks().defer(move || {
            tx.active.set(false);
            tx.maybe_commit();
        });
    }

    pub(crate) fn start(self: &Rc<Self>) {
        if self.phase.get() != Phase::Waiting {
            return;
        }
        self.phase.set(Phase::Running);
        let snapshot = match self.mode {
            TransactionMode::ReadOnly => Snapshot::None,
            TransactionMode::ReadWrite => {
                let data = self.entry().data.borrow();
                let stores = data
                    .iter()
                    .flat_map(|data| data.stores.iter())
                    .filter(|(name, _)| self.scope.contains(*name))
                    .map(|(name, store)| (name.clone(), store.clone()))
                    .collect();
                Snapshot::Stores(stores)
            }
            TransactionMode::VersionChange => {
                Snapshot::Database(self.entry().data.borrow().clone().unwrap_or_default())
            }
        };
        *self.snapshot.borrow_mut() = snapshot;
        debug!("started transaction {}", self.id);

        let queued = self.requests.borrow().len();
        for _ in 0..queued {
            self.queue_next();
        }
        self.maybe_commit();
    }

    fn queue_next(self: &Rc<Self>) {
        let tx = self.clone();
        self.tasks().queue(move || tx.execute_next());
    }

    /// Queue `operation` as a new request.
    pub(crate) fn issue(self: &Rc<Self>, operation: Operation) -> Rc<MemoryRequest> {
        let request = MemoryRequest::new(Some(self.clone()));
        self.place(request.clone(), operation);
        request
    }

    /// Queue `operation` to settle `request`, which may already have settled before.
    pub(crate) fn place(self: &Rc<Self>, request: Rc<MemoryRequest>, operation: Operation) {
        request.reset();
        trace!("placed request {} on transaction {}", request.handle_id(), self.id);
        self.requests.borrow_mut().push_back((request, operation));
        if self.phase.get() == Phase::Running {
            self.queue_next();
        }
    }

    pub(crate) fn track_cursor(&self, cursor: Rc<MemoryCursor>) {
        self.cursors.borrow_mut().push(cursor);
    }

    fn execute_next(self: &Rc<Self>) {
        if self.phase.get() != Phase::Running {
            return;
        }
        let Some((request, operation)) = self.requests.borrow_mut().pop_front() else {
            return;
        };
        let result = {
            let mut data = self.entry().data.borrow_mut();
            match data.as_mut() {
                Some(data) => operation(data),
                None => Err(StoreError::invalid_state("The database has been deleted")),
            }
        };
        match result {
            Ok(produced) => {
                request.succeed(produced);
                self.fire_on_request(&request, EventKind::Success);
            }
            Err(error) => {
                debug!(
                    "request {} failed on transaction {}: {error}",
                    request.handle_id(),
                    self.id
                );
                request.fail(error.clone());
                self.fire_on_request(&request, EventKind::Error);
                if self.phase.get() != Phase::Finished {
                    self.listeners.dispatch(&Event::new(EventKind::Error));
                    self.abort_with(Some(error));
                }
            }
        }
    }

    fn fire_on_request(self: &Rc<Self>, request: &MemoryRequest, kind: EventKind) {
        if self.phase.get() == Phase::Running && !self.commit_requested.get() {
            self.active.set(true);
        }
        request.dispatch(&Event::new(kind));
        self.deactivate_later();
    }

    fn maybe_commit(self: &Rc<Self>) {
        if self.phase.get() != Phase::Running
            || self.active.get()
            || !self.requests.borrow().is_empty()
        {
            return;
        }
        self.phase.set(Phase::Committing);
        let tx = self.clone();
        self.tasks().queue(move || tx.finish_commit());
    }

    fn finish_commit(self: &Rc<Self>) {
        if self.phase.get() != Phase::Committing {
            return;
        }
        self.phase.set(Phase::Finished);
        self.snapshot.take();
        debug!("committed transaction {}", self.id);
        self.listeners.dispatch(&Event::new(EventKind::Complete));
        self.finished(true);
    }

    /// Roll back and fail everything still queued. `error` becomes the transaction's error.
    pub(crate) fn abort_with(self: &Rc<Self>, error: Option<StoreError>) {
        if self.phase.get() == Phase::Finished {
            return;
        }
        debug!("aborting transaction {}: {error:?}", self.id);
        self.phase.set(Phase::Finished);
        self.active.set(false);
        *self.error.borrow_mut() = error;

        match self.snapshot.take() {
            Snapshot::None => {}
            Snapshot::Stores(stores) => {
                if let Some(data) = self.entry().data.borrow_mut().as_mut() {
                    data.stores.extend(stores);
                }
            }
            Snapshot::Database(database) => {
                *self.entry().data.borrow_mut() = Some(database);
            }
        }

        let failed: Vec<Rc<MemoryRequest>> = self
            .requests
            .take()
            .into_iter()
            .map(|(request, _)| request)
            .collect();
        for request in &failed {
            request.fail(StoreError::aborted());
        }

        let tx = self.clone();
        self.tasks().queue(move || {
            for request in failed {
                request.dispatch(&Event::new(EventKind::Error));
                tx.listeners.dispatch(&Event::new(EventKind::Error));
            }
            tx.listeners.dispatch(&Event::new(EventKind::Abort));
            tx.finished(false);
        });
    }

    fn finished(self: &Rc<Self>, committed: bool) {
        self.entry().unlink(self.id);
        let hook = self.on_finish.borrow_mut().take();
        if let Some(hook) = hook {
            hook(committed);
        }

        let stores = self.stores.take();
        for store in stores.values() {
            store.release();
        }
        drop(stores);
        let cursors = self.cursors.take();
        drop(cursors);
        let requests = self.requests.take();
        drop(requests);
        self.listeners.clear();

        self.entry().schedule();
        self.entry().try_resume();
    }

    pub(crate) fn forget_store(&self, name: &str) {
        let removed = self.stores.borrow_mut().remove(name);
        if let Some(store) = removed {
            store.release();
        }
    }

    pub(crate) fn rename_store(&self, from: &str, to: &str) {
        let mut stores = self.stores.borrow_mut();
        if let Some(store) = stores.remove(from) {
            stores.insert(to.to_string(), store);
        }
    }

    fn has_store(&self, name: &str) -> bool {
        self.entry()
            .data
            .borrow()
            .as_ref()
            .is_some_and(|data| data.stores.contains_key(name))
    }
}

impl RawIdentity for MemoryTransaction {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl EventTarget for MemoryTransaction {
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

impl RawTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn durability(&self) -> Durability {
        self.durability
    }

    fn object_store_names(&self) -> Vec<String> {
        match self.mode {
            TransactionMode::VersionChange => self.connection.object_store_names(),
            _ => self.scope.clone(),
        }
    }

    fn db(&self) -> Rc<dyn RawDatabase> {
        self.connection.clone()
    }

    fn error(&self) -> Option<StoreError> {
        self.error.borrow().clone()
    }

    fn object_store(&self, name: &str) -> Result<Rc<dyn RawObjectStore>, StoreError> {
        if self.phase.get() == Phase::Finished {
            return Err(StoreError::invalid_state("The transaction has finished"));
        }
        let in_scope = match self.mode {
            TransactionMode::VersionChange => self.has_store(name),
            _ => self.scope.iter().any(|scoped| scoped == name) && self.has_store(name),
        };
        if !in_scope {
            return Err(StoreError::not_found(format!(
                "The object store '{name}' is not in the transaction's scope"
            )));
        }
        let Some(tx) = self.me() else {
            return Err(StoreError::invalid_state("The transaction has finished"));
        };
        let store: Rc<MemoryObjectStore> = self
            .stores
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| MemoryObjectStore::new(tx, name))
            .clone();
        Ok(store)
    }

    fn commit(&self) -> Result<(), StoreError> {
        if self.phase.get() == Phase::Finished
            || self.phase.get() == Phase::Committing
            || !self.active.get()
        {
            return Err(StoreError::invalid_state("The transaction is not active"));
        }
        debug!("commit requested on transaction {}", self.id);
        self.commit_requested.set(true);
        self.active.set(false);
        if let Some(tx) = self.me() {
            tx.maybe_commit();
        }
        Ok(())
    }

    fn abort(&self) -> Result<(), StoreError> {
        match self.phase.get() {
            Phase::Committing | Phase::Finished => Err(StoreError::new(
                ErrorKind::InvalidStateError,
                "The transaction has already committed or aborted",
            )),
            _ => {
                if let Some(tx) = self.me() {
                    tx.abort_with(None);
                }
                Ok(())
            }
        }
    }
}
