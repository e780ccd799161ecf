//! Everything the memory backend knows about one database name.
//!
//! Open and delete requests for a name are processed one at a time. A request that has to wait
//! for other connections parks a continuation here; it is resumed once every other connection
//! has closed and every transaction has finished.

use super::data::DatabaseData;
use super::database::MemoryDatabase;
use super::event_loop::EventLoop;
use super::request::{MemoryRequest, Produced};
use super::transaction::{MemoryTransaction, Phase};
use crate::error::{ErrorKind, StoreError};
use crate::traits::{Event, EventKind, HandleId, RawIdentity, RawResult};
use crate::types::{Durability, TransactionMode};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

enum Queued {
    Open {
        request: Rc<MemoryRequest>,
        version: Option<u64>,
    },
    Delete {
        request: Rc<MemoryRequest>,
    },
}

pub(crate) struct DatabaseEntry {
    pub(crate) name: String,
    pub(crate) tasks: Rc<EventLoop>,
    pub(crate) data: RefCell<Option<DatabaseData>>,
    weak_self: Weak<DatabaseEntry>,
    connections: RefCell<Vec<Weak<MemoryDatabase>>>,
    transactions: RefCell<Vec<Rc<MemoryTransaction>>>,
    queue: RefCell<VecDeque<Queued>>,
    busy: Cell<bool>,
    waiting: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl DatabaseEntry {
    pub(crate) fn new(name: &str, tasks: Rc<EventLoop>, data: Option<DatabaseData>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            name: name.to_string(),
            tasks,
            data: RefCell::new(data),
            weak_self: weak_self.clone(),
            connections: RefCell::new(Vec::new()),
            transactions: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            busy: Cell::new(false),
            waiting: RefCell::new(None),
        })
    }

    pub(crate) fn version(&self) -> Option<u64> {
        self.data.borrow().as_ref().map(|data| data.version)
    }

    pub(crate) fn enqueue_open(&self, request: Rc<MemoryRequest>, version: Option<u64>) {
        self.enqueue(Queued::Open { request, version });
    }

    pub(crate) fn enqueue_delete(&self, request: Rc<MemoryRequest>) {
        self.enqueue(Queued::Delete { request });
    }

    fn enqueue(&self, queued: Queued) {
        self.queue.borrow_mut().push_back(queued);
        self.queue_processing();
    }

    fn queue_processing(&self) {
        if let Some(entry) = self.weak_self.upgrade() {
            self.tasks.queue(move || entry.process_next());
        }
    }

    fn process_next(self: &Rc<Self>) {
        if self.busy.get() {
            return;
        }
        let Some(next) = self.queue.borrow_mut().pop_front() else {
            return;
        };
        self.busy.set(true);
        match next {
            Queued::Open { request, version } => self.run_open(request, version),
            Queued::Delete { request } => self.run_delete(request),
        }
    }

    fn done_processing(&self) {
        self.busy.set(false);
        if !self.queue.borrow().is_empty() {
            self.queue_processing();
        }
    }

    fn settle(&self, request: &MemoryRequest, result: Result<RawResult, StoreError>) {
        let kind = match result {
            Ok(result) => {
                request.succeed(Produced::Result(result));
                EventKind::Success
            }
            Err(error) => {
                request.fail(error);
                EventKind::Error
            }
        };
        request.dispatch(&Event::new(kind));
        self.done_processing();
    }

    fn run_open(self: &Rc<Self>, request: Rc<MemoryRequest>, version: Option<u64>) {
        let current = self.version();
        let requested = version.unwrap_or(current.unwrap_or(1));
        if let Some(current) = current {
            if requested < current {
                self.settle(
                    &request,
                    Err(StoreError::new(
                        ErrorKind::VersionError,
                        format!(
                            "The requested version ({requested}) is less than the existing version ({current})"
                        ),
                    )),
                );
                return;
            }
        }

        let old = current.unwrap_or(0);
        let connection = MemoryDatabase::new(self.clone(), old);
        if requested == old {
            debug!("opened {} at version {old}", self.name);
            self.add_connection(&connection);
            self.settle(&request, Ok(RawResult::Database(connection)));
            return;
        }

        self.notify_others(&request, old, Some(requested));
        let entry = self.clone();
        self.wait(Box::new(move || entry.run_upgrade(request, connection, old, requested)));
    }

    fn run_upgrade(
        self: &Rc<Self>,
        request: Rc<MemoryRequest>,
        connection: Rc<MemoryDatabase>,
        old: u64,
        new: u64,
    ) {
        debug!("upgrading {} from version {old} to {new}", self.name);
        let created = self.data.borrow().is_none();
        self.data
            .borrow_mut()
            .get_or_insert_with(DatabaseData::default)
            .version = new;
        connection.set_version(new);
        self.add_connection(&connection);

        let tx = MemoryTransaction::new(
            connection.clone(),
            Vec::new(),
            TransactionMode::VersionChange,
            Durability::Default,
        );
        let upgraded = connection.clone();
        let (entry, finished_request) = (self.clone(), request.clone());
        tx.set_on_finish(Box::new(move |committed| {
            finished_request.set_transaction(None);
            let tasks = entry.tasks.clone();
            if committed {
                tasks.queue(move || {
                    entry.settle(&finished_request, Ok(RawResult::Database(connection)));
                });
                return;
            }
            debug!("upgrade of {} aborted, back to version {old}", entry.name);
            {
                let mut data = entry.data.borrow_mut();
                if created {
                    *data = None;
                } else if let Some(data) = data.as_mut() {
                    data.version = old;
                }
            }
            connection.set_version(old);
            connection.close_connection();
            tasks.queue(move || entry.settle(&finished_request, Err(StoreError::aborted())));
        }));

        request.set_transaction(Some(tx.clone()));
        request.succeed(Produced::Result(RawResult::Database(upgraded)));
        self.schedule();
        request.dispatch(&Event::with_versions(EventKind::UpgradeNeeded, old, Some(new)));
    }

    fn run_delete(self: &Rc<Self>, request: Rc<MemoryRequest>) {
        let old = self.version().unwrap_or(0);
        self.notify_others(&request, old, None);
        let entry = self.clone();
        self.wait(Box::new(move || {
            debug!("deleted database {}", entry.name);
            let removed = entry.data.borrow_mut().take();
            drop(removed);
            entry.settle(&request, Ok(RawResult::Undefined));
        }));
    }

    // Tell every open connection a version change is coming; report `blocked` if any stay open.
    fn notify_others(&self, request: &MemoryRequest, old: u64, new: Option<u64>) {
        for connection in self.open_connections() {
            connection.dispatch(&Event::with_versions(EventKind::VersionChange, old, new));
        }
        if !self.open_connections().is_empty() {
            debug!("{} is blocked by open connections", self.name);
            request.dispatch(&Event::with_versions(EventKind::Blocked, old, new));
        }
    }

    fn wait(&self, continuation: Box<dyn FnOnce()>) {
        *self.waiting.borrow_mut() = Some(continuation);
        self.try_resume();
    }

    /// Resume a parked open or delete once nothing holds the database.
    pub(crate) fn try_resume(&self) {
        if self.waiting.borrow().is_none()
            || !self.open_connections().is_empty()
            || !self.transactions.borrow().is_empty()
        {
            return;
        }
        let continuation = self.waiting.borrow_mut().take();
        if let Some(continuation) = continuation {
            self.tasks.queue(continuation);
        }
    }

    pub(crate) fn open_connections(&self) -> Vec<Rc<MemoryDatabase>> {
        self.connections
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|connection| !connection.is_closed())
            .collect()
    }

    fn add_connection(&self, connection: &Rc<MemoryDatabase>) {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|weak| weak.strong_count() > 0);
        connections.push(Rc::downgrade(connection));
    }

    pub(crate) fn remove_connection(&self, id: HandleId) {
        self.connections
            .borrow_mut()
            .retain(|weak| weak.upgrade().is_some_and(|connection| connection.handle_id() != id));
    }

    pub(crate) fn link(&self, tx: Rc<MemoryTransaction>) {
        self.transactions.borrow_mut().push(tx);
    }

    pub(crate) fn unlink(&self, id: HandleId) {
        let removed: Vec<Rc<MemoryTransaction>> = {
            let mut transactions = self.transactions.borrow_mut();
            let (gone, kept): (Vec<_>, Vec<_>) =
                transactions.drain(..).partition(|tx| tx.handle_id() == id);
            *transactions = kept;
            gone
        };
        drop(removed);
    }

    /// The running version change transaction, if any.
    pub(crate) fn upgrade_transaction(&self) -> Option<Rc<MemoryTransaction>> {
        self.transactions
            .borrow()
            .iter()
            .find(|tx| tx.is_upgrade() && tx.phase() != Phase::Finished)
            .cloned()
    }

    /// Start every waiting transaction no earlier unfinished transaction conflicts with.
    pub(crate) fn schedule(&self) {
        let ready: Vec<Rc<MemoryTransaction>> = {
            let transactions = self.transactions.borrow();
            transactions
                .iter()
                .enumerate()
                .filter(|(i, tx)| {
                    tx.phase() == Phase::Waiting
                        && !transactions[..*i].iter().any(|earlier| {
                            earlier.phase() != Phase::Finished && earlier.conflicts_with(tx)
                        })
                })
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in ready {
            tx.start();
        }
    }

    /// Close every connection and tell each one it was closed.
    pub(crate) fn force_close(&self) {
        for connection in self.open_connections() {
            connection.close_connection();
            connection.dispatch(&Event::new(EventKind::Close));
        }
    }
}
