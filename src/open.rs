//! Opening and deleting databases.
//!
//! [`open_database`] drives the store's version-upgrade protocol: the requested version is the
//! number of migrations, and when the store reports an upgrade from `old_version` the
//! migrations from index `old_version` onwards run in order against the upgrade transaction.

use crate::error::{NetabaseError, NetabaseResult};
use crate::handles::{Database, Transaction};
use crate::traits::{DatabaseInfo, EventKind, ListenerOptions, RawFactory, RawRequest};
use crate::types::Key;
use crate::wrap::subscription::ListenerGroup;
use crate::wrap::{unwrap, Pending, RequestFuture, Wrap};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::noop_waker_ref;
use log::{debug, warn};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use typed_builder::TypedBuilder;

type MigrationStep = Box<dyn Fn(Transaction) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// One schema version step, run inside the upgrade transaction.
pub struct Migration {
    step: MigrationStep,
}

impl Migration {
    /// A migration that finishes synchronously.
    pub fn new<F>(step: F) -> Self
    where
        F: Fn(&Transaction) -> anyhow::Result<()> + 'static,
    {
        Self {
            step: Box::new(move |tx| future::ready(step(&tx)).boxed_local()),
        }
    }

    /// A migration that awaits requests on the upgrade transaction.
    pub fn from_async<F, Fut>(step: F) -> Self
    where
        F: Fn(Transaction) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Self {
            step: Box::new(move |tx| step(tx).boxed_local()),
        }
    }

    fn run(&self, tx: Transaction) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        (self.step)(tx)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Migration")
    }
}

/// Called with `(old_version, new_version)` while other connections hold the database open.
pub type BlockedCallback = Box<dyn FnMut(u64, Option<u64>)>;

/// Everything needed to open a database.
///
/// # Examples
///
/// ```
/// use netabase_idb::open::{Migration, OpenOptions};
///
/// let options = OpenOptions::builder()
///     .name("library")
///     .migrations(vec![Migration::new(|_tx| Ok(()))])
///     .build();
/// assert_eq!(options.requested_version(), Some(1));
/// ```
#[derive(TypedBuilder)]
#[builder(doc)]
pub struct OpenOptions {
    #[builder(setter(into))]
    pub name: String,

    /// Applied in order; migration `i` upgrades from version `i` to `i + 1`
    #[builder(default)]
    pub migrations: Vec<Migration>,

    #[builder(default, setter(strip_option))]
    pub on_blocked: Option<BlockedCallback>,
}

impl OpenOptions {
    /// The version to request from the store, if any.
    pub fn requested_version(&self) -> Option<u64> {
        (!self.migrations.is_empty()).then_some(self.migrations.len() as u64)
    }

    /// Open the database these options describe.
    pub fn open_with<F: RawFactory + ?Sized>(self, factory: &F) -> OpenDatabase {
        let version = self.requested_version();
        debug!("opening {} at version {version:?}", self.name);
        match factory.open(&self.name, version) {
            Ok(request) => OpenDatabase::new(request, self.migrations, self.on_blocked),
            Err(error) => OpenDatabase::failed(error.into()),
        }
    }
}

/// Open `name`, running whichever `migrations` the stored version has not seen yet.
pub fn open_database<F: RawFactory + ?Sized>(
    factory: &F,
    name: &str,
    migrations: Vec<Migration>,
    on_blocked: Option<BlockedCallback>,
) -> OpenDatabase {
    OpenOptions {
        name: name.to_string(),
        migrations,
        on_blocked,
    }
    .open_with(factory)
}

/// Delete `name`. Resolves once the database is gone.
pub fn delete_database<F: RawFactory + ?Sized>(
    factory: &F,
    name: &str,
    on_blocked: Option<BlockedCallback>,
) -> DeleteDatabase {
    debug!("deleting database {name}");
    match factory.delete_database(name) {
        Ok(request) => DeleteDatabase::new(request, on_blocked),
        Err(error) => DeleteDatabase {
            result: RequestFuture::failed(error.into()),
            _listeners: None,
        },
    }
}

/// Names and versions of every database the store knows.
pub fn databases<F: RawFactory + ?Sized>(factory: &F) -> RequestFuture<Vec<DatabaseInfo>> {
    match factory.databases() {
        Ok(request) => request.wrap().into_future(),
        Err(error) => Pending::Failed(error).into_future(),
    }
}

/// Compare two keys the way the store orders them.
pub fn cmp<F: RawFactory + ?Sized>(factory: &F, a: &Key, b: &Key) -> Ordering {
    factory.cmp(a, b)
}

fn listen_blocked(
    group: &Rc<ListenerGroup<dyn RawRequest>>,
    on_blocked: Option<BlockedCallback>,
) {
    let Some(mut on_blocked) = on_blocked else {
        return;
    };
    group.listen(EventKind::Blocked, ListenerOptions::PERSISTENT, move |event| {
        if let Some(change) = event.version_change {
            debug!(
                "blocked upgrading from {} to {:?}",
                change.old_version, change.new_version
            );
            on_blocked(change.old_version, change.new_version);
        }
        false
    });
}

#[derive(Default)]
struct Upgrade {
    running: Option<LocalBoxFuture<'static, anyhow::Result<()>>>,
    transaction: Option<Transaction>,
    failure: Option<anyhow::Error>,
    waker: Option<Waker>,
}

impl Upgrade {
    // Returns false once the chain has finished, successfully or not.
    fn drive(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        match running.as_mut().poll(cx) {
            Poll::Pending => true,
            Poll::Ready(result) => {
                self.running = None;
                let transaction = self.transaction.take();
                if let Err(error) = result {
                    warn!("migration failed: {error:#}");
                    if let Some(tx) = transaction {
                        if let Err(abort) = unwrap(&tx).abort() {
                            warn!("could not abort upgrade transaction: {abort}");
                        }
                    }
                    self.failure = Some(error);
                } else {
                    debug!("migrations finished");
                }
                false
            }
        }
    }
}

/// Resolves with the opened connection once every pending migration has run and the store
/// reports success.
#[must_use = "futures do nothing unless polled"]
pub struct OpenDatabase {
    result: RequestFuture<Database>,
    upgrade: Rc<RefCell<Upgrade>>,
    opened: Option<Database>,
    _listeners: Option<Rc<ListenerGroup<dyn RawRequest>>>,
}

impl OpenDatabase {
    fn new(
        request: Rc<dyn RawRequest>,
        migrations: Vec<Migration>,
        on_blocked: Option<BlockedCallback>,
    ) -> Self {
        let upgrade = Rc::new(RefCell::new(Upgrade::default()));
        let migrations = Rc::new(migrations);
        let group = ListenerGroup::new(request.clone());

        let state = upgrade.clone();
        let source: Weak<dyn RawRequest> = Rc::downgrade(&request);
        group.listen(EventKind::UpgradeNeeded, ListenerOptions::PERSISTENT, move |event| {
            let Some(change) = event.version_change else {
                return false;
            };
            let Some(raw_tx) = source.upgrade().and_then(|request| request.transaction()) else {
                warn!("upgradeneeded fired without an upgrade transaction");
                return false;
            };
            debug!(
                "upgrading from {} to {:?}",
                change.old_version, change.new_version
            );
            let tx = raw_tx.wrap();
            let steps = migrations.clone();
            let chain_tx = tx.clone();
            let start = change.old_version as usize;
            let chain = async move {
                for (version, migration) in steps.iter().enumerate().skip(start) {
                    debug!("running migration to version {}", version + 1);
                    migration.run(chain_tx.clone()).await?;
                }
                Ok::<(), anyhow::Error>(())
            };

            let mut upgrade = state.borrow_mut();
            upgrade.running = Some(Box::pin(chain));
            upgrade.transaction = Some(tx);
            // Run as far as possible while the upgrade transaction is active.
            let waker = upgrade.waker.clone();
            let mut cx = match &waker {
                Some(waker) => Context::from_waker(waker),
                None => Context::from_waker(noop_waker_ref()),
            };
            upgrade.drive(&mut cx);
            if let Some(waker) = waker {
                waker.wake();
            }
            false
        });
        listen_blocked(&group, on_blocked);

        Self {
            result: request.wrap().into_future(),
            upgrade,
            opened: None,
            _listeners: Some(group),
        }
    }

    fn failed(error: NetabaseError) -> Self {
        Self {
            result: RequestFuture::failed(error),
            upgrade: Rc::new(RefCell::new(Upgrade::default())),
            opened: None,
            _listeners: None,
        }
    }
}

impl Future for OpenDatabase {
    type Output = NetabaseResult<Database>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let upgrading = {
            let mut upgrade = this.upgrade.borrow_mut();
            upgrade.waker = Some(cx.waker().clone());
            let upgrading = upgrade.drive(cx);
            if let Some(error) = upgrade.failure.take() {
                return Poll::Ready(Err(NetabaseError::Migration(error)));
            }
            upgrading
        };

        if this.opened.is_none() {
            match Pin::new(&mut this.result).poll(cx) {
                Poll::Ready(Ok(db)) => this.opened = Some(db),
                Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                Poll::Pending => return Poll::Pending,
            }
        }

        if upgrading {
            return Poll::Pending;
        }
        match this.opened.take() {
            Some(db) => {
                debug!("opened {} at version {}", db.name(), db.version());
                Poll::Ready(Ok(db))
            }
            None => Poll::Ready(Err(NetabaseError::RequestDropped)),
        }
    }
}

/// Resolves once the database is deleted.
#[must_use = "futures do nothing unless polled"]
pub struct DeleteDatabase {
    result: RequestFuture<()>,
    _listeners: Option<Rc<ListenerGroup<dyn RawRequest>>>,
}

impl DeleteDatabase {
    fn new(request: Rc<dyn RawRequest>, on_blocked: Option<BlockedCallback>) -> Self {
        let group = ListenerGroup::new(request.clone());
        listen_blocked(&group, on_blocked);
        Self {
            result: request.wrap().into_future(),
            _listeners: Some(group),
        }
    }
}

impl Future for DeleteDatabase {
    type Output = NetabaseResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().result).poll(cx)
    }
}
