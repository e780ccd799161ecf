//! Transaction completion as a future.
//!
//! One [`TransactionOutcome`] exists per raw transaction. It is created the first time the
//! transaction is wrapped and subscribes to `complete`, `abort` and `error`. The outcome stays
//! pending until the transaction has settled *and* every request future issued against it has
//! settled, so a caller awaiting completion never observes it ahead of its own operations.

use super::subscription::ListenerGroup;
use crate::error::{NetabaseError, NetabaseResult, StoreError};
use crate::handles::Transaction;
use crate::traits::{EventKind, HandleId, ListenerOptions, RawTransaction};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

type NativeCompletion = Shared<LocalBoxFuture<'static, Result<(), StoreError>>>;

thread_local! {
    static OUTCOMES: RefCell<HashMap<HandleId, Weak<TransactionOutcome>>> =
        RefCell::new(HashMap::new());
}

pub(crate) struct TransactionOutcome {
    settled: RefCell<Option<Result<(), StoreError>>>,
    in_flight: Cell<usize>,
    wakers: RefCell<Vec<Waker>>,
    subscription: RefCell<Option<Rc<ListenerGroup<dyn RawTransaction>>>>,
    native: Option<NativeCompletion>,
}

impl TransactionOutcome {
    /// The outcome of `raw`, subscribing to its events if nobody has yet.
    pub(crate) fn attach(raw: &Rc<dyn RawTransaction>) -> Rc<Self> {
        let id = raw.handle_id();
        if let Some(existing) = Self::for_transaction(id) {
            return existing;
        }

        let native = raw.native_completion().map(FutureExt::shared);
        let outcome = Rc::new(Self {
            settled: RefCell::new(None),
            in_flight: Cell::new(0),
            wakers: RefCell::new(Vec::new()),
            subscription: RefCell::new(None),
            native,
        });
        if outcome.native.is_none() {
            outcome.subscribe(raw);
        }
        OUTCOMES.with(|outcomes| {
            let mut outcomes = outcomes.borrow_mut();
            outcomes.retain(|_, weak| weak.strong_count() > 0);
            outcomes.insert(id, Rc::downgrade(&outcome));
        });
        outcome
    }

    pub(crate) fn for_transaction(id: HandleId) -> Option<Rc<Self>> {
        OUTCOMES.with(|outcomes| outcomes.borrow().get(&id).and_then(Weak::upgrade))
    }

    // The listeners keep the outcome alive until the transaction settles; settling drops the
    // group and with it the cycle back to the raw transaction.
    fn subscribe(self: &Rc<Self>, raw: &Rc<dyn RawTransaction>) {
        let group = ListenerGroup::new(raw.clone());

        let outcome = self.clone();
        group.listen(EventKind::Complete, ListenerOptions::ONCE, move |_| {
            outcome.settle(Ok(()));
            true
        });

        let outcome = self.clone();
        let transaction = Rc::downgrade(raw);
        group.listen(EventKind::Abort, ListenerOptions::ONCE, move |_| {
            let error = transaction
                .upgrade()
                .and_then(|tx| tx.error())
                .unwrap_or_else(StoreError::aborted);
            outcome.settle(Err(error));
            true
        });

        let outcome = self.clone();
        let transaction = Rc::downgrade(raw);
        group.listen(EventKind::Error, ListenerOptions::PERSISTENT, move |_| {
            // Request errors bubble here before the transaction has an error of its own; the
            // abort that follows settles instead.
            match transaction.upgrade().and_then(|tx| tx.error()) {
                Some(error) => {
                    outcome.settle(Err(error));
                    true
                }
                None => false,
            }
        });

        *self.subscription.borrow_mut() = Some(group);
    }

    fn settle(&self, result: Result<(), StoreError>) {
        {
            let mut settled = self.settled.borrow_mut();
            if settled.is_some() {
                return;
            }
            debug!("transaction settled: {result:?}");
            *settled = Some(result);
        }
        drop(self.subscription.borrow_mut().take());
        self.wake_if_ready();
    }

    pub(crate) fn begin_operation(self: &Rc<Self>) -> InFlight {
        self.in_flight.set(self.in_flight.get() + 1);
        InFlight {
            outcome: self.clone(),
        }
    }

    fn finish_operation(&self) {
        self.in_flight.set(self.in_flight.get().saturating_sub(1));
        self.wake_if_ready();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    fn wake_if_ready(&self) {
        if self.in_flight.get() > 0 || self.settled.borrow().is_none() {
            return;
        }
        let wakers = self.wakers.take();
        for waker in wakers {
            waker.wake();
        }
    }

    fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<Result<(), StoreError>> {
        if self.in_flight.get() == 0 {
            if let Some(result) = self.settled.borrow().clone() {
                return Poll::Ready(result);
            }
        }
        let mut wakers = self.wakers.borrow_mut();
        if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Marks one request future as outstanding on its transaction until dropped.
pub(crate) struct InFlight {
    outcome: Rc<TransactionOutcome>,
}

impl InFlight {
    pub(crate) fn on_transaction(transaction: &dyn RawTransaction) -> Option<Self> {
        let outcome = TransactionOutcome::for_transaction(transaction.handle_id())?;
        trace!("operation started on {}", transaction.handle_id());
        Some(outcome.begin_operation())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.outcome.finish_operation();
    }
}

/// Resolves once the transaction commits, or fails with [`NetabaseError::TransactionAborted`]
/// once it aborts.
///
/// Any number of these may be awaited for the same transaction; all observe the same outcome.
#[must_use = "futures do nothing unless polled"]
pub struct TransactionDone {
    transaction: Transaction,
    native: Option<NativeCompletion>,
}

impl TransactionDone {
    pub(crate) fn new(transaction: Transaction) -> Self {
        let native = transaction.outcome().native.clone();
        Self {
            transaction,
            native,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }
}

impl Future for TransactionDone {
    type Output = NetabaseResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let settled = match this.native.as_mut() {
            Some(native) => Pin::new(native).poll(cx),
            None => this.transaction.outcome().poll_settled(cx),
        };
        settled.map(|result| result.map_err(NetabaseError::TransactionAborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::task::noop_waker;

    fn outcome() -> Rc<TransactionOutcome> {
        Rc::new(TransactionOutcome {
            settled: RefCell::new(None),
            in_flight: Cell::new(0),
            wakers: RefCell::new(Vec::new()),
            subscription: RefCell::new(None),
            native: None,
        })
    }

    #[test]
    fn test_outcome_waits_for_in_flight_operations() {
        let outcome = outcome();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let operation = outcome.begin_operation();
        outcome.settle(Ok(()));
        assert!(outcome.poll_settled(&mut cx).is_pending());
        assert_eq!(outcome.in_flight(), 1);

        drop(operation);
        assert_eq!(outcome.poll_settled(&mut cx), Poll::Ready(Ok(())));
    }

    #[test]
    fn test_first_settlement_wins() {
        let outcome = outcome();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        outcome.settle(Err(StoreError::constraint("duplicate")));
        outcome.settle(Ok(()));

        match outcome.poll_settled(&mut cx) {
            Poll::Ready(Err(error)) => assert_eq!(error.kind, ErrorKind::ConstraintError),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn test_waker_registered_once_per_task() {
        let outcome = outcome();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        for _ in 0..5 {
            assert!(outcome.poll_settled(&mut cx).is_pending());
        }
        assert_eq!(outcome.wakers.borrow().len(), 1);
    }
}
