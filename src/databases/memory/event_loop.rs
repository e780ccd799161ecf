//! Single-threaded task queue driving the memory backend.
//!
//! Every event the backend dispatches runs as a queued task. After each task the awaited
//! future is polled once more, which plays the part of a microtask checkpoint: code resumed by
//! the event still sees its transaction active. Deferred actions then run, and only after them
//! the next task.

use crate::error::{NetabaseError, NetabaseResult};
use futures::task::noop_waker;
use log::{trace, warn};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll};

type Task = Box<dyn FnOnce()>;

#[derive(Default)]
pub(crate) struct EventLoop {
    tasks: RefCell<VecDeque<Task>>,
    deferred: RefCell<VecDeque<Task>>,
    ran: Cell<u64>,
}

impl EventLoop {
    /// Run `task` after every task queued before it.
    pub(crate) fn queue(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run `action` once the current task and its checkpoint have finished.
    pub(crate) fn defer(&self, action: impl FnOnce() + 'static) {
        self.deferred.borrow_mut().push_back(Box::new(action));
    }

    pub(crate) fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Total tasks run so far.
    pub(crate) fn tasks_run(&self) -> u64 {
        self.ran.get()
    }

    fn run_deferred(&self) {
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            match next {
                Some(action) => action(),
                None => break,
            }
        }
    }

    /// Run one queued task. Returns `false` if there was none.
    pub(crate) fn turn(&self) -> bool {
        let next = self.tasks.borrow_mut().pop_front();
        match next {
            Some(task) => {
                self.ran.set(self.ran.get() + 1);
                task();
                true
            }
            None => false,
        }
    }

    /// Drive tasks until `future` resolves.
    ///
    /// Fails with [`NetabaseError::Stalled`] if the queue runs dry, or `budget` tasks have run,
    /// with the future still pending.
    pub(crate) fn run_until<F: Future>(
        &self,
        future: F,
        budget: usize,
    ) -> NetabaseResult<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        let mut remaining = budget;

        loop {
            let polled = future.as_mut().poll(&mut cx);
            self.run_deferred();
            if let Poll::Ready(output) = polled {
                return Ok(output);
            }
            if remaining == 0 {
                warn!("event loop ran {budget} tasks without the future resolving");
                return Err(NetabaseError::Stalled);
            }
            remaining -= 1;
            if !self.turn() {
                warn!("event loop stalled with the future still pending");
                return Err(NetabaseError::Stalled);
            }
            trace!("ran task {}", self.ran.get());
        }
    }

    /// Run tasks until the queue is empty.
    pub(crate) fn drain(&self) {
        self.run_deferred();
        while self.turn() {
            self.run_deferred();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use std::rc::Rc;

    #[test]
    fn test_tasks_run_in_order() {
        let event_loop = EventLoop::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            event_loop.queue(move || log.borrow_mut().push(i));
        }
        event_loop.drain();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(event_loop.tasks_run(), 3);
    }

    #[test]
    fn test_checkpoint_runs_before_deferred_actions() {
        let event_loop = Rc::new(EventLoop::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let (sender, receiver) = oneshot::channel::<()>();

        let queued = event_loop.clone();
        let task_log = log.clone();
        event_loop.queue(move || {
            task_log.borrow_mut().push("task");
            let _ = sender.send(());
            let deferred_log = task_log.clone();
            queued.defer(move || deferred_log.borrow_mut().push("deferred"));
        });

        let future_log = log.clone();
        let result = event_loop.run_until(
            async move {
                receiver.await.ok();
                future_log.borrow_mut().push("resumed");
            },
            10,
        );

        assert!(result.is_ok());
        assert_eq!(*log.borrow(), vec!["task", "resumed", "deferred"]);
    }

    #[test]
    fn test_stall_is_reported() {
        let event_loop = EventLoop::default();
        let result = event_loop.run_until(futures::future::pending::<()>(), 10);
        assert!(matches!(result, Err(NetabaseError::Stalled)));
    }

    #[test]
    fn test_budget_is_enforced() {
        let event_loop = Rc::new(EventLoop::default());
        fn requeue(event_loop: Rc<EventLoop>) {
            let next = event_loop.clone();
            event_loop.queue(move || requeue(next));
        }
        requeue(event_loop.clone());
        let result = event_loop.run_until(futures::future::pending::<()>(), 5);
        assert!(matches!(result, Err(NetabaseError::Stalled)));
        assert_eq!(event_loop.tasks_run(), 5);
    }
}
