//! Listener groups: a set of listeners on one raw handle that is torn down as a unit.
//!
//! A group is settled by the first handler that reports settling. From then on every listener
//! in the group is removed and later events are ignored, so a future is resolved or rejected at
//! most once. Dropping the group removes its listeners too.

use crate::traits::{Event, EventKind, EventTarget, ListenerId, ListenerOptions};
use log::trace;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub(crate) struct ListenerGroup<T: ?Sized + EventTarget> {
    target: Rc<T>,
    registered: RefCell<Vec<(EventKind, ListenerId)>>,
    settled: Cell<bool>,
}

impl<T: ?Sized + EventTarget + 'static> ListenerGroup<T> {
    pub(crate) fn new(target: Rc<T>) -> Rc<Self> {
        Rc::new(Self {
            target,
            registered: RefCell::new(Vec::new()),
            settled: Cell::new(false),
        })
    }

    pub(crate) fn target(&self) -> &Rc<T> {
        &self.target
    }

    /// Register `handler` for `kind`. Returning `true` from the handler settles the group.
    pub(crate) fn listen(
        self: &Rc<Self>,
        kind: EventKind,
        options: ListenerOptions,
        mut handler: impl FnMut(&Event) -> bool + 'static,
    ) {
        let group = Rc::downgrade(self);
        let id = self.target.add_event_listener(
            kind,
            Box::new(move |event| {
                let Some(group) = group.upgrade() else {
                    return;
                };
                if group.settled.get() {
                    return;
                }
                if handler(event) {
                    group.settle();
                }
            }),
            options,
        );
        trace!("subscribed {id} to {kind}");
        self.registered.borrow_mut().push((kind, id));
    }

    pub(crate) fn settle(&self) {
        self.settled.set(true);
        self.unsubscribe();
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.get()
    }

    fn unsubscribe(&self) {
        let registered = self.registered.take();
        for (kind, id) in registered {
            trace!("unsubscribed {id} from {kind}");
            self.target.remove_event_listener(kind, id);
        }
    }
}

impl<T: ?Sized + EventTarget> Drop for ListenerGroup<T> {
    fn drop(&mut self) {
        for (kind, id) in self.registered.get_mut().drain(..) {
            self.target.remove_event_listener(kind, id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::traits::Listener;
    use std::collections::BTreeMap;

    /// Minimal event target used by the adapter unit tests.
    #[derive(Default)]
    pub(crate) struct TestTarget {
        next: Cell<u64>,
        listeners: RefCell<BTreeMap<ListenerId, (EventKind, ListenerOptions, Option<Listener>)>>,
    }

    impl TestTarget {
        pub(crate) fn fire(&self, event: Event) {
            let ids: Vec<ListenerId> = self
                .listeners
                .borrow()
                .iter()
                .filter(|(_, (kind, _, _))| *kind == event.kind)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                let taken = match self.listeners.borrow_mut().get_mut(&id) {
                    Some((_, options, listener)) => listener.take().map(|l| (l, options.once)),
                    None => None,
                };
                let Some((mut listener, once)) = taken else {
                    continue;
                };
                listener(&event);
                let mut listeners = self.listeners.borrow_mut();
                if once {
                    listeners.remove(&id);
                } else if let Some(entry) = listeners.get_mut(&id) {
                    entry.2 = Some(listener);
                }
            }
        }

        pub(crate) fn listener_count(&self) -> usize {
            self.listeners.borrow().len()
        }
    }

    impl EventTarget for TestTarget {
        fn add_event_listener(
            &self,
            kind: EventKind,
            listener: Listener,
            options: ListenerOptions,
        ) -> ListenerId {
            let id = ListenerId(self.next.get());
            self.next.set(id.0 + 1);
            self.listeners
                .borrow_mut()
                .insert(id, (kind, options, Some(listener)));
            id
        }

        fn remove_event_listener(&self, _kind: EventKind, id: ListenerId) {
            self.listeners.borrow_mut().remove(&id);
        }
    }

    #[test]
    fn test_first_settle_removes_every_listener() {
        let target = Rc::new(TestTarget::default());
        let group = ListenerGroup::new(target.clone());
        let hits = Rc::new(Cell::new(0));

        for kind in [EventKind::Success, EventKind::Error] {
            let hits = hits.clone();
            group.listen(kind, ListenerOptions::ONCE, move |_| {
                hits.set(hits.get() + 1);
                true
            });
        }
        assert_eq!(target.listener_count(), 2);

        target.fire(Event::new(EventKind::Success));
        target.fire(Event::new(EventKind::Error));

        assert_eq!(hits.get(), 1);
        assert!(group.is_settled());
        assert_eq!(target.listener_count(), 0);
    }

    #[test]
    fn test_handler_may_decline_to_settle() {
        let target = Rc::new(TestTarget::default());
        let group = ListenerGroup::new(target.clone());
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        group.listen(EventKind::Error, ListenerOptions::PERSISTENT, move |_| {
            counter.set(counter.get() + 1);
            counter.get() == 2
        });

        target.fire(Event::new(EventKind::Error));
        assert!(!group.is_settled());
        target.fire(Event::new(EventKind::Error));
        assert!(group.is_settled());
        target.fire(Event::new(EventKind::Error));
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn test_dropping_group_unsubscribes() {
        let target = Rc::new(TestTarget::default());
        let group = ListenerGroup::new(target.clone());
        group.listen(EventKind::Complete, ListenerOptions::ONCE, |_| true);
        assert_eq!(target.listener_count(), 1);
        drop(group);
        assert_eq!(target.listener_count(), 0);
    }
}
