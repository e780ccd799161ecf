use crate::traits::{Event, EventKind, Listener, ListenerId, ListenerOptions};
use log::trace;
use std::cell::{Cell, RefCell};

struct Entry {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    callback: Option<Listener>,
}

/// Listener registry backing every memory handle's `EventTarget`.
///
/// Callbacks are taken out of the registry while they run, so a listener may add or remove
/// listeners (itself included) during dispatch. Removed callbacks are dropped only after the
/// registry is released.
#[derive(Default)]
pub(crate) struct Listeners {
    next: Cell<u64>,
    entries: RefCell<Vec<Entry>>,
}

impl Listeners {
    pub(crate) fn add(
        &self,
        kind: EventKind,
        callback: Listener,
        options: ListenerOptions,
    ) -> ListenerId {
        let id = ListenerId(self.next.get());
        self.next.set(id.0 + 1);
        self.entries.borrow_mut().push(Entry {
            id,
            kind,
            once: options.once,
            callback: Some(callback),
        });
        id
    }

    pub(crate) fn remove(&self, kind: EventKind, id: ListenerId) {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|entry| entry.id == id && entry.kind == kind)
                .map(|position| entries.remove(position))
        };
        drop(removed);
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        let ids: Vec<ListenerId> = self
            .entries
            .borrow()
            .iter()
            .filter(|entry| entry.kind == event.kind)
            .map(|entry| entry.id)
            .collect();
        trace!("dispatching {} to {} listeners", event.kind, ids.len());

        for id in ids {
            let taken = {
                let mut entries = self.entries.borrow_mut();
                match entries.iter().position(|entry| entry.id == id) {
                    Some(position) if entries[position].once => {
                        entries.remove(position).callback.map(|callback| (callback, true))
                    }
                    Some(position) => entries[position]
                        .callback
                        .take()
                        .map(|callback| (callback, false)),
                    None => None,
                }
            };
            let Some((mut callback, once)) = taken else {
                continue;
            };
            callback(event);
            if once {
                continue;
            }
            let mut entries = self.entries.borrow_mut();
            if let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) {
                entry.callback = Some(callback);
            } else {
                drop(entries);
                drop(callback);
            }
        }
    }

    pub(crate) fn clear(&self) {
        let entries = self.entries.take();
        drop(entries);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_once_listener_fires_once() {
        let listeners = Listeners::default();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        listeners.add(
            EventKind::Success,
            Box::new(move |_| counter.set(counter.get() + 1)),
            ListenerOptions::ONCE,
        );

        listeners.dispatch(&Event::new(EventKind::Success));
        listeners.dispatch(&Event::new(EventKind::Success));

        assert_eq!(hits.get(), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_listener_can_remove_itself_while_dispatching() {
        let listeners = Rc::new(Listeners::default());
        let hits = Rc::new(Cell::new(0));
        let id = Rc::new(Cell::new(None));

        let (registry, counter, own_id) = (Rc::downgrade(&listeners), hits.clone(), id.clone());
        let registered = listeners.add(
            EventKind::Error,
            Box::new(move |event| {
                counter.set(counter.get() + 1);
                if let (Some(registry), Some(own)) = (registry.upgrade(), own_id.get()) {
                    registry.remove(event.kind, own);
                }
            }),
            ListenerOptions::PERSISTENT,
        );
        id.set(Some(registered));

        listeners.dispatch(&Event::new(EventKind::Error));
        listeners.dispatch(&Event::new(EventKind::Error));

        assert_eq!(hits.get(), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_dispatch_only_reaches_matching_kind() {
        let listeners = Listeners::default();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        listeners.add(
            EventKind::Complete,
            Box::new(move |_| counter.set(counter.get() + 1)),
            ListenerOptions::PERSISTENT,
        );
        listeners.dispatch(&Event::new(EventKind::Abort));
        assert_eq!(hits.get(), 0);
        listeners.clear();
        assert_eq!(listeners.len(), 0);
    }
}
