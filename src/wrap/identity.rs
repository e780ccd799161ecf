//! Bidirectional association between raw handles and their façades.
//!
//! Both directions hold weak references only: a façade keeps its raw handle alive, never the
//! other way round, and the cache keeps neither alive. A façade evicts its own entries when it
//! is dropped; lookups also prune entries whose referent is gone.

use crate::traits::{HandleId, RawHandle, WeakRawHandle};
use derive_more::{Display, From};
use log::trace;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

thread_local! {
    static CACHE: RefCell<IdentityCache> = RefCell::new(IdentityCache::default());
}

/// Identity of a façade, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Display)]
#[display("wrapper#{_0}")]
pub struct WrapperId(u64);

impl WrapperId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WrapperId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct ForwardEntry {
    wrapper: WrapperId,
    wrapped: Weak<dyn Any>,
}

#[derive(Default)]
pub struct IdentityCache {
    forward: HashMap<HandleId, ForwardEntry>,
    inverse: HashMap<WrapperId, WeakRawHandle>,
}

impl IdentityCache {
    /// Run `f` against this thread's cache.
    pub fn with<R>(f: impl FnOnce(&mut IdentityCache) -> R) -> R {
        CACHE.with(|cache| f(&mut cache.borrow_mut()))
    }

    /// Record `raw <-> wrapped` in both directions, replacing any previous association of `raw`.
    pub fn associate(&mut self, raw: &RawHandle, wrapper: WrapperId, wrapped: Weak<dyn Any>) {
        let handle = raw.handle_id();
        trace!("identity cache: {handle} <-> {wrapper}");
        if let Some(previous) = self.forward.insert(handle, ForwardEntry { wrapper, wrapped }) {
            self.inverse.remove(&previous.wrapper);
        }
        self.inverse.insert(wrapper, raw.downgrade());
    }

    /// The live façade of type `T` wrapping `raw`, if there is one.
    pub fn wrapped_for<T: Any>(&mut self, raw: HandleId) -> Option<Rc<T>> {
        let entry = self.forward.get(&raw)?;
        match entry.wrapped.upgrade() {
            Some(wrapped) => wrapped.downcast::<T>().ok(),
            None => {
                let wrapper = entry.wrapper;
                self.forward.remove(&raw);
                self.inverse.remove(&wrapper);
                None
            }
        }
    }

    /// The raw handle behind a façade, if the façade is known.
    pub fn raw_for(&mut self, wrapper: WrapperId) -> Option<RawHandle> {
        let raw = self.inverse.get(&wrapper)?.upgrade();
        if raw.is_none() {
            self.inverse.remove(&wrapper);
        }
        raw
    }

    /// Forget the association made for `wrapper`. A newer association of `raw` is kept.
    pub fn evict(&mut self, raw: HandleId, wrapper: WrapperId) {
        if self
            .forward
            .get(&raw)
            .is_some_and(|entry| entry.wrapper == wrapper)
        {
            self.forward.remove(&raw);
        }
        self.inverse.remove(&wrapper);
    }

    /// Evict from this thread's cache without panicking if it is busy or being torn down.
    pub(crate) fn evict_quietly(raw: HandleId, wrapper: WrapperId) {
        let _ = CACHE.try_with(|cache| {
            if let Ok(mut cache) = cache.try_borrow_mut() {
                cache.evict(raw, wrapper);
            }
        });
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::traits::{
        Event, EventKind, EventTarget, Issued, Listener, ListenerId, ListenerOptions, RawIdentity,
        RawRequest, RawResult, RawTransaction,
    };
    use crate::types::ReadyState;

    struct Dummy(HandleId);

    impl RawIdentity for Dummy {
        fn handle_id(&self) -> HandleId {
            self.0
        }
    }

    impl EventTarget for Dummy {
        fn add_event_listener(&self, _: EventKind, _: Listener, _: ListenerOptions) -> ListenerId {
            ListenerId(0)
        }

        fn remove_event_listener(&self, _: EventKind, _: ListenerId) {}
    }

    impl RawRequest for Dummy {
        fn ready_state(&self) -> ReadyState {
            ReadyState::Pending
        }

        fn result(&self) -> Result<RawResult, StoreError> {
            Err(StoreError::invalid_state("pending"))
        }

        fn error(&self) -> Option<StoreError> {
            None
        }

        fn transaction(&self) -> Option<Rc<dyn RawTransaction>> {
            None
        }
    }

    fn raw() -> (Rc<dyn RawRequest>, RawHandle) {
        let request: Rc<dyn RawRequest> = Rc::new(Dummy(HandleId::next()));
        let handle = RawHandle::Request(request.clone());
        (request, handle)
    }

    #[test]
    fn test_associate_and_lookup_both_ways() {
        let mut cache = IdentityCache::default();
        let (_request, handle) = raw();
        let wrapped: Rc<dyn Any> = Rc::new(String::from("facade"));
        let wrapper = WrapperId::next();

        cache.associate(&handle, wrapper, Rc::downgrade(&wrapped));

        let found = cache.wrapped_for::<String>(handle.handle_id()).unwrap();
        assert_eq!(found.as_str(), "facade");
        assert!(cache.wrapped_for::<u32>(handle.handle_id()).is_none());
        assert!(cache.raw_for(wrapper).unwrap().same_as(&handle));
    }

    #[test]
    fn test_cache_does_not_keep_either_side_alive() {
        let mut cache = IdentityCache::default();
        let (request, handle) = raw();
        let id = handle.handle_id();
        let wrapped: Rc<dyn Any> = Rc::new(1u8);
        let wrapper = WrapperId::next();
        cache.associate(&handle, wrapper, Rc::downgrade(&wrapped));
        drop(handle);

        drop(wrapped);
        assert!(cache.wrapped_for::<u8>(id).is_none());
        assert!(cache.is_empty());

        drop(request);
        assert!(cache.raw_for(wrapper).is_none());
    }

    #[test]
    fn test_evict_keeps_newer_association() {
        let mut cache = IdentityCache::default();
        let (_request, handle) = raw();
        let first: Rc<dyn Any> = Rc::new(1u8);
        let second: Rc<dyn Any> = Rc::new(2u8);
        let (old, new) = (WrapperId::next(), WrapperId::next());

        cache.associate(&handle, old, Rc::downgrade(&first));
        cache.associate(&handle, new, Rc::downgrade(&second));
        cache.evict(handle.handle_id(), old);

        assert_eq!(*cache.wrapped_for::<u8>(handle.handle_id()).unwrap(), 2);
        assert!(cache.raw_for(old).is_none());
        assert!(cache.raw_for(new).is_some());
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let mut cache = IdentityCache::default();
        assert!(cache.wrapped_for::<u8>(HandleId::next()).is_none());
        assert!(cache.raw_for(WrapperId::next()).is_none());
        let _ = Event::new(EventKind::Success);
        let _: Option<Issued> = None;
    }
}
