//! The browser's IndexedDB, seen through the raw store traits.
//!
//! Every `web-sys` handle is wrapped in a thin struct implementing the matching raw trait.
//! Handle identity comes from a `WeakMap` keyed by the JavaScript object, so two wrappers around
//! the same IndexedDB object report the same [`HandleId`].

mod convert;
mod raw;

use crate::error::{ErrorKind, NetabaseResult, StoreError};
use crate::traits::{
    DatabaseInfo, Event, EventKind, HandleId, Issued, Listener, ListenerId, ListenerOptions,
    RawFactory, RawRequest, RawResult,
};
use crate::types::Key;
use convert::{error_from_js, key_to_js};
use js_sys::{Array, Function, Object, Promise, Reflect, WeakMap};
use log::{trace, warn};
use raw::{Expect, PromiseRequest, WebRequest};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{AddEventListenerOptions, IdbFactory, IdbRequest, IdbVersionChangeEvent};

thread_local! {
    static HANDLE_IDS: WeakMap = WeakMap::new();
    static DISPATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// The identity of a JavaScript object, stable for as long as the object lives.
pub(crate) fn handle_id_of(object: &JsValue) -> HandleId {
    let Some(object) = object.dyn_ref::<Object>() else {
        return HandleId::next();
    };
    HANDLE_IDS.with(|ids| {
        if let Some(id) = ids.get(object).as_f64() {
            return HandleId(id as u64);
        }
        let id = HandleId::next();
        ids.set(object, &JsValue::from_f64(id.0 as f64));
        id
    })
}

type JsListener = Closure<dyn FnMut(web_sys::Event)>;

/// Marks a listener as running until dropped.
struct Dispatching;

impl Dispatching {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Dispatching
    }

    fn idle() -> bool {
        DISPATCH_DEPTH.with(|depth| depth.get() == 0)
    }
}

impl Drop for Dispatching {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Listener bookkeeping for one `EventTarget`.
pub(crate) struct WebEvents {
    target: web_sys::EventTarget,
    next: Cell<u64>,
    active: RefCell<HashMap<ListenerId, (EventKind, JsListener)>>,
    // Removed closures may still be running; they are freed once no listener is.
    retired: RefCell<Vec<JsListener>>,
}

impl WebEvents {
    pub(crate) fn new(target: web_sys::EventTarget) -> Self {
        Self {
            target,
            next: Cell::new(1),
            active: RefCell::new(HashMap::new()),
            retired: RefCell::new(Vec::new()),
        }
    }

    fn release_retired(&self) {
        if !Dispatching::idle() {
            return;
        }
        let released = std::mem::take(&mut *self.retired.borrow_mut());
        if !released.is_empty() {
            trace!("released {} retired listeners", released.len());
        }
    }

    pub(crate) fn retired_len(&self) -> usize {
        self.retired.borrow().len()
    }

    pub(crate) fn add(
        &self,
        kind: EventKind,
        mut listener: Listener,
        options: ListenerOptions,
    ) -> ListenerId {
        self.release_retired();
        let id = ListenerId(self.next.get());
        self.next.set(id.0 + 1);
        let closure = JsListener::new(move |event: web_sys::Event| {
            let _dispatching = Dispatching::enter();
            listener(&to_event(kind, &event))
        });
        let js_options = AddEventListenerOptions::new();
        js_options.set_once(options.once);
        if let Err(error) = self
            .target
            .add_event_listener_with_callback_and_add_event_listener_options(
                kind.as_ref(),
                closure.as_ref().unchecked_ref(),
                &js_options,
            )
        {
            warn!("could not listen for {kind}: {error:?}");
        }
        trace!("listening for {kind} as {id}");
        self.active.borrow_mut().insert(id, (kind, closure));
        id
    }

    pub(crate) fn remove(&self, kind: EventKind, id: ListenerId) {
        self.release_retired();
        let removed = self.active.borrow_mut().remove(&id);
        if let Some((registered, closure)) = removed {
            debug_assert_eq!(registered, kind);
            let _ = self.target.remove_event_listener_with_callback(
                registered.as_ref(),
                closure.as_ref().unchecked_ref(),
            );
            self.retired.borrow_mut().push(closure);
        }
    }
}

impl Drop for WebEvents {
    fn drop(&mut self) {
        for (_, (kind, closure)) in self.active.get_mut().drain() {
            let _ = self.target.remove_event_listener_with_callback(
                kind.as_ref(),
                closure.as_ref().unchecked_ref(),
            );
        }
    }
}

fn to_event(kind: EventKind, event: &web_sys::Event) -> Event {
    match event.dyn_ref::<IdbVersionChangeEvent>() {
        Some(change) => Event::with_versions(
            kind,
            change.old_version() as u64,
            change.new_version().map(|version| version as u64),
        ),
        None => Event::new(kind),
    }
}

/// The page's `indexedDB` factory.
pub struct WebFactory {
    factory: IdbFactory,
}

impl WebFactory {
    pub fn new(factory: IdbFactory) -> Self {
        Self { factory }
    }

    /// The factory of the current window.
    pub fn from_window() -> NetabaseResult<Self> {
        let window = web_sys::window().ok_or_else(|| {
            StoreError::new(ErrorKind::InvalidStateError, "No window is available")
        })?;
        let factory = window
            .indexed_db()
            .map_err(error_from_js)?
            .ok_or_else(|| {
                StoreError::new(ErrorKind::InvalidStateError, "IndexedDB is not available")
            })?;
        Ok(Self::new(factory))
    }
}

impl RawFactory for WebFactory {
    fn open(&self, name: &str, version: Option<u64>) -> Issued {
        let request = match version {
            Some(version) => self.factory.open_with_f64(name, version as f64),
            None => self.factory.open(name),
        }
        .map_err(error_from_js)?;
        let request: Rc<dyn RawRequest> =
            WebRequest::new(request.unchecked_into::<IdbRequest>(), Expect::Database);
        Ok(request)
    }

    fn delete_database(&self, name: &str) -> Issued {
        let request = self.factory.delete_database(name).map_err(error_from_js)?;
        let request: Rc<dyn RawRequest> =
            WebRequest::new(request.unchecked_into::<IdbRequest>(), Expect::Undefined);
        Ok(request)
    }

    fn databases(&self) -> Issued {
        let method: Function = Reflect::get(&self.factory, &JsValue::from_str("databases"))
            .map_err(error_from_js)?
            .dyn_into()
            .map_err(|_| {
                StoreError::new(ErrorKind::UnknownError, "indexedDB.databases() is not supported")
            })?;
        let promise: Promise = method
            .call0(&self.factory)
            .map_err(error_from_js)?
            .dyn_into()
            .map_err(error_from_js)?;
        let request: Rc<dyn RawRequest> = PromiseRequest::new(promise, |value| {
            RawResult::Databases(database_infos(value))
        });
        Ok(request)
    }

    fn cmp(&self, a: &Key, b: &Key) -> Ordering {
        match self.factory.cmp(&key_to_js(a), &key_to_js(b)) {
            Ok(order) => order.cmp(&0),
            Err(_) => a.cmp(b),
        }
    }
}

fn database_infos(value: JsValue) -> Vec<DatabaseInfo> {
    Array::from(&value)
        .iter()
        .filter_map(|info| {
            let name = Reflect::get(&info, &JsValue::from_str("name")).ok()?.as_string()?;
            let version = Reflect::get(&info, &JsValue::from_str("version")).ok()?.as_f64()?;
            Some(DatabaseInfo {
                name,
                version: version as u64,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn target() -> web_sys::EventTarget {
        web_sys::EventTarget::new().unwrap()
    }

    #[wasm_bindgen_test]
    fn test_removed_listeners_do_not_accumulate() {
        let events = WebEvents::new(target());
        for _ in 0..50 {
            let id = events.add(EventKind::Success, Box::new(|_| {}), ListenerOptions::ONCE);
            events.remove(EventKind::Success, id);
        }
        assert!(events.retired_len() <= 1);
    }

    #[wasm_bindgen_test]
    fn test_listener_removed_while_running_is_released_afterwards() {
        let events = Rc::new(WebEvents::new(target()));
        let fired = Rc::new(Cell::new(0));
        let registered = Rc::new(Cell::new(None));
        let listener: Listener = {
            let (events, fired, registered) =
                (Rc::downgrade(&events), fired.clone(), registered.clone());
            Box::new(move |_| {
                fired.set(fired.get() + 1);
                if let (Some(events), Some(id)) = (events.upgrade(), registered.get()) {
                    events.remove(EventKind::Success, id);
                }
            })
        };
        let id = events.add(EventKind::Success, listener, ListenerOptions::default());
        registered.set(Some(id));

        let event = web_sys::Event::new("success").unwrap();
        events.target.dispatch_event(&event).unwrap();
        // VERIFY: the running closure was kept until its dispatch returned
        assert_eq!(fired.get(), 1);
        assert_eq!(events.retired_len(), 1);

        let id = events.add(EventKind::Error, Box::new(|_| {}), ListenerOptions::ONCE);
        assert_eq!(events.retired_len(), 0);
        events.remove(EventKind::Error, id);

        let event = web_sys::Event::new("success").unwrap();
        events.target.dispatch_event(&event).unwrap();
        assert_eq!(fired.get(), 1);
    }
}
