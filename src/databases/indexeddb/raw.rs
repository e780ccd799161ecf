//! `web-sys` handles behind the raw store traits.

use super::convert::{
    direction_from_js, direction_to_js, durability_from_js, durability_to_js, error_from_js,
    exception_to_error, key_from_js, key_path_from_js, key_path_to_js, key_to_js, mode_from_js,
    mode_to_js, names, query_to_js, value_from_js, value_to_js,
};
use super::{handle_id_of, WebEvents};
use crate::config::{IndexParameters, ObjectStoreParameters, TransactionOptions};
use crate::error::{ErrorKind, StoreError};
use crate::traits::{
    CursorSource, EventKind, EventTarget, HandleId, Issued, Listener, ListenerId, ListenerOptions,
    RawCursor, RawDatabase, RawIdentity, RawIndex, RawObjectStore, RawRequest, RawResult,
    RawTransaction,
};
use crate::types::{
    CursorDirection, Durability, Key, KeyPath, Query, ReadyState, TransactionMode, Value,
};
use futures::future::LocalBoxFuture;
use js_sys::{Array, Promise};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    IdbCursor, IdbCursorWithValue, IdbDatabase, IdbIndex, IdbIndexParameters, IdbObjectStore,
    IdbObjectStoreParameters, IdbRequest, IdbRequestReadyState, IdbTransaction,
    IdbTransactionOptions,
};

/// How to read a request's `result` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Undefined,
    Value,
    Key,
    Count,
    Values,
    Keys,
    Cursor { key_only: bool },
    Database,
}

fn issued(request: Result<IdbRequest, JsValue>, expect: Expect) -> Issued {
    let request: Rc<dyn RawRequest> = WebRequest::new(request.map_err(error_from_js)?, expect);
    Ok(request)
}

macro_rules! impl_identity {
    ($($handle:ident),*) => {
        $(
            impl RawIdentity for $handle {
                fn handle_id(&self) -> HandleId {
                    self.id
                }
            }
        )*
    };
}

macro_rules! impl_event_target {
    ($($handle:ident),*) => {
        $(
            impl EventTarget for $handle {
                fn add_event_listener(
                    &self,
                    kind: EventKind,
                    listener: Listener,
                    options: ListenerOptions,
                ) -> ListenerId {
                    self.events.add(kind, listener, options)
                }

                fn remove_event_listener(&self, kind: EventKind, id: ListenerId) {
                    self.events.remove(kind, id)
                }
            }
        )*
    };
}

impl_identity!(
    WebRequest,
    PromiseRequest,
    WebDatabase,
    WebTransaction,
    WebObjectStore,
    WebIndex,
    WebCursor
);
impl_event_target!(WebRequest, WebDatabase, WebTransaction);

pub(crate) struct WebRequest {
    id: HandleId,
    request: IdbRequest,
    expect: Expect,
    events: WebEvents,
}

impl WebRequest {
    pub(crate) fn new(request: IdbRequest, expect: Expect) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&request),
            events: WebEvents::new(request.clone().into()),
            request,
            expect,
        })
    }

    fn convert(&self, result: JsValue) -> RawResult {
        match self.expect {
            Expect::Undefined => RawResult::Undefined,
            Expect::Value if result.is_undefined() => RawResult::Undefined,
            Expect::Value => RawResult::Value(value_from_js(&result)),
            Expect::Key => key_from_js(&result)
                .map(RawResult::Key)
                .unwrap_or(RawResult::Undefined),
            Expect::Count => RawResult::Count(result.as_f64().unwrap_or_default() as u64),
            Expect::Values => {
                RawResult::Values(Array::from(&result).iter().map(|v| value_from_js(&v)).collect())
            }
            Expect::Keys => RawResult::Keys(
                Array::from(&result)
                    .iter()
                    .filter_map(|k| key_from_js(&k))
                    .collect(),
            ),
            Expect::Cursor { key_only } => match result.dyn_into::<IdbCursor>() {
                Ok(cursor) => RawResult::Cursor(Some(WebCursor::new(cursor, key_only))),
                Err(_) => RawResult::Cursor(None),
            },
            Expect::Database => match result.dyn_into::<IdbDatabase>() {
                Ok(db) => RawResult::Database(WebDatabase::new(db)),
                Err(other) => RawResult::Value(value_from_js(&other)),
            },
        }
    }
}

impl RawRequest for WebRequest {
    fn ready_state(&self) -> ReadyState {
        match self.request.ready_state() {
            IdbRequestReadyState::Done => ReadyState::Done,
            _ => ReadyState::Pending,
        }
    }

    fn result(&self) -> Result<RawResult, StoreError> {
        let result = self.request.result().map_err(error_from_js)?;
        Ok(self.convert(result))
    }

    fn error(&self) -> Option<StoreError> {
        self.request
            .error()
            .ok()
            .flatten()
            .map(|exception| exception_to_error(&exception))
    }

    fn transaction(&self) -> Option<Rc<dyn RawTransaction>> {
        let tx: Rc<dyn RawTransaction> = WebTransaction::new(self.request.transaction()?);
        Some(tx)
    }
}

/// A promise standing in for a request. It settles through `native_completion` only.
pub(crate) struct PromiseRequest {
    id: HandleId,
    promise: RefCell<Option<Promise>>,
    convert: fn(JsValue) -> RawResult,
    next: Cell<u64>,
}

impl PromiseRequest {
    pub(crate) fn new(promise: Promise, convert: fn(JsValue) -> RawResult) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&promise),
            promise: RefCell::new(Some(promise)),
            convert,
            next: Cell::new(1),
        })
    }
}

impl EventTarget for PromiseRequest {
    fn add_event_listener(&self, _: EventKind, _: Listener, _: ListenerOptions) -> ListenerId {
        let id = ListenerId(self.next.get());
        self.next.set(id.0 + 1);
        id
    }

    fn remove_event_listener(&self, _: EventKind, _: ListenerId) {}
}

impl RawRequest for PromiseRequest {
    fn ready_state(&self) -> ReadyState {
        ReadyState::Pending
    }

    fn result(&self) -> Result<RawResult, StoreError> {
        Err(StoreError::invalid_state("The result is delivered by the promise"))
    }

    fn error(&self) -> Option<StoreError> {
        None
    }

    fn transaction(&self) -> Option<Rc<dyn RawTransaction>> {
        None
    }

    fn native_completion(&self) -> Option<LocalBoxFuture<'static, Result<RawResult, StoreError>>> {
        let promise = self.promise.borrow_mut().take()?;
        let convert = self.convert;
        Some(Box::pin(async move {
            let value = JsFuture::from(promise).await.map_err(error_from_js)?;
            Ok(convert(value))
        }))
    }
}

pub(crate) struct WebDatabase {
    id: HandleId,
    db: IdbDatabase,
    events: WebEvents,
}

impl WebDatabase {
    pub(crate) fn new(db: IdbDatabase) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&db),
            events: WebEvents::new(db.clone().into()),
            db,
        })
    }
}

impl RawDatabase for WebDatabase {
    fn name(&self) -> String {
        self.db.name()
    }

    fn version(&self) -> u64 {
        self.db.version() as u64
    }

    fn object_store_names(&self) -> Vec<String> {
        names(self.db.object_store_names())
    }

    fn create_object_store(
        &self,
        name: &str,
        params: &ObjectStoreParameters,
    ) -> Result<Rc<dyn RawObjectStore>, StoreError> {
        let parameters = IdbObjectStoreParameters::new();
        parameters.set_auto_increment(params.auto_increment);
        if let Some(path) = &params.key_path {
            parameters.set_key_path(&key_path_to_js(path));
        }
        let store = self
            .db
            .create_object_store_with_optional_parameters(name, &parameters)
            .map_err(error_from_js)?;
        Ok(WebObjectStore::new(store))
    }

    fn delete_object_store(&self, name: &str) -> Result<(), StoreError> {
        self.db.delete_object_store(name).map_err(error_from_js)
    }

    fn transaction(
        &self,
        scope: &[String],
        mode: TransactionMode,
        options: TransactionOptions,
    ) -> Result<Rc<dyn RawTransaction>, StoreError> {
        let scope: Array = scope.iter().map(|name| JsValue::from_str(name)).collect();
        let js_options = IdbTransactionOptions::new();
        js_options.set_durability(durability_to_js(options.durability));
        let tx = self
            .db
            .transaction_with_str_sequence_and_mode_and_options(
                &scope,
                mode_to_js(mode),
                &js_options,
            )
            .map_err(error_from_js)?;
        Ok(WebTransaction::new(tx))
    }

    fn close(&self) {
        self.db.close();
    }
}

pub(crate) struct WebTransaction {
    id: HandleId,
    tx: IdbTransaction,
    events: WebEvents,
}

impl WebTransaction {
    pub(crate) fn new(tx: IdbTransaction) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&tx),
            events: WebEvents::new(tx.clone().into()),
            tx,
        })
    }
}

impl RawTransaction for WebTransaction {
    fn mode(&self) -> TransactionMode {
        self.tx.mode().map(mode_from_js).unwrap_or_default()
    }

    fn durability(&self) -> Durability {
        durability_from_js(self.tx.durability())
    }

    fn object_store_names(&self) -> Vec<String> {
        names(self.tx.object_store_names())
    }

    fn db(&self) -> Rc<dyn RawDatabase> {
        WebDatabase::new(self.tx.db())
    }

    fn error(&self) -> Option<StoreError> {
        self.tx.error().map(|exception| exception_to_error(&exception))
    }

    fn object_store(&self, name: &str) -> Result<Rc<dyn RawObjectStore>, StoreError> {
        let store = self.tx.object_store(name).map_err(error_from_js)?;
        Ok(WebObjectStore::new(store))
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.tx.commit().map_err(error_from_js)
    }

    fn abort(&self) -> Result<(), StoreError> {
        self.tx.abort().map_err(error_from_js)
    }
}

pub(crate) struct WebObjectStore {
    id: HandleId,
    store: IdbObjectStore,
}

impl WebObjectStore {
    pub(crate) fn new(store: IdbObjectStore) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&store),
            store,
        })
    }
}

impl RawObjectStore for WebObjectStore {
    fn name(&self) -> String {
        self.store.name()
    }

    fn set_name(&self, name: &str) -> Result<(), StoreError> {
        self.store.set_name(name);
        Ok(())
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.store.key_path().ok().and_then(|path| key_path_from_js(&path))
    }

    fn auto_increment(&self) -> bool {
        self.store.auto_increment()
    }

    fn index_names(&self) -> Vec<String> {
        names(self.store.index_names())
    }

    fn transaction(&self) -> Rc<dyn RawTransaction> {
        WebTransaction::new(self.store.transaction())
    }

    fn add(&self, value: Value, key: Option<Key>) -> Issued {
        let value = value_to_js(&value);
        let request = match key {
            Some(key) => self.store.add_with_key(&value, &key_to_js(&key)),
            None => self.store.add(&value),
        };
        issued(request, Expect::Key)
    }

    fn put(&self, value: Value, key: Option<Key>) -> Issued {
        let value = value_to_js(&value);
        let request = match key {
            Some(key) => self.store.put_with_key(&value, &key_to_js(&key)),
            None => self.store.put(&value),
        };
        issued(request, Expect::Key)
    }

    fn delete(&self, query: Query) -> Issued {
        issued(self.store.delete(&query_to_js(&query)?), Expect::Undefined)
    }

    fn clear(&self) -> Issued {
        issued(self.store.clear(), Expect::Undefined)
    }

    fn get(&self, query: Query) -> Issued {
        issued(self.store.get(&query_to_js(&query)?), Expect::Value)
    }

    fn get_key(&self, query: Query) -> Issued {
        issued(self.store.get_key(&query_to_js(&query)?), Expect::Key)
    }

    fn get_all(&self, query: Query, count: Option<u32>) -> Issued {
        let query = query_to_js(&query)?;
        let request = match count {
            Some(count) => self.store.get_all_with_key_and_limit(&query, count),
            None => self.store.get_all_with_key(&query),
        };
        issued(request, Expect::Values)
    }

    fn get_all_keys(&self, query: Query, count: Option<u32>) -> Issued {
        let query = query_to_js(&query)?;
        let request = match count {
            Some(count) => self.store.get_all_keys_with_key_and_limit(&query, count),
            None => self.store.get_all_keys_with_key(&query),
        };
        issued(request, Expect::Keys)
    }

    fn count(&self, query: Query) -> Issued {
        issued(self.store.count_with_key(&query_to_js(&query)?), Expect::Count)
    }

    fn open_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        let request = self.store.open_cursor_with_range_and_direction(
            &query_to_js(&query)?,
            direction_to_js(direction),
        );
        issued(request, Expect::Cursor { key_only: false })
    }

    fn open_key_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        let request = self.store.open_key_cursor_with_range_and_direction(
            &query_to_js(&query)?,
            direction_to_js(direction),
        );
        issued(request, Expect::Cursor { key_only: true })
    }

    fn index(&self, name: &str) -> Result<Rc<dyn RawIndex>, StoreError> {
        let index = self.store.index(name).map_err(error_from_js)?;
        Ok(WebIndex::new(index))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParameters,
    ) -> Result<Rc<dyn RawIndex>, StoreError> {
        let parameters = IdbIndexParameters::new();
        parameters.set_unique(params.unique);
        parameters.set_multi_entry(params.multi_entry);
        let index = match &key_path {
            KeyPath::Single(path) => self
                .store
                .create_index_with_str_and_optional_parameters(name, path, &parameters),
            KeyPath::Sequence(_) => self
                .store
                .create_index_with_str_sequence_and_optional_parameters(
                    name,
                    &key_path_to_js(&key_path),
                    &parameters,
                ),
        }
        .map_err(error_from_js)?;
        Ok(WebIndex::new(index))
    }

    fn delete_index(&self, name: &str) -> Result<(), StoreError> {
        self.store.delete_index(name).map_err(error_from_js)
    }
}

pub(crate) struct WebIndex {
    id: HandleId,
    index: IdbIndex,
}

impl WebIndex {
    pub(crate) fn new(index: IdbIndex) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&index),
            index,
        })
    }
}

impl RawIndex for WebIndex {
    fn name(&self) -> String {
        self.index.name()
    }

    fn set_name(&self, name: &str) -> Result<(), StoreError> {
        self.index.set_name(name);
        Ok(())
    }

    fn key_path(&self) -> KeyPath {
        self.index
            .key_path()
            .ok()
            .and_then(|path| key_path_from_js(&path))
            .unwrap_or_else(|| KeyPath::Single(String::new()))
    }

    fn unique(&self) -> bool {
        self.index.unique()
    }

    fn multi_entry(&self) -> bool {
        self.index.multi_entry()
    }

    fn object_store(&self) -> Rc<dyn RawObjectStore> {
        WebObjectStore::new(self.index.object_store())
    }

    fn get(&self, query: Query) -> Issued {
        issued(self.index.get(&query_to_js(&query)?), Expect::Value)
    }

    fn get_key(&self, query: Query) -> Issued {
        issued(self.index.get_key(&query_to_js(&query)?), Expect::Key)
    }

    fn get_all(&self, query: Query, count: Option<u32>) -> Issued {
        let query = query_to_js(&query)?;
        let request = match count {
            Some(count) => self.index.get_all_with_key_and_limit(&query, count),
            None => self.index.get_all_with_key(&query),
        };
        issued(request, Expect::Values)
    }

    fn get_all_keys(&self, query: Query, count: Option<u32>) -> Issued {
        let query = query_to_js(&query)?;
        let request = match count {
            Some(count) => self.index.get_all_keys_with_key_and_limit(&query, count),
            None => self.index.get_all_keys_with_key(&query),
        };
        issued(request, Expect::Keys)
    }

    fn count(&self, query: Query) -> Issued {
        issued(self.index.count_with_key(&query_to_js(&query)?), Expect::Count)
    }

    fn open_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        let request = self.index.open_cursor_with_range_and_direction(
            &query_to_js(&query)?,
            direction_to_js(direction),
        );
        issued(request, Expect::Cursor { key_only: false })
    }

    fn open_key_cursor(&self, query: Query, direction: CursorDirection) -> Issued {
        let request = self.index.open_key_cursor_with_range_and_direction(
            &query_to_js(&query)?,
            direction_to_js(direction),
        );
        issued(request, Expect::Cursor { key_only: true })
    }
}

pub(crate) struct WebCursor {
    id: HandleId,
    cursor: IdbCursor,
    key_only: bool,
}

impl WebCursor {
    pub(crate) fn new(cursor: IdbCursor, key_only: bool) -> Rc<Self> {
        Rc::new(Self {
            id: handle_id_of(&cursor),
            cursor,
            key_only,
        })
    }
}

impl RawCursor for WebCursor {
    fn source(&self) -> CursorSource {
        let source = self.cursor.source();
        match source.dyn_into::<IdbIndex>() {
            Ok(index) => CursorSource::Index(WebIndex::new(index)),
            Err(source) => CursorSource::ObjectStore(WebObjectStore::new(source.unchecked_into())),
        }
    }

    fn direction(&self) -> CursorDirection {
        direction_from_js(self.cursor.direction())
    }

    fn key(&self) -> Option<Key> {
        self.cursor.key().ok().and_then(|key| key_from_js(&key))
    }

    fn primary_key(&self) -> Option<Key> {
        self.cursor.primary_key().ok().and_then(|key| key_from_js(&key))
    }

    fn value(&self) -> Option<Value> {
        if self.key_only {
            return None;
        }
        self.cursor
            .dyn_ref::<IdbCursorWithValue>()
            .and_then(|cursor| cursor.value().ok())
            .map(|value| value_from_js(&value))
    }

    fn request(&self) -> Rc<dyn RawRequest> {
        WebRequest::new(
            self.cursor.request(),
            Expect::Cursor {
                key_only: self.key_only,
            },
        )
    }

    fn advance(&self, count: u32) -> Result<(), StoreError> {
        if count == 0 {
            return Err(StoreError::new(
                ErrorKind::TypeError,
                "The count must be greater than zero",
            ));
        }
        self.cursor.advance(count).map_err(error_from_js)
    }

    fn continue_(&self, key: Option<Key>) -> Result<(), StoreError> {
        match key {
            Some(key) => self.cursor.continue_with_key(&key_to_js(&key)),
            None => self.cursor.continue_(),
        }
        .map_err(error_from_js)
    }

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> Result<(), StoreError> {
        self.cursor
            .continue_primary_key(&key_to_js(&key), &key_to_js(&primary_key))
            .map_err(error_from_js)
    }

    fn update(&self, value: Value) -> Issued {
        issued(self.cursor.update(&value_to_js(&value)), Expect::Key)
    }

    fn delete(&self) -> Issued {
        issued(self.cursor.delete(), Expect::Undefined)
    }
}
