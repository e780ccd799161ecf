//! Conversions between crate data and JavaScript values.

use crate::error::{ErrorKind, StoreError};
use crate::types::{
    CursorDirection, Durability, Key, KeyPath, KeyRange, Query, TransactionMode, Value,
};
use chrono::DateTime;
use js_sys::{Array, Date, Object, Reflect, Uint8Array};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::str::FromStr;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    DomException, DomStringList, IdbCursorDirection, IdbKeyRange, IdbTransactionDurability,
    IdbTransactionMode,
};

pub(crate) fn value_to_js(value: &Value) -> JsValue {
    match value {
        Value::Undefined => JsValue::UNDEFINED,
        Value::Null => JsValue::NULL,
        Value::Bool(b) => JsValue::from_bool(*b),
        Value::Number(n) => JsValue::from_f64(*n),
        Value::String(s) => JsValue::from_str(s),
        Value::Bytes(bytes) => Uint8Array::from(bytes.as_slice()).into(),
        Value::Date(date) => Date::new(&JsValue::from_f64(date.timestamp_millis() as f64)).into(),
        Value::Array(items) => items.iter().map(value_to_js).collect::<Array>().into(),
        Value::Object(fields) => {
            let object = Object::new();
            for (field, value) in fields {
                let _ = Reflect::set(&object, &JsValue::from_str(field), &value_to_js(value));
            }
            object.into()
        }
    }
}

pub(crate) fn value_from_js(value: &JsValue) -> Value {
    if value.is_undefined() {
        return Value::Undefined;
    }
    if value.is_null() {
        return Value::Null;
    }
    if let Some(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Some(n) = value.as_f64() {
        return Value::Number(n);
    }
    if let Some(s) = value.as_string() {
        return Value::String(s);
    }
    if let Some(date) = value.dyn_ref::<Date>() {
        return DateTime::from_timestamp_millis(date.get_time() as i64)
            .map(Value::Date)
            .unwrap_or(Value::Null);
    }
    if Array::is_array(value) {
        return Value::Array(Array::from(value).iter().map(|item| value_from_js(&item)).collect());
    }
    if value.is_instance_of::<Uint8Array>() || value.is_instance_of::<js_sys::ArrayBuffer>() {
        return Value::Bytes(Uint8Array::new(value).to_vec());
    }
    match value.dyn_ref::<Object>() {
        Some(object) => {
            let fields: BTreeMap<String, Value> = Object::keys(object)
                .iter()
                .filter_map(|field| {
                    let name = field.as_string()?;
                    let value = Reflect::get(object, &field).ok()?;
                    Some((name, value_from_js(&value)))
                })
                .collect();
            Value::Object(fields)
        }
        None => Value::Undefined,
    }
}

pub(crate) fn key_to_js(key: &Key) -> JsValue {
    value_to_js(&Value::from(key.clone()))
}

pub(crate) fn key_from_js(value: &JsValue) -> Option<Key> {
    value_from_js(value).to_key()
}

pub(crate) fn key_path_to_js(path: &KeyPath) -> JsValue {
    match path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Sequence(paths) => paths
            .iter()
            .map(|path| JsValue::from_str(path))
            .collect::<Array>()
            .into(),
    }
}

pub(crate) fn key_path_from_js(value: &JsValue) -> Option<KeyPath> {
    if let Some(path) = value.as_string() {
        return Some(KeyPath::Single(path));
    }
    if Array::is_array(value) {
        let paths = Array::from(value).iter().filter_map(|path| path.as_string()).collect();
        return Some(KeyPath::Sequence(paths));
    }
    None
}

pub(crate) fn range_to_js(range: &KeyRange) -> Result<JsValue, StoreError> {
    let open = |bound: &Bound<&Key>| matches!(bound, Bound::Excluded(_));
    let range = match range.bounds() {
        (Bound::Unbounded, Bound::Unbounded) => return Ok(JsValue::UNDEFINED),
        (Bound::Included(lower), Bound::Included(upper)) if lower == upper => {
            IdbKeyRange::only(&key_to_js(lower))
        }
        (lower @ (Bound::Included(l) | Bound::Excluded(l)), Bound::Unbounded) => {
            IdbKeyRange::lower_bound_with_open(&key_to_js(l), open(&lower))
        }
        (Bound::Unbounded, upper @ (Bound::Included(u) | Bound::Excluded(u))) => {
            IdbKeyRange::upper_bound_with_open(&key_to_js(u), open(&upper))
        }
        (
            lower @ (Bound::Included(l) | Bound::Excluded(l)),
            upper @ (Bound::Included(u) | Bound::Excluded(u)),
        ) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &key_to_js(l),
            &key_to_js(u),
            open(&lower),
            open(&upper),
        ),
    };
    range.map(Into::into).map_err(error_from_js)
}

pub(crate) fn query_to_js(query: &Query) -> Result<JsValue, StoreError> {
    match query {
        Query::All => Ok(JsValue::UNDEFINED),
        Query::Key(key) => Ok(key_to_js(key)),
        Query::Range(range) => range_to_js(range),
    }
}

pub(crate) fn names(list: DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}

pub(crate) fn exception_to_error(exception: &DomException) -> StoreError {
    let kind = ErrorKind::from_str(&exception.name()).unwrap_or(ErrorKind::UnknownError);
    StoreError::new(kind, exception.message())
}

/// Map a thrown value to a store error, keeping the DOM exception name as the kind.
pub(crate) fn error_from_js(error: JsValue) -> StoreError {
    if let Some(exception) = error.dyn_ref::<DomException>() {
        return exception_to_error(exception);
    }
    if let Some(error) = error.dyn_ref::<js_sys::Error>() {
        let kind = ErrorKind::from_str(&String::from(error.name()))
            .unwrap_or(ErrorKind::UnknownError);
        return StoreError::new(kind, String::from(error.message()));
    }
    StoreError::new(
        ErrorKind::UnknownError,
        error.as_string().unwrap_or_else(|| format!("{error:?}")),
    )
}

pub(crate) fn mode_to_js(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        TransactionMode::VersionChange => IdbTransactionMode::Versionchange,
    }
}

pub(crate) fn mode_from_js(mode: IdbTransactionMode) -> TransactionMode {
    match mode {
        IdbTransactionMode::Readwrite => TransactionMode::ReadWrite,
        IdbTransactionMode::Versionchange => TransactionMode::VersionChange,
        _ => TransactionMode::ReadOnly,
    }
}

pub(crate) fn durability_to_js(durability: Durability) -> IdbTransactionDurability {
    match durability {
        Durability::Default => IdbTransactionDurability::Default,
        Durability::Strict => IdbTransactionDurability::Strict,
        Durability::Relaxed => IdbTransactionDurability::Relaxed,
    }
}

pub(crate) fn durability_from_js(durability: IdbTransactionDurability) -> Durability {
    match durability {
        IdbTransactionDurability::Strict => Durability::Strict,
        IdbTransactionDurability::Relaxed => Durability::Relaxed,
        _ => Durability::Default,
    }
}

pub(crate) fn direction_to_js(direction: CursorDirection) -> IdbCursorDirection {
    match direction {
        CursorDirection::Next => IdbCursorDirection::Next,
        CursorDirection::NextUnique => IdbCursorDirection::Nextunique,
        CursorDirection::Prev => IdbCursorDirection::Prev,
        CursorDirection::PrevUnique => IdbCursorDirection::Prevunique,
    }
}

pub(crate) fn direction_from_js(direction: IdbCursorDirection) -> CursorDirection {
    match direction {
        IdbCursorDirection::Nextunique => CursorDirection::NextUnique,
        IdbCursorDirection::Prev => CursorDirection::Prev,
        IdbCursorDirection::Prevunique => CursorDirection::PrevUnique,
        _ => CursorDirection::Next,
    }
}
