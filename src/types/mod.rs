//! Plain data exchanged with the store: keys, values, key paths and mode enums.

pub mod key;
pub mod mode;
pub mod value;

pub use key::{Key, KeyRange, Query};
pub use mode::{CursorDirection, Durability, ReadyState, TransactionMode};
pub use value::{KeyPath, Value};
