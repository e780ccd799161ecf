//! Configuration for object stores, indexes, transactions and the memory backend.
//!
//! Every struct here is built with `typed-builder`, mirroring the options the underlying
//! store accepts.

use crate::types::{Durability, KeyPath};
use typed_builder::TypedBuilder;

/// Options for `create_object_store`.
///
/// # Examples
///
/// ```
/// use netabase_idb::config::ObjectStoreParameters;
///
/// // Out-of-line keys, supplied on every insert
/// let params = ObjectStoreParameters::default();
/// assert!(params.key_path.is_none());
///
/// // In-line keys generated by the store
/// let params = ObjectStoreParameters::builder()
///     .key_path("id")
///     .auto_increment(true)
///     .build();
/// assert!(params.auto_increment);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
#[builder(doc)]
pub struct ObjectStoreParameters {
    /// Where the primary key lives inside each stored value
    #[builder(default, setter(strip_option, into))]
    pub key_path: Option<KeyPath>,

    /// Whether the store keeps a key generator
    #[builder(default = false)]
    pub auto_increment: bool,
}

/// Options for `create_index`.
///
/// # Examples
///
/// ```
/// use netabase_idb::config::IndexParameters;
///
/// let params = IndexParameters::builder().unique(true).build();
/// assert!(params.unique);
/// assert!(!params.multi_entry);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, TypedBuilder)]
#[builder(doc)]
pub struct IndexParameters {
    /// Reject two records with the same index key
    #[builder(default = false)]
    pub unique: bool,

    /// Index every element of an array-valued key separately
    #[builder(default = false)]
    pub multi_entry: bool,
}

/// Options for `Database::transaction`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, TypedBuilder)]
#[builder(doc)]
pub struct TransactionOptions {
    #[builder(default)]
    pub durability: Durability,
}

/// Configuration for the in-memory backend.
///
/// # Examples
///
/// ```
/// use netabase_idb::config::MemoryConfig;
///
/// let config = MemoryConfig::builder()
///     .task_budget(10_000)
///     .build();
/// assert_eq!(config.task_budget, 10_000);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct MemoryConfig {
    /// Maximum number of tasks a single `run_until` call may run before giving up
    #[builder(default = 1_000_000)]
    pub task_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            task_budget: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_store_parameters_builder() {
        let params = ObjectStoreParameters::builder()
            .key_path(KeyPath::from(vec!["a", "b"]))
            .build();

        assert_eq!(
            params.key_path,
            Some(KeyPath::Sequence(vec!["a".into(), "b".into()]))
        );
        assert!(!params.auto_increment);
    }

    #[test]
    fn test_transaction_options_default() {
        let options = TransactionOptions::default();
        assert_eq!(options.durability, Durability::Default);
    }

    #[test]
    fn test_memory_config_default() {
        let config = MemoryConfig::default();
        assert_eq!(config.task_budget, 1_000_000);
    }
}
