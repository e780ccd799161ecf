use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub type NetabaseResult<T> = Result<T, NetabaseError>;

/// Error names as the underlying store reports them.
///
/// The spellings match DOM exception names so browser errors map one to one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, Serialize, Deserialize,
)]
pub enum ErrorKind {
    AbortError,
    ConstraintError,
    DataError,
    DataCloneError,
    InvalidAccessError,
    InvalidStateError,
    NotFoundError,
    QuotaExceededError,
    ReadOnlyError,
    TransactionInactiveError,
    VersionError,
    TypeError,
    UnknownError,
}

/// An error reported by the underlying store.
///
/// This value is forwarded to callers exactly as the store produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::AbortError, "The transaction was aborted")
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstraintError, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateError, message)
    }

    pub fn inactive() -> Self {
        Self::new(
            ErrorKind::TransactionInactiveError,
            "The transaction is not active",
        )
    }

    pub fn read_only() -> Self {
        Self::new(
            ErrorKind::ReadOnlyError,
            "The transaction is read-only",
        )
    }
}

#[derive(Error, Debug)]
pub enum NetabaseError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(StoreError),

    #[error("Migration Error: {0}")]
    Migration(#[source] anyhow::Error),

    #[error("Unexpected request result: expected {expected}, found {found}")]
    UnexpectedResult {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Request was dropped by the store before it settled")]
    RequestDropped,

    #[error("Event loop stalled with the awaited future still pending")]
    Stalled,

    #[error("Snapshot Error: {0}")]
    Snapshot(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetabaseError {
    /// The store error carried by this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            NetabaseError::Store(e) | NetabaseError::TransactionAborted(e) => Some(e),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.store_error().map(|e| e.kind)
    }
}

impl From<bincode::error::EncodeError> for NetabaseError {
    fn from(err: bincode::error::EncodeError) -> Self {
        NetabaseError::Snapshot(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for NetabaseError {
    fn from(err: bincode::error::DecodeError) -> Self {
        NetabaseError::Snapshot(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_error_kind_uses_dom_names() {
        assert_eq!(ErrorKind::ConstraintError.to_string(), "ConstraintError");
        assert_eq!(
            ErrorKind::from_str("TransactionInactiveError").unwrap(),
            ErrorKind::TransactionInactiveError
        );
        assert!(ErrorKind::from_str("NoSuchError").is_err());
    }

    #[test]
    fn test_store_error_is_carried_unchanged() {
        let store = StoreError::constraint("Key already exists in the object store");
        let err: NetabaseError = store.clone().into();
        assert_eq!(err.store_error(), Some(&store));
        assert_eq!(err.kind(), Some(ErrorKind::ConstraintError));
        assert_eq!(
            err.to_string(),
            "ConstraintError: Key already exists in the object store"
        );
    }
}
