//! Event vocabulary shared by every raw handle.

use derive_more::{Display, From};
use strum::{AsRefStr, EnumIter, EnumString};

/// The signals a raw handle can emit, spelled as the store spells them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Success,
    Error,
    Complete,
    Abort,
    Blocked,
    UpgradeNeeded,
    VersionChange,
    Close,
}

/// Version pair carried by `upgradeneeded`, `blocked` and `versionchange`.
///
/// `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u64,
    pub new_version: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub version_change: Option<VersionChange>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            version_change: None,
        }
    }

    pub fn with_versions(kind: EventKind, old_version: u64, new_version: Option<u64>) -> Self {
        Self {
            kind,
            version_change: Some(VersionChange {
                old_version,
                new_version,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Display)]
#[display("listener#{_0}")]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerOptions {
    /// Drop the listener after its first invocation.
    pub once: bool,
}

impl ListenerOptions {
    pub const ONCE: Self = Self { once: true };
    pub const PERSISTENT: Self = Self { once: false };
}

pub type Listener = Box<dyn FnMut(&Event)>;

/// Listener registration on a raw handle.
///
/// Implementations must tolerate `remove_event_listener` being called from inside a listener
/// while the same event is being dispatched.
pub trait EventTarget {
    fn add_event_listener(
        &self,
        kind: EventKind,
        listener: Listener,
        options: ListenerOptions,
    ) -> ListenerId;

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId);
}
