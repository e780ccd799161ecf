//! Façades over raw handles.
//!
//! A façade exposes the same members as the raw handle it stands for. Attributes are read
//! through to the raw handle, handles reachable from it come back wrapped, and
//! request-producing methods return futures or streams. Façades are cheap to clone; clones and
//! re-wraps of the same raw handle compare equal.

macro_rules! facade_identity {
    ($facade:ident, $raw:ident, $pick:path) => {
        impl PartialEq for $facade {
            fn eq(&self, other: &Self) -> bool {
                std::rc::Rc::ptr_eq(&self.inner, &other.inner)
            }
        }

        impl Eq for $facade {}

        impl std::fmt::Debug for $facade {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    "{}({} -> {})",
                    stringify!($facade),
                    self.inner.id,
                    $crate::traits::RawIdentity::handle_id(&*self.inner.raw)
                )
            }
        }

        impl $crate::wrap::Unwrap for $facade {
            type Raw = dyn $crate::traits::$raw;

            fn unwrap_raw(&self) -> std::rc::Rc<dyn $crate::traits::$raw> {
                self.inner.resolve($pick)
            }
        }

        impl $facade {
            /// Identity of this façade in the identity cache.
            pub fn wrapper_id(&self) -> $crate::wrap::WrapperId {
                self.inner.id
            }
        }
    };
}

mod cursor;
mod database;
mod index;
mod object_store;
mod transaction;

pub use cursor::{Cursor, CursorSourceHandle};
pub use database::Database;
pub use index::Index;
pub use object_store::ObjectStore;
pub use transaction::Transaction;
