//! Backends implementing the raw store traits.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub mod indexeddb;
