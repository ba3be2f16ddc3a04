//! Cross-run idempotency state
//!
//! Per-node flags recording completed phases, the stores that keep them,
//! and the lock that serialises runs on one node.

pub mod flags;
mod lock;
mod store;

pub use flags::NodeFlags;
pub use lock::RunLock;
pub use store::{FileStateStore, MemoryStateStore, StateStore};
