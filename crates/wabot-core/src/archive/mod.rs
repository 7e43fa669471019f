//! Two-tier archive of messages their senders deleted.
//!
//! [`store::ArchiveStore`] is the only entry point callers need; the layers and
//! schedulers are public so operators and tests can drive them directly.

pub mod disk;
pub mod eviction;
pub mod janitor;
pub mod memory;
pub mod store;

mod tasks;

pub use store::ArchiveStore;
