//! substrate-runtime - goal decomposition, task dependency scheduling,
//! relay pipelines, and per-agent circuit breakers.
//!
//! Backed by a single SQLite database (see `RuntimeStore::default_path`).

pub mod schema;
pub mod store;
pub mod types;

pub use store::RuntimeStore;
pub use types::*;
