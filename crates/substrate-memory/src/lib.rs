//! substrate-memory - the tiered memory engine.
//!
//! A four-tier episodic/semantic/procedural/working memory store with
//! deterministic promotion rules, entity versioning, TTL eviction, and
//! brute-force similarity search. Backed by a single SQLite database
//! (see `MemoryStore::default_path`).

pub mod schema;
pub mod store;
pub mod types;

pub use store::MemoryStore;
pub use types::*;
