// substrate-core - shared foundation for the agentic substrate.
//
// Provides the error taxonomy, the deterministic embedding fallback, and
// SQLite bootstrap helpers shared by the memory, runtime, and council
// services.

pub mod db;
pub mod embedding;
pub mod error;

pub use embedding::{cosine_similarity, Embedder, HashEmbedder, EMBEDDING_DIM};
pub use error::{SubstrateError, SubstrateResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
