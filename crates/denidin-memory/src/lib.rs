//! `denidin-memory` — the durable, vector-indexed long-term memory
//! repository. Owns every `MemoryRecord` and its on-disk representation;
//! see `store::MemoryStore` for the full contract.

pub mod db;
pub mod embedding;
pub mod error;
pub mod store;
pub mod types;

pub use embedding::{Embedder, HashEmbedder};
pub use error::{MemoryError, Result};
pub use store::MemoryStore;
pub use types::{Hit, Metadata, RecordType, Scope};
