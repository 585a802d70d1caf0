//! `denidin-sessions` — the durable, indexed conversation repository.
//! Owns every `Session` and `Message` and their on-disk JSON representation
//! under a configured root directory; see `store::SessionStore` for the
//! full contract.

pub mod error;
pub mod store;
pub mod tokenizer;
pub mod types;

pub use error::{Result, SessionError};
pub use store::SessionStore;
pub use types::{Message, MessageRole, Session};
