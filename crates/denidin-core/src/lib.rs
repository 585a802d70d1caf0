//! `denidin-core` — shared clock/ID primitives, configuration, and the
//! cross-cutting error taxonomy used by every other DeniDin crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;

pub use clock::{Clock, SystemClock};
pub use config::DeniDinConfig;
pub use error::{ConfigError, Severity};
pub use ids::{new_id, MemoryId, MessageId, SessionId};
