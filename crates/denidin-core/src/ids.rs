use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Mint a fresh opaque identifier (UUIDv7 — time-sortable, useful for log
/// correlation).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(new_id())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(SessionId, "Opaque, stable-for-life identifier for a `Session`.");
opaque_id!(MessageId, "Opaque identifier for a single `Message`.");
opaque_id!(MemoryId, "Opaque identifier for a durable `MemoryRecord`.");
