use serde::{Deserialize, Serialize};

/// Role precedence: `Admin` outranks `Godfather`, which
/// outranks `Blocked`, which outranks `Client`. A phone can only ever match
/// one role — checked in that exact order so a phone listed both as admin
/// and blocked resolves to `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Godfather,
    Client,
    Blocked,
}

impl Role {
    /// Default per-session token budget for this role,
    /// overridable via `memory.session.max_tokens_by_role` in config.
    pub fn default_token_limit(self) -> u64 {
        match self {
            Role::Admin => 100_000,
            Role::Godfather => 100_000,
            Role::Client => 4_000,
            Role::Blocked => 0,
        }
    }

    pub fn default_allowed_scopes(self) -> Vec<MemoryScope> {
        match self {
            Role::Admin => vec![MemoryScope::Public, MemoryScope::Private, MemoryScope::System],
            Role::Godfather | Role::Client => vec![MemoryScope::Public, MemoryScope::Private],
            Role::Blocked => vec![],
        }
    }

    pub fn can_see_all_memories(self) -> bool {
        matches!(self, Role::Admin | Role::Godfather)
    }

    pub fn can_access_system(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Lowercase config key used to look up `max_tokens_by_role` overrides.
    pub fn config_key(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Godfather => "godfather",
            Role::Client => "client",
            Role::Blocked => "blocked",
        }
    }
}

/// Partition a stored memory can belong to, and a user's clearance to read it.
/// `System` memories are never returned to anyone without
/// `can_access_system`, regardless of `can_see_all_memories`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryScope {
    Public,
    Private,
    System,
}

/// A resolved user identity, derived entirely from configuration — there is
/// no user database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub phone: String,
    pub role: Role,
    pub token_limit: u64,
    pub allowed_scopes: Vec<MemoryScope>,
    pub can_see_all_memories: bool,
    pub can_access_system: bool,
}

impl User {
    pub fn is_blocked(&self) -> bool {
        self.role == Role::Blocked
    }
}
