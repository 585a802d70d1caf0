use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use denidin_core::config::UserRolesConfig;

use crate::error::{Result, UserError};
use crate::types::{Role, User};

/// Resolves phone numbers to `User` identities purely from configuration —
/// there is no persisted user table. Resolution is cached so repeated
/// lookups for the same phone return the identical `Arc<User>`.
pub struct UserDirectory {
    admin_phones: Vec<String>,
    blocked_phones: Vec<String>,
    godfather_phone: Option<String>,
    max_tokens_by_role: HashMap<String, u64>,
    cache: Mutex<HashMap<String, Arc<User>>>,
}

impl UserDirectory {
    pub fn new(roles: &UserRolesConfig, max_tokens_by_role: HashMap<String, u64>) -> Self {
        Self {
            admin_phones: roles.admin_phones.clone(),
            blocked_phones: roles.blocked_phones.clone(),
            godfather_phone: roles.godfather_phone.clone(),
            max_tokens_by_role,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `phone` to a `User`, checking role precedence
    /// Admin > Godfather > Blocked > Client.
    pub fn get_user(&self, phone: &str) -> Result<Arc<User>> {
        if phone.trim().is_empty() {
            return Err(UserError::EmptyPhone);
        }

        if let Some(cached) = self.cache.lock().unwrap().get(phone) {
            return Ok(Arc::clone(cached));
        }

        let role = self.resolve_role(phone);
        let token_limit = self
            .max_tokens_by_role
            .get(role.config_key())
            .copied()
            .unwrap_or_else(|| role.default_token_limit());

        let user = Arc::new(User {
            phone: phone.to_string(),
            role,
            token_limit,
            allowed_scopes: role.default_allowed_scopes(),
            can_see_all_memories: role.can_see_all_memories(),
            can_access_system: role.can_access_system(),
        });

        let mut cache = self.cache.lock().unwrap();
        let entry = cache.entry(phone.to_string()).or_insert(user);
        Ok(Arc::clone(entry))
    }

    fn resolve_role(&self, phone: &str) -> Role {
        if self.admin_phones.iter().any(|p| p == phone) {
            Role::Admin
        } else if self.godfather_phone.as_deref() == Some(phone) {
            Role::Godfather
        } else if self.blocked_phones.iter().any(|p| p == phone) {
            Role::Blocked
        } else {
            Role::Client
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        let roles = UserRolesConfig {
            admin_phones: vec!["+1111".to_string(), "+2222".to_string()],
            blocked_phones: vec!["+3333".to_string(), "+4444".to_string()],
            godfather_phone: Some("+5555".to_string()),
        };
        UserDirectory::new(&roles, HashMap::new())
    }

    #[test]
    fn empty_phone_is_rejected() {
        let dir = directory();
        assert!(matches!(dir.get_user(""), Err(UserError::EmptyPhone)));
    }

    #[test]
    fn client_gets_default_budget_and_scopes() {
        let dir = directory();
        let user = dir.get_user("+9999").unwrap();
        assert_eq!(user.role, Role::Client);
        assert_eq!(user.token_limit, 4_000);
        assert!(!user.can_see_all_memories);
        assert!(!user.can_access_system);
    }

    #[test]
    fn godfather_sees_all_but_not_system() {
        let dir = directory();
        let user = dir.get_user("+5555").unwrap();
        assert_eq!(user.role, Role::Godfather);
        assert_eq!(user.token_limit, 100_000);
        assert!(user.can_see_all_memories);
        assert!(!user.can_access_system);
    }

    #[test]
    fn admin_sees_everything() {
        let dir = directory();
        let user = dir.get_user("+1111").unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(user.can_access_system);
    }

    #[test]
    fn blocked_has_zero_budget_and_no_scopes() {
        let dir = directory();
        let user = dir.get_user("+3333").unwrap();
        assert_eq!(user.role, Role::Blocked);
        assert_eq!(user.token_limit, 0);
        assert!(user.allowed_scopes.is_empty());
    }

    #[test]
    fn multiple_admin_phones_all_get_admin_role() {
        let dir = directory();
        assert_eq!(dir.get_user("+1111").unwrap().role, Role::Admin);
        assert_eq!(dir.get_user("+2222").unwrap().role, Role::Admin);
    }

    #[test]
    fn multiple_blocked_phones_all_get_blocked_role() {
        let dir = directory();
        assert_eq!(dir.get_user("+3333").unwrap().role, Role::Blocked);
        assert_eq!(dir.get_user("+4444").unwrap().role, Role::Blocked);
    }

    #[test]
    fn repeated_lookup_returns_same_cached_instance() {
        let dir = directory();
        let a = dir.get_user("+9999").unwrap();
        let b = dir.get_user("+9999").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn admin_role_takes_precedence_over_blocked() {
        let roles = UserRolesConfig {
            admin_phones: vec!["+7777".to_string()],
            blocked_phones: vec!["+7777".to_string()],
            godfather_phone: None,
        };
        let dir = UserDirectory::new(&roles, HashMap::new());
        assert_eq!(dir.get_user("+7777").unwrap().role, Role::Admin);
    }
}
