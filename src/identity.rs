//! Role/Identity gate: resolves chat participants to registered identities
//! and guards privileged dialogue steps.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::db::Store;
use crate::errors::StoreError;
use crate::model::{Identity, IdentityId, Role};

/// Roles allowed to work the manager line
pub const MANAGER_ROLES: &[Role] = &[Role::Manager, Role::Admin];
/// Roles allowed to edit inventory and roles
pub const ADMIN_ROLES: &[Role] = &[Role::Admin];
/// Roles that ask questions rather than answer them
pub const CUSTOMER_ROLES: &[Role] = &[Role::Guest, Role::User];

/// The identity lacks the role for the requested step
///
/// Rendered to the user as the "not understood" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied;

/// Trims a display name hint and checks it against the configured alphabet
///
/// Returns `None` for names that must fall back to the anonymous placeholder.
pub fn sanitize_display_name(hint: Option<&str>, pattern: &Regex) -> Option<String> {
    let trimmed = hint?.trim();
    if trimmed.is_empty() || !pattern.is_match(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Single authorization gate for privileged steps
pub fn require_role(identity: &Identity, allowed: &[Role]) -> Result<(), Denied> {
    if allowed.contains(&identity.role) {
        Ok(())
    } else {
        info!(
            user_id = %identity.id,
            role = %identity.role,
            "Authorization denied for privileged step"
        );
        Err(Denied)
    }
}

pub struct IdentityGate {
    db: Arc<dyn Store>,
    name_pattern: Regex,
}

impl IdentityGate {
    pub fn new(db: Arc<dyn Store>, name_pattern: Regex) -> Self {
        Self { db, name_pattern }
    }

    /// Returns the registered identity, registering a guest on first sight
    pub async fn resolve(
        &self,
        id: IdentityId,
        display_name_hint: Option<&str>,
        language_code: Option<&str>,
    ) -> Result<Identity, StoreError> {
        if let Some(identity) = self.db.get_identity(id).await? {
            debug!(user_id = %id, role = %identity.role, "Identity resolved");
            return Ok(identity);
        }

        let name = sanitize_display_name(display_name_hint, &self.name_pattern);
        if name.is_none() && display_name_hint.is_some() {
            debug!(user_id = %id, "Display name rejected, registering anonymously");
        }

        let guest = Identity::new_guest(id, name, language_code.map(str::to_string));
        self.db.insert_identity_if_absent(&guest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_NAME_PATTERN;
    use crate::db::MemoryStore;

    fn pattern() -> Regex {
        Regex::new(DEFAULT_NAME_PATTERN).unwrap()
    }

    #[test]
    fn test_display_name_sanitizing() {
        let re = pattern();
        assert_eq!(
            sanitize_display_name(Some("  Anna K. "), &re),
            Some("Anna K.".to_string())
        );
        assert_eq!(sanitize_display_name(Some("<b>boss</b>"), &re), None);
        assert_eq!(sanitize_display_name(Some("   "), &re), None);
        assert_eq!(sanitize_display_name(None, &re), None);
    }

    #[test]
    fn test_require_role() {
        let mut identity = Identity::new_guest(1, None, None);
        assert_eq!(require_role(&identity, MANAGER_ROLES), Err(Denied));

        identity.role = Role::Admin;
        assert!(require_role(&identity, MANAGER_ROLES).is_ok());
        assert!(require_role(&identity, ADMIN_ROLES).is_ok());

        identity.role = Role::Manager;
        assert_eq!(require_role(&identity, ADMIN_ROLES), Err(Denied));
    }

    #[tokio::test]
    async fn test_first_contact_registers_guest_once() {
        let db = Arc::new(MemoryStore::new());
        let gate = IdentityGate::new(db.clone(), pattern());

        let first = gate.resolve(11, Some("Ivan"), Some("ru")).await.unwrap();
        assert_eq!(first.role, Role::Guest);
        assert_eq!(first.display_name.as_deref(), Some("Ivan"));
        assert_eq!(first.language_code.as_deref(), Some("ru"));

        db.set_role(11, Role::User).await.unwrap();
        let again = gate.resolve(11, Some("Somebody Else"), None).await.unwrap();
        assert_eq!(again.role, Role::User);
        assert_eq!(again.display_name.as_deref(), Some("Ivan"));
    }
}
