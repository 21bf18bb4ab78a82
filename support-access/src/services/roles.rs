use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::SupportAccessConfig;
use crate::models::Role;
use crate::services::error::AccessError;
use crate::services::host::RoleStore;

/// Capabilities a support role can never carry, whatever the configuration asks for.
pub const DENIED_CAPABILITIES: [&str; 6] = [
    "create_users",
    "delete_users",
    "edit_users",
    "promote_users",
    "delete_site",
    "remove_users",
];

/// `(base ∪ add) \ remove \ denied`. The deny-list is applied last.
pub fn derive_capabilities<'a>(
    base: &BTreeSet<String>,
    add: impl IntoIterator<Item = &'a String>,
    remove: impl IntoIterator<Item = &'a String>,
) -> BTreeSet<String> {
    let mut caps = base.clone();
    caps.extend(add.into_iter().cloned());
    for cap in remove {
        caps.remove(cap);
    }
    for cap in DENIED_CAPABILITIES {
        caps.remove(cap);
    }
    caps
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created(Role),
    AlreadyExists(Role),
}

impl EnsureOutcome {
    pub fn created(&self) -> bool {
        matches!(self, EnsureOutcome::Created(_))
    }

    pub fn role(&self) -> &Role {
        match self {
            EnsureOutcome::Created(role) | EnsureOutcome::AlreadyExists(role) => role,
        }
    }
}

pub struct RoleManager {
    roles: Arc<dyn RoleStore>,
    config: Arc<SupportAccessConfig>,
}

impl RoleManager {
    pub fn new(roles: Arc<dyn RoleStore>, config: Arc<SupportAccessConfig>) -> Self {
        Self { roles, config }
    }

    /// Create `new_slug` by cloning `clone_from`. An existing role with the same
    /// slug is returned untouched.
    pub async fn ensure(&self, new_slug: &str, clone_from: &str) -> Result<EnsureOutcome, AccessError> {
        if new_slug.trim().is_empty() {
            return Err(AccessError::Validation(
                "Support role slug must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.roles.get(new_slug).await? {
            tracing::debug!(role = %new_slug, "Support role already exists");
            return Ok(EnsureOutcome::AlreadyExists(existing));
        }

        let template = self
            .roles
            .get(clone_from)
            .await?
            .ok_or_else(|| AccessError::RoleNotFound(clone_from.to_string()))?;

        let capabilities = derive_capabilities(
            &template.capabilities,
            self.config.caps.add.keys(),
            self.config.caps.remove.keys(),
        );

        let role = Role {
            slug: new_slug.to_string(),
            display_name: self.config.support_role_display_name(),
            capabilities,
        };

        if !self.roles.add(role.clone()).await? {
            // Lost a race with a concurrent ensure; keep whatever won.
            let existing = self
                .roles
                .get(new_slug)
                .await?
                .ok_or_else(|| AccessError::RoleNotFound(new_slug.to_string()))?;
            return Ok(EnsureOutcome::AlreadyExists(existing));
        }

        tracing::info!(
            role = %new_slug,
            template = %clone_from,
            capabilities = role.capabilities.len(),
            "Support role created"
        );
        Ok(EnsureOutcome::Created(role))
    }

    pub async fn remove(&self, slug: &str) -> Result<bool, AccessError> {
        let removed = self.roles.remove(slug).await?;
        if removed {
            tracing::info!(role = %slug, "Support role removed");
        }
        Ok(removed)
    }
}
