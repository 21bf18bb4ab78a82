use std::collections::BTreeSet;

use super::IdentityId;

/// The host identity on whose behalf an operation runs.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: IdentityId,
    pub roles: Vec<String>,
    pub capabilities: BTreeSet<String>,
}

impl Actor {
    pub fn new(id: IdentityId, roles: Vec<String>, capabilities: BTreeSet<String>) -> Self {
        Self {
            id,
            roles,
            capabilities,
        }
    }

    pub fn can(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
