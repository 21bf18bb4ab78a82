//! Host identities and the support identity view built on top of them.

use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity handle assigned by the host store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IdentityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(IdentityId)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub login_name: String,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Insert request handed to the identity store.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub login_name: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub password: Secret<String>,
}

/// A live support identity together with its access metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportIdentity {
    pub id: IdentityId,
    pub display_name: String,
    pub email: String,
    pub login_name: String,
    pub role_name: String,
    pub identifier_hash: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<IdentityId>,
}
