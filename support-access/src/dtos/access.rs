use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{GrantResult, IdentityId, SupportIdentity};

/// Body of `POST /support-access/generate`, form or JSON.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, message = "Vendor namespace is required"))]
    pub vendor: String,
    #[serde(rename = "_nonce", default)]
    pub nonce: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub site_url: String,
    pub endpoint: String,
    pub identifier: String,
    /// Unix seconds; absent when access never expires.
    pub expires_at: Option<i64>,
    pub identity_id: IdentityId,
}

impl From<&GrantResult> for GrantResponse {
    fn from(grant: &GrantResult) -> Self {
        Self {
            site_url: grant.site_url.clone(),
            endpoint: grant.endpoint.clone(),
            identifier: grant.identifier.expose_secret().clone(),
            expires_at: grant.expires_at.map(|at| at.timestamp()),
            identity_id: grant.identity_id,
        }
    }
}

/// Local access exists but the broker does not know about it.
#[derive(Debug, Serialize)]
pub struct PartialGrantResponse {
    #[serde(flatten)]
    pub grant: GrantResponse,
    pub message: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct NonceQuery {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub action: String,
    pub nonce: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeQuery {
    pub revoke: String,
    pub id: Option<String>,
    #[serde(rename = "_nonce")]
    pub nonce: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,
    pub expires_at: Option<i64>,
}

impl ExtendRequest {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendResponse {
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportUserEntry {
    #[serde(flatten)]
    pub identity: SupportIdentity,
    pub revoke_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SupportUsersResponse {
    pub users: Vec<SupportUserEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: &'static str,
}
