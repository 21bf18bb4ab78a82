//! Grant results and the wire representation sent to the broker.

use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::IdentityId;

/// Locally issued access. `identifier` is the raw secret and is only ever
/// handed back to the caller once.
#[derive(Debug, Clone)]
pub struct GrantResult {
    pub identity_id: IdentityId,
    pub site_url: String,
    pub endpoint: String,
    pub identifier: Secret<String>,
    pub identifier_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Short-lived broker tokens kept in a single option slot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultTokens {
    pub vault_token: String,
    pub delete_key: String,
    #[serde(rename = "keyStoreID")]
    pub key_store_id: String,
}

impl fmt::Debug for VaultTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultTokens")
            .field("vault_token", &"[REDACTED]")
            .field("delete_key", &"[REDACTED]")
            .field("key_store_id", &self.key_store_id)
            .finish()
    }
}

/// Create-site payload. Sensitive fields are RSA ciphertext; `expiresAt`,
/// `version` and `metaData` travel in clear.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretId")]
    pub secret_id: String,
    #[serde(rename = "siteUrl")]
    pub site_url: String,
    #[serde(rename = "keyStoreID")]
    pub key_store_id: String,
    pub identifier: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<i64>,
    pub version: String,
    #[serde(rename = "metaData")]
    pub meta_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    Create,
    Revoke,
}

/// Webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub url: String,
    pub action: AccessAction,
}
