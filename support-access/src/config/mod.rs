use chrono::Duration;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config::{self as core_config, FileFormat, ServerConfig};
use service_core::error::AppError;
use std::collections::BTreeMap;
use validator::Validate;

use crate::services::roles::DENIED_CAPABILITIES;

pub const CONFIG_FILE_STEM: &str = "support-access";
pub const ENV_PREFIX: &str = "SUPPORT_ACCESS";

/// Ten years. Longer grants are a configuration mistake.
pub const MAX_DECAY_SECONDS: u64 = 315_360_000;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SupportAccessConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[validate(nested)]
    pub site: SiteConfig,
    /// Template role to clone, keyed by slug. Exactly one entry.
    pub role: BTreeMap<String, String>,
    #[serde(default)]
    pub caps: CapsConfig,
    /// Seconds until a grant expires; 0 disables auto-expiry.
    #[serde(default)]
    #[validate(range(max = 315_360_000))]
    pub decay: u64,
    #[validate(nested)]
    pub vendor: VendorConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub reassign_posts: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub sync_failure_policy: SyncFailurePolicy,
    #[validate(nested)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub option_store: OptionStoreConfig,
    /// Opaque passthrough sent in the envelope `metaData`. Never put secrets here.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub require_ssl: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SiteConfig {
    #[validate(url)]
    pub url: String,
    #[validate(url)]
    pub admin_url: String,
    #[validate(url)]
    pub home_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapsConfig {
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VendorConfig {
    #[validate(length(min = 1, max = 64))]
    pub namespace: String,
    #[validate(length(min = 1))]
    pub title: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[validate(email)]
    pub email: String,
    #[validate(url)]
    pub website: String,
    #[validate(url)]
    pub support_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(alias = "public_key")]
    pub api_key: Secret<String>,
    pub license_key: Secret<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    #[validate(url)]
    pub api_url: String,
    #[serde(default = "default_timeout_seconds")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: u64,
    #[serde(default = "default_public_key_path")]
    pub public_key_path: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_url: default_broker_url(),
            timeout_seconds: default_timeout_seconds(),
            public_key_path: default_public_key_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SecurityConfig {
    pub nonce_secret: Secret<String>,
    /// Shared with the host to sign the acting identity on each request.
    pub actor_secret: Secret<String>,
    #[serde(default = "default_nonce_lifetime")]
    #[validate(range(min = 60))]
    pub nonce_lifetime_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionStoreConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// What to do with the local identity when the broker sync fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailurePolicy {
    /// Keep the identity so the site can still hand out access manually.
    #[default]
    Retain,
    RollBack,
}

fn default_service_name() -> String {
    "support-access".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_url() -> String {
    "https://app.trustedlogin.com/api/v1/".to_string()
}

fn default_timeout_seconds() -> u64 {
    45
}

fn default_public_key_path() -> String {
    "wp-json/trustedlogin/v1/public_key".to_string()
}

fn default_nonce_lifetime() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

impl SupportAccessConfig {
    /// Load from `support-access.{toml,yaml,json}` and `SUPPORT_ACCESS__*`,
    /// then validate. Fails fast on any invalid setting.
    pub fn load() -> Result<Self, AppError> {
        let config: Self = core_config::load_layered(CONFIG_FILE_STEM, ENV_PREFIX)?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn parse(contents: &str, format: FileFormat) -> Result<Self, AppError> {
        let config: Self = core_config::load_from_str(contents, format)?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn validate_all(&self) -> Result<(), AppError> {
        self.validate()?;

        let namespace = &self.vendor.namespace;
        if !namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "vendor.namespace may only contain lowercase letters, digits, '-' and '_'"
            )));
        }

        if self.role.len() != 1 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "role must name exactly one template role, found {}",
                self.role.len()
            )));
        }

        if self.auth.api_key.expose_secret().trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "auth.api_key must not be empty"
            )));
        }

        if self.auth.license_key.expose_secret().trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "auth.license_key must not be empty"
            )));
        }

        if self.security.nonce_secret.expose_secret().len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "security.nonce_secret must be at least 16 characters"
            )));
        }

        if self.security.actor_secret.expose_secret().len() < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "security.actor_secret must be at least 16 characters"
            )));
        }

        if self.require_ssl {
            for (name, url) in [
                ("broker.api_url", &self.broker.api_url),
                ("vendor.website", &self.vendor.website),
            ] {
                if !url.starts_with("https://") {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} must use https when require_ssl is enabled",
                        name
                    )));
                }
            }
        }

        for cap in self.caps.add.keys() {
            if DENIED_CAPABILITIES.contains(&cap.as_str()) {
                tracing::warn!(
                    capability = %cap,
                    "Requested capability is never granted to support roles and will be ignored"
                );
            }
        }

        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.vendor.namespace
    }

    pub fn template_role(&self) -> Option<&str> {
        self.role.keys().next().map(String::as_str)
    }

    pub fn support_role_slug(&self) -> String {
        format!("{}-support", self.vendor.namespace)
    }

    pub fn support_role_display_name(&self) -> String {
        format!("{} Support", self.vendor.title)
    }

    /// Deterministic display name, also used as the login name.
    pub fn identity_display_name(&self) -> String {
        self.vendor
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.support_role_display_name())
    }

    pub fn decay(&self) -> Option<Duration> {
        match self.decay {
            0 => None,
            secs => Some(
                i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .unwrap_or(Duration::MAX),
            ),
        }
    }

    pub fn broker_url(&self, path: &str) -> String {
        let base = self.broker.api_url.trim_end_matches('/');
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    pub fn public_key_url(&self) -> String {
        format!(
            "{}/{}",
            self.vendor.website.trim_end_matches('/'),
            self.broker.public_key_path.trim_start_matches('/')
        )
    }

    pub fn endpoint_option_key(&self) -> String {
        format!("tl_{}_endpoint", self.vendor.namespace)
    }

    pub fn token_option_key(&self) -> String {
        format!("tl_{}_slt", self.vendor.namespace)
    }

    pub fn public_key_option_key(&self) -> String {
        format!("{}_public_key", self.vendor.namespace)
    }

    pub fn identifier_meta_key(&self) -> String {
        format!("tl_{}_id", self.vendor.namespace)
    }

    pub fn expires_meta_key(&self) -> String {
        format!("tl_{}_expires", self.vendor.namespace)
    }

    pub fn created_by_meta_key(&self) -> String {
        format!("tl_{}_created_by", self.vendor.namespace)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> SupportAccessConfig {
    SupportAccessConfig::parse(tests::VALID, FileFormat::Toml).expect("test config parses")
}
