//! The temporary support identity: creation, metadata, lookup and deletion.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;

use crate::config::SupportAccessConfig;
use crate::models::{Identity, IdentityId, NewIdentity, SupportIdentity};
use crate::services::codec;
use crate::services::error::AccessError;
use crate::services::host::{DuplicateIdentity, IdentityStore, OptionStore};
use crate::services::roles::RoleManager;
use crate::services::scheduler::{short, ExpiryScheduler};

/// Role whose newest holder receives reassigned resources.
const REASSIGN_ROLE: &str = "administrator";

/// Which support identities a revoke applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeTarget {
    All,
    /// Raw secret or identifier hash.
    Identifier(String),
}

impl RevokeTarget {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "all" => RevokeTarget::All,
            other => RevokeTarget::Identifier(other.to_string()),
        }
    }
}

/// Result of the local half of a revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalDeletion {
    /// Identities matched before deletion started.
    pub matched: usize,
    /// Identities this call actually removed.
    pub deleted: usize,
    /// No support identity is left, so the role and endpoint were removed.
    pub cleaned_up: bool,
}

pub struct AccessIdentity {
    store: Arc<dyn IdentityStore>,
    options: Arc<dyn OptionStore>,
    roles: Arc<RoleManager>,
    scheduler: ExpiryScheduler,
    config: Arc<SupportAccessConfig>,
}

impl AccessIdentity {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        options: Arc<dyn OptionStore>,
        roles: Arc<RoleManager>,
        scheduler: ExpiryScheduler,
        config: Arc<SupportAccessConfig>,
    ) -> Self {
        Self {
            store,
            options,
            roles,
            scheduler,
            config,
        }
    }

    pub async fn exists(&self) -> Result<Option<Identity>, AccessError> {
        Ok(self
            .store
            .find_by_login(&self.config.identity_display_name())
            .await?)
    }

    /// Create the support identity. Refuses to touch an identity that already
    /// holds the login name or the vendor email.
    pub async fn create(&self) -> Result<IdentityId, AccessError> {
        let login_name = self.config.identity_display_name();

        if self.store.find_by_login(&login_name).await?.is_some() {
            tracing::warn!(login = %login_name, "Support identity already exists");
            return Err(AccessError::Conflict(format!(
                "A user with the name '{}' already exists",
                login_name
            )));
        }

        if self
            .store
            .find_by_email(&self.config.vendor.email)
            .await?
            .is_some()
        {
            tracing::warn!("Vendor support email already belongs to another identity");
            return Err(AccessError::EmailConflict(
                "The vendor support email is already registered to another user".to_string(),
            ));
        }

        let id = self
            .store
            .insert(NewIdentity {
                login_name: login_name.clone(),
                email: self.config.vendor.email.clone(),
                display_name: login_name,
                role: self.config.support_role_slug(),
                password: codec::generate_password(),
            })
            .await
            .map_err(|e| {
                if e.downcast_ref::<DuplicateIdentity>().is_some() {
                    tracing::warn!("Support identity was created concurrently");
                    return AccessError::Conflict("Support access already exists".to_string());
                }
                tracing::error!(error = %e, "Identity store failed to create support identity");
                AccessError::Store(e.context("Support identity could not be created"))
            })?;

        tracing::info!(identity_id = %id, "Support identity created");
        Ok(id)
    }

    /// Store the identifier hash and creator, and arm expiry. Only a failed
    /// identifier write fails the call.
    pub async fn setup(
        &self,
        id: IdentityId,
        secret: &Secret<String>,
        expires_at: Option<DateTime<Utc>>,
        created_by: IdentityId,
    ) -> Result<String, AccessError> {
        let identifier_hash = codec::hash(secret.expose_secret());

        if let Some(at) = expires_at {
            if !self.scheduler.schedule(at, &identifier_hash) {
                tracing::warn!(identity_id = %id, "Expiry could not be scheduled");
            }
            if let Err(e) = self
                .store
                .set_meta(id, &self.config.expires_meta_key(), &at.timestamp().to_string())
                .await
            {
                tracing::warn!(identity_id = %id, error = %e, "Could not store expiry");
            }
        }

        let id_key = self.config.identifier_meta_key();
        self.store
            .set_meta(id, &id_key, &identifier_hash)
            .await
            .map_err(|e| AccessError::Store(e.context("Identifier hash could not be stored")))?;

        let stored = self.store.get_meta(id, &id_key).await?;
        if stored.as_deref() != Some(identifier_hash.as_str()) {
            tracing::error!(identity_id = %id, "Identifier hash did not persist");
            return Err(AccessError::Store(anyhow::anyhow!(
                "Identifier hash did not persist"
            )));
        }

        if let Err(e) = self
            .store
            .set_meta(id, &self.config.created_by_meta_key(), &created_by.to_string())
            .await
        {
            tracing::warn!(identity_id = %id, error = %e, "Could not store creator");
        }

        tracing::info!(
            identity_id = %id,
            identifier = %short(&identifier_hash),
            expires_at = ?expires_at,
            "Support identity set up"
        );
        Ok(identifier_hash)
    }

    /// Find the identity for a raw secret or an identifier hash.
    pub async fn lookup(&self, identifier: &str) -> Result<Option<Identity>, AccessError> {
        let identifier_hash = codec::normalize_identifier(identifier);
        if identifier_hash.is_empty() {
            return Ok(None);
        }

        let mut found = self
            .store
            .with_role_and_meta(
                &self.config.support_role_slug(),
                &self.config.identifier_meta_key(),
                &identifier_hash,
            )
            .await?;

        if found.len() > 1 {
            tracing::warn!(
                identifier = %short(&identifier_hash),
                matches = found.len(),
                "More than one identity shares an identifier hash"
            );
        }

        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    pub async fn get_all(&self) -> Result<Vec<Identity>, AccessError> {
        Ok(self
            .store
            .with_role(&self.config.support_role_slug())
            .await?)
    }

    pub async fn identifier_hash(&self, id: IdentityId) -> Result<Option<String>, AccessError> {
        Ok(self
            .store
            .get_meta(id, &self.config.identifier_meta_key())
            .await?)
    }

    pub async fn expiration(&self, id: IdentityId) -> Result<Option<DateTime<Utc>>, AccessError> {
        let raw = self
            .store
            .get_meta(id, &self.config.expires_meta_key())
            .await?;

        Ok(raw
            .and_then(|value| value.parse::<i64>().ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }

    pub async fn set_expiration(
        &self,
        id: IdentityId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AccessError> {
        Ok(self
            .store
            .set_meta(
                id,
                &self.config.expires_meta_key(),
                &expires_at.timestamp().to_string(),
            )
            .await?)
    }

    pub async fn created_by(&self, id: IdentityId) -> Result<Option<IdentityId>, AccessError> {
        let raw = self
            .store
            .get_meta(id, &self.config.created_by_meta_key())
            .await?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }

    pub async fn describe(&self, identity: Identity) -> Result<SupportIdentity, AccessError> {
        Ok(SupportIdentity {
            identifier_hash: self.identifier_hash(identity.id).await?,
            expires_at: self.expiration(identity.id).await?,
            created_by: self.created_by(identity.id).await?,
            id: identity.id,
            display_name: identity.display_name,
            email: identity.email,
            login_name: identity.login_name,
            role_name: self.config.support_role_slug(),
            registered_at: identity.registered_at,
        })
    }

    /// Delete the targeted identities. Each expiry job is cancelled before its
    /// identity is deleted, and an identity that is already gone counts as
    /// done. When no support identity remains the role and endpoint go too.
    pub async fn delete(
        &self,
        target: &RevokeTarget,
        reassign: bool,
    ) -> Result<LocalDeletion, AccessError> {
        let targets = match target {
            RevokeTarget::All => self.get_all().await?,
            RevokeTarget::Identifier(identifier) => {
                self.lookup(identifier).await?.into_iter().collect()
            }
        };

        if targets.is_empty() {
            tracing::info!(revoke_target = %target_label(target), "No support identity to revoke");
            return Ok(LocalDeletion::default());
        }

        self.delete_identities(targets, reassign).await
    }

    /// Remove a single identity by handle, without reassigning its resources.
    /// Used to unwind a grant whose local setup failed.
    pub async fn discard(&self, id: IdentityId) -> Result<LocalDeletion, AccessError> {
        match self.store.get(id).await? {
            Some(identity) => self.delete_identities(vec![identity], false).await,
            None => Ok(LocalDeletion::default()),
        }
    }

    async fn delete_identities(
        &self,
        targets: Vec<Identity>,
        reassign: bool,
    ) -> Result<LocalDeletion, AccessError> {
        let reassign_to = if reassign {
            let heir = self.store.latest_with_role(REASSIGN_ROLE).await?;
            if heir.is_none() {
                tracing::warn!("No administrator to reassign resources to; they will be deleted");
            }
            heir.map(|identity| identity.id)
        } else {
            None
        };

        let mut result = LocalDeletion {
            matched: targets.len(),
            ..LocalDeletion::default()
        };

        for identity in &targets {
            match self.identifier_hash(identity.id).await {
                Ok(Some(hash)) => {
                    self.scheduler.cancel(&hash);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(identity_id = %identity.id, error = %e, "Could not read identifier hash");
                }
            }

            match self.store.delete(identity.id, reassign_to).await {
                Ok(true) => {
                    result.deleted += 1;
                    tracing::info!(
                        identity_id = %identity.id,
                        reassigned_to = ?reassign_to,
                        "Support identity deleted"
                    );
                }
                Ok(false) => {
                    tracing::debug!(identity_id = %identity.id, "Support identity already gone");
                }
                Err(e) => {
                    tracing::error!(identity_id = %identity.id, error = %e, "Support identity could not be deleted");
                }
            }
        }

        if self.get_all().await?.is_empty() {
            self.roles.remove(&self.config.support_role_slug()).await?;
            if let Err(e) = self.options.delete(&self.config.endpoint_option_key()).await {
                tracing::warn!(error = %e, "Could not remove endpoint registration");
            }
            result.cleaned_up = true;
        }

        Ok(result)
    }
}

fn target_label(target: &RevokeTarget) -> String {
    match target {
        RevokeTarget::All => "all".to_string(),
        RevokeTarget::Identifier(identifier) => {
            short(&codec::normalize_identifier(identifier)).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::services::host::MemoryHost;

    struct Fixture {
        host: Arc<MemoryHost>,
        identities: AccessIdentity,
        scheduler: ExpiryScheduler,
        _fired: tokio::sync::mpsc::UnboundedReceiver<String>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(test_config());
        let host = Arc::new(MemoryHost::new());
        let roles = Arc::new(RoleManager::new(host.clone(), config.clone()));
        let (scheduler, fired) = ExpiryScheduler::new();
        let identities = AccessIdentity::new(
            host.clone(),
            host.clone(),
            roles,
            scheduler.clone(),
            config,
        );
        Fixture {
            host,
            identities,
            scheduler,
            _fired: fired,
        }
    }

    #[tokio::test]
    async fn test_create_then_exists() {
        let f = fixture();
        assert!(f.identities.exists().await.unwrap().is_none());

        let id = f.identities.create().await.unwrap();
        let existing = f.identities.exists().await.unwrap().unwrap();
        assert_eq!(existing.id, id);
        assert_eq!(existing.display_name, "Acme Support");
        assert!(existing.has_role("acme-support"));

        let again = f.identities.create().await.unwrap_err();
        assert!(matches!(again, AccessError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_identity_and_a_conflict() {
        let f = fixture();

        let (a, b) = tokio::join!(f.identities.create(), f.identities.create());

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AccessError::Conflict(_)))));
        assert_eq!(f.host.identity_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_maps_to_conflict() {
        let f = fixture();
        let config = test_config();
        f.host
            .add_identity(
                &config.identity_display_name(),
                "other@site.example",
                &["subscriber"],
            )
            .unwrap();

        // Skip the pre-checks and hit the store directly, as a racing grant would.
        let err = IdentityStore::insert(
            f.host.as_ref(),
            NewIdentity {
                login_name: config.identity_display_name(),
                email: config.vendor.email.clone(),
                display_name: config.identity_display_name(),
                role: config.support_role_slug(),
                password: codec::generate_password(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<DuplicateIdentity>().is_some());
    }

    #[tokio::test]
    async fn test_create_fails_closed_on_email_collision() {
        let f = fixture();
        f.host
            .add_identity("someone", "support@acme.example", &["subscriber"])
            .unwrap();

        let err = f.identities.create().await.unwrap_err();
        assert!(matches!(err, AccessError::EmailConflict(_)));
        assert_eq!(f.host.identity_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_setup_stores_hash_not_secret() {
        let f = fixture();
        let id = f.identities.create().await.unwrap();
        let secret = codec::generate_secret();
        let expires = Utc::now() + chrono::Duration::hours(1);

        let hash = f
            .identities
            .setup(id, &secret, Some(expires), IdentityId(99))
            .await
            .unwrap();

        assert_eq!(hash, codec::hash(secret.expose_secret()));
        assert_eq!(f.identities.identifier_hash(id).await.unwrap(), Some(hash.clone()));
        assert_eq!(f.identities.created_by(id).await.unwrap(), Some(IdentityId(99)));
        assert_eq!(
            f.identities.expiration(id).await.unwrap().map(|t| t.timestamp()),
            Some(expires.timestamp())
        );
        assert!(f.scheduler.is_scheduled(&hash));

        let by_secret = f.identities.lookup(secret.expose_secret()).await.unwrap();
        let by_hash = f.identities.lookup(&hash).await.unwrap();
        assert_eq!(by_secret.map(|i| i.id), Some(id));
        assert_eq!(by_hash.map(|i| i.id), Some(id));
    }

    #[tokio::test]
    async fn test_delete_unknown_identifier_is_a_no_op() {
        let f = fixture();
        let result = f
            .identities
            .delete(&RevokeTarget::Identifier("nope".to_string()), false)
            .await
            .unwrap();
        assert_eq!(result, LocalDeletion::default());
    }

    #[tokio::test]
    async fn test_delete_cancels_timer_and_cleans_up() {
        let f = fixture();
        let id = f.identities.create().await.unwrap();
        let secret = codec::generate_secret();
        let hash = f
            .identities
            .setup(id, &secret, Some(Utc::now() + chrono::Duration::hours(1)), IdentityId(1))
            .await
            .unwrap();

        let result = f.identities.delete(&RevokeTarget::All, false).await.unwrap();
        assert_eq!(result.matched, 1);
        assert_eq!(result.deleted, 1);
        assert!(result.cleaned_up);
        assert!(!f.scheduler.is_scheduled(&hash));
        assert!(f.identities.exists().await.unwrap().is_none());

        let second = f.identities.delete(&RevokeTarget::All, false).await.unwrap();
        assert_eq!(second.deleted, 0);
    }

    #[tokio::test]
    async fn test_delete_reassigns_to_newest_administrator() {
        let f = fixture();
        let _old_admin = f
            .host
            .add_identity("old-admin", "old@site.example", &["administrator"])
            .unwrap();
        let new_admin = f
            .host
            .add_identity("new-admin", "new@site.example", &["administrator"])
            .unwrap();

        let id = f.identities.create().await.unwrap();
        let post = f.host.add_resource(id).unwrap();

        f.identities.delete(&RevokeTarget::All, true).await.unwrap();
        assert_eq!(f.host.resource_owner(post).unwrap(), Some(new_admin));
    }

    #[test]
    fn test_revoke_target_parse() {
        assert_eq!(RevokeTarget::parse("all"), RevokeTarget::All);
        assert_eq!(
            RevokeTarget::parse("abc"),
            RevokeTarget::Identifier("abc".to_string())
        );
    }
}
