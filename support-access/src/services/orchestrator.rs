//! Drives grant, revoke, login and expiry across the other services.
//!
//! A grant walks `RoleEnsuring -> IdentityCreating -> IdentifierIssuing ->
//! Scheduling -> RemoteSyncing -> Active`. Local failures up to and including
//! `Scheduling` unwind the identity. A broker failure leaves local access in
//! place unless the site chose [`SyncFailurePolicy::RollBack`].

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

use crate::config::{SupportAccessConfig, SyncFailurePolicy};
use crate::models::{
    AccessAction, AccessEvent, Actor, GrantResult, Identity, IdentityId, SupportIdentity,
};
use crate::services::codec;
use crate::services::encryption::EncryptionService;
use crate::services::error::AccessError;
use crate::services::host::{HostServices, OptionStore, SessionIssuer};
use crate::services::identity::{AccessIdentity, RevokeTarget};
use crate::services::nonce::{NonceAction, NonceService};
use crate::services::remote::{RemoteAccessClient, RemoteError};
use crate::services::roles::RoleManager;
use crate::services::scheduler::{short, ExpiryScheduler};
use crate::services::webhook::{AccessObserver, WebhookNotifier};

/// Capability required to grant access.
pub const CREATE_CAPABILITY: &str = "create_users";
/// Capability that allows revoking someone else's grant.
pub const REVOKE_CAPABILITY: &str = "delete_users";
pub const LIST_CAPABILITY: &str = "list_users";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStage {
    Idle,
    RoleEnsuring,
    IdentityCreating,
    IdentifierIssuing,
    Scheduling,
    RemoteSyncing,
    Active,
}

impl GrantStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStage::Idle => "idle",
            GrantStage::RoleEnsuring => "role_ensuring",
            GrantStage::IdentityCreating => "identity_creating",
            GrantStage::IdentifierIssuing => "identifier_issuing",
            GrantStage::Scheduling => "scheduling",
            GrantStage::RemoteSyncing => "remote_syncing",
            GrantStage::Active => "active",
        }
    }
}

/// A locally created grant, with the broker error if syncing failed.
#[derive(Debug)]
pub struct GrantOutcome {
    pub grant: GrantResult,
    pub sync_error: Option<AccessError>,
}

impl GrantOutcome {
    pub fn is_synced(&self) -> bool {
        self.sync_error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct RevokeOutcome {
    pub matched: usize,
    pub deleted: usize,
    /// Local access is gone either way; this only reports the broker side.
    pub remote_error: Option<RemoteError>,
}

impl RevokeOutcome {
    pub fn revoked(&self) -> bool {
        self.deleted > 0
    }
}

/// Who asked for a revoke.
#[derive(Debug, Clone, Copy)]
pub enum Initiator<'a> {
    Actor(&'a Actor),
    Expiry,
    Login,
}

impl Initiator<'_> {
    fn label(&self) -> &'static str {
        match self {
            Initiator::Actor(_) => "actor",
            Initiator::Expiry => "expiry",
            Initiator::Login => "login",
        }
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated { identity: Identity, session: String },
    /// The identifier matched but had expired; access has now been revoked.
    Expired,
    NotFound,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RearmReport {
    pub rearmed: usize,
    pub expired: usize,
}

pub struct AccessOrchestrator {
    config: Arc<SupportAccessConfig>,
    roles: Arc<RoleManager>,
    identities: AccessIdentity,
    encryption: EncryptionService,
    remote: RemoteAccessClient,
    scheduler: ExpiryScheduler,
    options: Arc<dyn OptionStore>,
    sessions: Arc<dyn SessionIssuer>,
    nonces: NonceService,
    observers: Vec<Arc<dyn AccessObserver>>,
    fired: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl AccessOrchestrator {
    pub fn new(config: Arc<SupportAccessConfig>, host: HostServices) -> Result<Self, AccessError> {
        let (scheduler, fired) = ExpiryScheduler::new();
        let roles = Arc::new(RoleManager::new(host.roles.clone(), config.clone()));
        let identities = AccessIdentity::new(
            host.identities.clone(),
            host.options.clone(),
            roles.clone(),
            scheduler.clone(),
            config.clone(),
        );
        let encryption = EncryptionService::new(config.clone(), host.options.clone())?;
        let remote = RemoteAccessClient::new(config.clone(), host.options.clone())?;
        let nonces = NonceService::new(
            config.security.nonce_secret.clone(),
            config.namespace(),
            config.security.nonce_lifetime_seconds,
        );

        let mut observers: Vec<Arc<dyn AccessObserver>> = Vec::new();
        let webhook = WebhookNotifier::new(config.webhook_url.as_deref());
        if webhook.is_enabled() {
            observers.push(Arc::new(webhook));
        }

        Ok(Self {
            config,
            roles,
            identities,
            encryption,
            remote,
            scheduler,
            options: host.options,
            sessions: host.sessions,
            nonces,
            observers,
            fired: Mutex::new(Some(fired)),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn AccessObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Share the orchestrator and start draining fired expiry timers.
    pub fn start(self) -> Arc<Self> {
        let orchestrator = Arc::new(self);
        orchestrator.spawn_expiry_worker();
        orchestrator
    }

    fn spawn_expiry_worker(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available, expiry worker not started");
            return;
        };
        let receiver = match self.fired.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                tracing::error!(error = %e, "Expiry receiver lock poisoned");
                None
            }
        };
        let Some(mut receiver) = receiver else {
            tracing::warn!("Expiry worker already started");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        runtime.spawn(async move {
            while let Some(identifier_hash) = receiver.recv().await {
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                orchestrator.expire(&identifier_hash).await;
            }
            tracing::debug!("Expiry worker stopped");
        });
    }

    pub fn config(&self) -> &SupportAccessConfig {
        &self.config
    }

    pub fn identities(&self) -> &AccessIdentity {
        &self.identities
    }

    pub fn nonces(&self) -> &NonceService {
        &self.nonces
    }

    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.scheduler
    }

    pub fn remote(&self) -> &RemoteAccessClient {
        &self.remote
    }

    fn enter(&self, stage: GrantStage) -> GrantStage {
        tracing::debug!(stage = stage.as_str(), "Grant stage");
        stage
    }

    fn failed(&self, stage: GrantStage, err: AccessError) -> AccessError {
        tracing::error!(stage = stage.as_str(), code = err.code(), error = %err, "Grant failed");
        err
    }

    #[tracing::instrument(skip(self, actor), fields(namespace = %self.config.namespace(), actor = %actor.id))]
    pub async fn grant(&self, actor: &Actor) -> Result<GrantOutcome, AccessError> {
        if !actor.can(CREATE_CAPABILITY) {
            tracing::warn!("Actor may not grant support access");
            return Err(AccessError::Authorization(
                "You do not have permission to grant support access".to_string(),
            ));
        }

        if let Some(existing) = self.identities.exists().await? {
            tracing::info!(identity_id = %existing.id, "Support access already exists");
            return Err(AccessError::Conflict(
                "Support access already exists".to_string(),
            ));
        }

        let expires_at = match self.config.decay() {
            Some(decay) => Some(Utc::now().checked_add_signed(decay).ok_or_else(|| {
                AccessError::Validation("The access duration is out of range".to_string())
            })?),
            None => None,
        };

        let mut stage = self.enter(GrantStage::RoleEnsuring);
        let template = self
            .config
            .template_role()
            .ok_or_else(|| AccessError::Validation("No template role configured".to_string()))?;
        self.roles
            .ensure(&self.config.support_role_slug(), template)
            .await
            .map_err(|e| self.failed(stage, e))?;

        stage = self.enter(GrantStage::IdentityCreating);
        let identity_id = self
            .identities
            .create()
            .await
            .map_err(|e| self.failed(stage, e))?;

        self.enter(GrantStage::IdentifierIssuing);
        let site_url = self.config.site.url.clone();
        let secret = codec::generate_secret();
        let key_store_id = codec::key_store_id(&site_url, &secret);

        stage = self.enter(GrantStage::Scheduling);
        let identifier_hash = match self
            .identities
            .setup(identity_id, &secret, expires_at, actor.id)
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                self.unwind(identity_id).await;
                return Err(self.failed(stage, e));
            }
        };

        let endpoint = codec::endpoint_hash(&site_url, &identifier_hash);
        if let Err(e) = self
            .options
            .set(&self.config.endpoint_option_key(), &endpoint)
            .await
        {
            self.unwind(identity_id).await;
            return Err(self.failed(stage, AccessError::Store(e)));
        }

        let grant = GrantResult {
            identity_id,
            site_url,
            endpoint,
            identifier: secret,
            identifier_hash,
            expires_at,
        };

        stage = self.enter(GrantStage::RemoteSyncing);
        match self.sync_create(&grant, &key_store_id).await {
            Ok(()) => {
                self.enter(GrantStage::Active);
                tracing::info!(
                    identity_id = %identity_id,
                    identifier = %short(&grant.identifier_hash),
                    "Support access granted"
                );
                self.notify(AccessAction::Create);
                Ok(GrantOutcome {
                    grant,
                    sync_error: None,
                })
            }
            Err(e) => match self.config.sync_failure_policy {
                SyncFailurePolicy::Retain => {
                    tracing::warn!(
                        stage = stage.as_str(),
                        code = e.code(),
                        error = %e,
                        "Support access created locally but not synced to the broker"
                    );
                    Ok(GrantOutcome {
                        grant,
                        sync_error: Some(e),
                    })
                }
                SyncFailurePolicy::RollBack => {
                    self.unwind(identity_id).await;
                    Err(self.failed(stage, e))
                }
            },
        }
    }

    async fn sync_create(&self, grant: &GrantResult, key_store_id: &str) -> Result<(), AccessError> {
        let envelope = self
            .encryption
            .envelope(&grant.identifier, key_store_id, grant.expires_at)
            .await?;
        self.remote.create_site(&envelope).await?;
        Ok(())
    }

    /// Local-only removal of a grant that never became usable.
    async fn unwind(&self, identity_id: IdentityId) {
        match self.identities.discard(identity_id).await {
            Ok(result) => tracing::info!(
                identity_id = %identity_id,
                deleted = result.deleted,
                "Partially created support access removed"
            ),
            Err(e) => tracing::error!(
                identity_id = %identity_id,
                error = %e,
                "Could not remove partially created support access"
            ),
        }
    }

    pub fn can_revoke(&self, actor: &Actor) -> bool {
        actor.can(REVOKE_CAPABILITY) || actor.has_role(&self.config.support_role_slug())
    }

    /// Delete local access, then tell the broker. A broker failure is
    /// reported in the outcome but never undoes the local revoke.
    #[tracing::instrument(skip(self, target, initiator), fields(namespace = %self.config.namespace(), initiator = initiator.label()))]
    pub async fn revoke(
        &self,
        target: &RevokeTarget,
        initiator: Initiator<'_>,
    ) -> Result<RevokeOutcome, AccessError> {
        if let Initiator::Actor(actor) = initiator {
            if !self.can_revoke(actor) {
                tracing::warn!(actor = %actor.id, "Actor may not revoke support access");
                return Err(AccessError::Authorization(
                    "You do not have permission to revoke support access".to_string(),
                ));
            }
        }

        let local = self
            .identities
            .delete(target, self.config.reassign_posts)
            .await?;

        let mut outcome = RevokeOutcome {
            matched: local.matched,
            deleted: local.deleted,
            remote_error: None,
        };

        if local.deleted == 0 {
            return Ok(outcome);
        }

        self.notify(AccessAction::Revoke);

        if local.cleaned_up {
            if let Err(e) = self.remote.revoke_site().await {
                tracing::warn!(
                    code = e.code(),
                    error = %e,
                    "Broker revoke failed; local access is already removed"
                );
                outcome.remote_error = Some(e);
            }
        }

        tracing::info!(deleted = outcome.deleted, "Support access revoked");
        Ok(outcome)
    }

    async fn expire(&self, identifier_hash: &str) {
        let target = RevokeTarget::Identifier(identifier_hash.to_string());
        match self.revoke(&target, Initiator::Expiry).await {
            Ok(outcome) if outcome.revoked() => {
                tracing::info!(identifier = %short(identifier_hash), "Support access expired");
            }
            Ok(_) => {
                tracing::debug!(identifier = %short(identifier_hash), "Expired access was already revoked");
            }
            Err(e) => {
                tracing::error!(identifier = %short(identifier_hash), error = %e, "Expiry revoke failed");
            }
        }
    }

    pub async fn endpoint(&self) -> Result<Option<String>, AccessError> {
        Ok(self.options.get(&self.config.endpoint_option_key()).await?)
    }

    /// Authenticate with an issued identifier. Repeatable until expiry or
    /// revoke; an expired identifier is revoked on the spot.
    ///
    /// Only the raw secret logs in. The identifier hash appears in revoke
    /// links and listings and is refused here.
    pub async fn login(&self, identifier: &str) -> Result<LoginOutcome, AccessError> {
        if identifier.trim().len() <= codec::HASH_LENGTH {
            tracing::info!("Login refused: not a raw identifier");
            return Ok(LoginOutcome::NotFound);
        }

        let Some(identity) = self.identities.lookup(identifier).await? else {
            tracing::info!("Login identifier did not match any support identity");
            return Ok(LoginOutcome::NotFound);
        };

        if let Some(expires_at) = self.identities.expiration(identity.id).await? {
            if expires_at <= Utc::now() {
                tracing::info!(identity_id = %identity.id, expires_at = %expires_at, "Support access expired before login");
                let target = RevokeTarget::Identifier(identifier.to_string());
                self.revoke(&target, Initiator::Login).await?;
                return Ok(LoginOutcome::Expired);
            }
        }

        let session = self.sessions.issue(&identity).await?;
        tracing::info!(identity_id = %identity.id, "Support identity logged in");
        Ok(LoginOutcome::Authenticated { identity, session })
    }

    /// Move the expiry of a live grant.
    pub async fn extend(
        &self,
        identifier: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, AccessError> {
        let expires_at = expires_at
            .ok_or_else(|| AccessError::Validation("An expiration time is required".to_string()))?;
        if expires_at <= Utc::now() {
            return Err(AccessError::Validation(
                "The expiration time must be in the future".to_string(),
            ));
        }

        let identity = self.identities.lookup(identifier).await?.ok_or_else(|| {
            AccessError::NotFound("No support access matches that identifier".to_string())
        })?;
        let identifier_hash = codec::normalize_identifier(identifier);

        self.identities.set_expiration(identity.id, expires_at).await?;
        if !self.scheduler.schedule(expires_at, &identifier_hash) {
            tracing::warn!(identity_id = %identity.id, "Extended expiry could not be scheduled");
        }

        tracing::info!(identity_id = %identity.id, expires_at = %expires_at, "Support access extended");
        Ok(expires_at)
    }

    pub async fn expiration(
        &self,
        identity: &Identity,
    ) -> Result<Option<DateTime<Utc>>, AccessError> {
        self.identities.expiration(identity.id).await
    }

    /// Manual revoke link for `target`, carrying a revoke token for `actor`.
    /// Only the identifier hash ever appears in the link.
    pub fn revoke_url(&self, actor: &Actor, target: &RevokeTarget) -> Result<String, AccessError> {
        let id = match target {
            RevokeTarget::All => "all".to_string(),
            RevokeTarget::Identifier(identifier) => codec::normalize_identifier(identifier),
        };
        let nonce = self.nonces.create(NonceAction::Revoke, actor.id)?;

        Ok(format!(
            "{}/support-access/revoke?revoke={}&id={}&_nonce={}",
            self.config.site.url.trim_end_matches('/'),
            urlencoding::encode(self.config.namespace()),
            urlencoding::encode(&id),
            nonce
        ))
    }

    /// Live support identities with their access metadata.
    pub async fn support_identities(
        &self,
        actor: &Actor,
    ) -> Result<Vec<SupportIdentity>, AccessError> {
        if !actor.can(LIST_CAPABILITY) {
            return Err(AccessError::Authorization(
                "You do not have permission to list support access".to_string(),
            ));
        }

        let mut listed = Vec::new();
        for identity in self.identities.get_all().await? {
            listed.push(self.identities.describe(identity).await?);
        }
        Ok(listed)
    }

    /// Expiry timers live in memory. Re-arm them from stored expiry times at
    /// startup and revoke anything that lapsed while the process was down.
    pub async fn rearm(&self) -> Result<RearmReport, AccessError> {
        let now = Utc::now();
        let mut report = RearmReport::default();

        for identity in self.identities.get_all().await? {
            let Some(identifier_hash) = self.identities.identifier_hash(identity.id).await? else {
                continue;
            };
            let Some(expires_at) = self.identities.expiration(identity.id).await? else {
                continue;
            };

            if expires_at <= now {
                let target = RevokeTarget::Identifier(identifier_hash);
                self.revoke(&target, Initiator::Expiry).await?;
                report.expired += 1;
            } else if self.scheduler.schedule(expires_at, &identifier_hash) {
                report.rearmed += 1;
            }
        }

        tracing::info!(
            rearmed = report.rearmed,
            expired = report.expired,
            "Expiry timers re-armed"
        );
        Ok(report)
    }

    fn notify(&self, action: AccessAction) {
        let event = AccessEvent {
            url: self.config.site.url.clone(),
            action,
        };
        for observer in &self.observers {
            match action {
                AccessAction::Create => observer.on_access_created(&event),
                AccessAction::Revoke => observer.on_access_revoked(&event),
            }
        }
    }
}
