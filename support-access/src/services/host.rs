//! Host platform collaborators.
//!
//! The engine never owns identities, roles or site options; it talks to the
//! host through these traits. [`MemoryHost`] implements all of them in-process
//! and backs both the tests and single-node deployments.

use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::models::{Identity, IdentityId, NewIdentity, Role};

/// Returned by [`IdentityStore::insert`] when the login name or email is taken.
/// Stores should surface it as-is so callers can tell a lost race from an outage.
#[derive(Debug, Error)]
#[error("Login name or email is already registered")]
pub struct DuplicateIdentity;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert(&self, identity: NewIdentity) -> Result<IdentityId, anyhow::Error>;
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, anyhow::Error>;
    async fn find_by_login(&self, login_name: &str) -> Result<Option<Identity>, anyhow::Error>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, anyhow::Error>;
    async fn get_meta(&self, id: IdentityId, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set_meta(&self, id: IdentityId, key: &str, value: &str) -> Result<(), anyhow::Error>;
    async fn with_role(&self, role: &str) -> Result<Vec<Identity>, anyhow::Error>;
    async fn with_role_and_meta(
        &self,
        role: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<Identity>, anyhow::Error>;
    /// Most recently registered identity holding `role`.
    async fn latest_with_role(&self, role: &str) -> Result<Option<Identity>, anyhow::Error>;
    /// Remove the identity. Owned resources move to `reassign_to` when given,
    /// otherwise they are deleted with it. Returns `false` if it was already gone.
    async fn delete(
        &self,
        id: IdentityId,
        reassign_to: Option<IdentityId>,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get(&self, slug: &str) -> Result<Option<Role>, anyhow::Error>;
    /// Add the role unless one with the same slug exists. Returns whether it was added.
    async fn add(&self, role: Role) -> Result<bool, anyhow::Error>;
    async fn remove(&self, slug: &str) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait OptionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Start an authenticated session and return its token.
    async fn issue(&self, identity: &Identity) -> Result<String, anyhow::Error>;
}

/// Bundle of host collaborators handed to the engine at construction.
#[derive(Clone)]
pub struct HostServices {
    pub identities: Arc<dyn IdentityStore>,
    pub roles: Arc<dyn RoleStore>,
    pub options: Arc<dyn OptionStore>,
    pub sessions: Arc<dyn SessionIssuer>,
}

impl HostServices {
    pub fn in_memory(host: Arc<MemoryHost>) -> Self {
        Self {
            identities: host.clone(),
            roles: host.clone(),
            options: host.clone(),
            sessions: host,
        }
    }

    pub fn with_options(mut self, options: Arc<dyn OptionStore>) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u64);

#[derive(Default)]
struct HostState {
    next_id: u64,
    identities: HashMap<IdentityId, Identity>,
    meta: HashMap<IdentityId, HashMap<String, String>>,
    roles: HashMap<String, Role>,
    options: HashMap<String, String>,
    resources: HashMap<ResourceId, IdentityId>,
    sessions: HashMap<String, IdentityId>,
}

impl HostState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Empty host seeded with the standard role hierarchy.
    pub fn new() -> Self {
        let mut state = HostState::default();
        for role in default_roles() {
            state.roles.insert(role.slug.clone(), role);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HostState>, anyhow::Error> {
        self.state
            .lock()
            .map_err(|e| anyhow::anyhow!("Host state lock poisoned: {}", e))
    }

    /// Register an ordinary host identity (site owners, editors ...).
    pub fn add_identity(
        &self,
        login_name: &str,
        email: &str,
        roles: &[&str],
    ) -> Result<IdentityId, anyhow::Error> {
        let mut state = self.lock()?;
        let id = IdentityId(state.next_id());
        state.identities.insert(
            id,
            Identity {
                id,
                login_name: login_name.to_string(),
                email: email.to_string(),
                display_name: login_name.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                registered_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Create a resource (post, page ...) owned by `owner`.
    pub fn add_resource(&self, owner: IdentityId) -> Result<ResourceId, anyhow::Error> {
        let mut state = self.lock()?;
        let id = ResourceId(state.next_id());
        state.resources.insert(id, owner);
        Ok(id)
    }

    pub fn resource_owner(&self, id: ResourceId) -> Result<Option<IdentityId>, anyhow::Error> {
        Ok(self.lock()?.resources.get(&id).copied())
    }

    pub fn session_identity(&self, token: &str) -> Result<Option<IdentityId>, anyhow::Error> {
        Ok(self.lock()?.sessions.get(token).copied())
    }

    pub fn identity_count(&self) -> Result<usize, anyhow::Error> {
        Ok(self.lock()?.identities.len())
    }
}

#[async_trait]
impl IdentityStore for MemoryHost {
    async fn insert(&self, identity: NewIdentity) -> Result<IdentityId, anyhow::Error> {
        let mut state = self.lock()?;
        if state
            .identities
            .values()
            .any(|i| {
                i.login_name == identity.login_name
                    || i.email.eq_ignore_ascii_case(&identity.email)
            })
        {
            return Err(DuplicateIdentity.into());
        }

        let id = IdentityId(state.next_id());
        state.identities.insert(
            id,
            Identity {
                id,
                login_name: identity.login_name,
                email: identity.email,
                display_name: identity.display_name,
                roles: vec![identity.role],
                registered_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, anyhow::Error> {
        Ok(self.lock()?.identities.get(&id).cloned())
    }

    async fn find_by_login(&self, login_name: &str) -> Result<Option<Identity>, anyhow::Error> {
        Ok(self
            .lock()?
            .identities
            .values()
            .find(|i| i.login_name == login_name)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, anyhow::Error> {
        Ok(self
            .lock()?
            .identities
            .values()
            .find(|i| i.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_meta(&self, id: IdentityId, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .lock()?
            .meta
            .get(&id)
            .and_then(|meta| meta.get(key))
            .cloned())
    }

    async fn set_meta(&self, id: IdentityId, key: &str, value: &str) -> Result<(), anyhow::Error> {
        let mut state = self.lock()?;
        if !state.identities.contains_key(&id) {
            return Err(anyhow::anyhow!("Identity {} does not exist", id));
        }
        state
            .meta
            .entry(id)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn with_role(&self, role: &str) -> Result<Vec<Identity>, anyhow::Error> {
        let mut found: Vec<Identity> = self
            .lock()?
            .identities
            .values()
            .filter(|i| i.has_role(role))
            .cloned()
            .collect();
        found.sort_by_key(|i| i.id);
        Ok(found)
    }

    async fn with_role_and_meta(
        &self,
        role: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<Identity>, anyhow::Error> {
        let state = self.lock()?;
        let mut found: Vec<Identity> = state
            .identities
            .values()
            .filter(|i| i.has_role(role))
            .filter(|i| {
                state
                    .meta
                    .get(&i.id)
                    .and_then(|meta| meta.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect();
        found.sort_by_key(|i| i.id);
        Ok(found)
    }

    async fn latest_with_role(&self, role: &str) -> Result<Option<Identity>, anyhow::Error> {
        Ok(self
            .lock()?
            .identities
            .values()
            .filter(|i| i.has_role(role))
            .max_by_key(|i| (i.registered_at, i.id))
            .cloned())
    }

    async fn delete(
        &self,
        id: IdentityId,
        reassign_to: Option<IdentityId>,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.lock()?;
        if state.identities.remove(&id).is_none() {
            return Ok(false);
        }
        state.meta.remove(&id);
        state.sessions.retain(|_, owner| *owner != id);

        match reassign_to.filter(|target| state.identities.contains_key(target)) {
            Some(target) => state
                .resources
                .values_mut()
                .filter(|owner| **owner == id)
                .for_each(|owner| *owner = target),
            None => state.resources.retain(|_, owner| *owner != id),
        }
        Ok(true)
    }
}

#[async_trait]
impl RoleStore for MemoryHost {
    async fn get(&self, slug: &str) -> Result<Option<Role>, anyhow::Error> {
        Ok(self.lock()?.roles.get(slug).cloned())
    }

    async fn add(&self, role: Role) -> Result<bool, anyhow::Error> {
        let mut state = self.lock()?;
        if state.roles.contains_key(&role.slug) {
            return Ok(false);
        }
        state.roles.insert(role.slug.clone(), role);
        Ok(true)
    }

    async fn remove(&self, slug: &str) -> Result<bool, anyhow::Error> {
        Ok(self.lock()?.roles.remove(slug).is_some())
    }
}

#[async_trait]
impl OptionStore for MemoryHost {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.lock()?.options.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        self.lock()?
            .options
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self.lock()?.options.remove(key).is_some())
    }
}

#[async_trait]
impl SessionIssuer for MemoryHost {
    async fn issue(&self, identity: &Identity) -> Result<String, anyhow::Error> {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        let mut state = self.lock()?;
        if !state.identities.contains_key(&identity.id) {
            return Err(anyhow::anyhow!("Identity {} no longer exists", identity.id));
        }
        state.sessions.insert(token.clone(), identity.id);
        Ok(token)
    }
}

fn default_roles() -> Vec<Role> {
    let subscriber = ["read"];
    let contributor = [&subscriber[..], &["edit_posts", "delete_posts"][..]].concat();
    let author = [
        &contributor[..],
        &["upload_files", "publish_posts", "edit_published_posts", "delete_published_posts"][..],
    ]
    .concat();
    let editor = [
        &author[..],
        &[
            "moderate_comments",
            "manage_categories",
            "edit_others_posts",
            "delete_others_posts",
            "edit_pages",
            "edit_others_pages",
            "publish_pages",
            "delete_pages",
            "unfiltered_html",
        ][..],
    ]
    .concat();
    let administrator = [
        &editor[..],
        &[
            "manage_options",
            "switch_themes",
            "edit_theme_options",
            "activate_plugins",
            "install_plugins",
            "update_plugins",
            "list_users",
            "create_users",
            "edit_users",
            "delete_users",
            "promote_users",
            "remove_users",
            "delete_site",
            "export",
            "import",
        ][..],
    ]
    .concat();

    vec![
        Role::new("administrator", "Administrator", administrator),
        Role::new("editor", "Editor", editor),
        Role::new("author", "Author", author),
        Role::new("contributor", "Contributor", contributor),
        Role::new("subscriber", "Subscriber", subscriber),
    ]
}
