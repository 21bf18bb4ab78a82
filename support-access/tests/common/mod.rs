//! Shared harness for support-access integration tests.
//!
//! Every test gets an in-memory host seeded with one administrator, a
//! wiremock broker, and the vendor public key already cached locally.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use axum::http::request::Builder;
use service_core::config::FileFormat;
use support_access::{
    build_router,
    config::{SupportAccessConfig, SyncFailurePolicy},
    middleware::{sign_actor, ACTOR_HEADER, ACTOR_SIGNATURE_HEADER, ACTOR_TIMESTAMP_HEADER},
    models::{AccessAction, AccessEvent, Actor, IdentityId},
    services::{
        AccessObserver, AccessOrchestrator, HostServices, MemoryHost, OptionStore, RoleStore,
    },
    AppState,
};
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

pub const VENDOR_PUBLIC_KEY: &str = include_str!("../fixtures/vendor_public.pem");
pub const VENDOR_PRIVATE_KEY: &str = include_str!("../fixtures/vendor_private.pem");

pub const API_KEY: &str = "pk_test_123";
pub const DELETE_KEY: &str = "delete-key-abc";
pub const ACTOR_SECRET: &str = "integration-actor-secret";

/// Attach the signed actor headers the host sends. Method and URI must
/// already be set on `builder`.
pub fn signed_as(builder: Builder, actor: IdentityId) -> Builder {
    signed_at(builder, actor, chrono::Utc::now().timestamp())
}

pub fn signed_at(builder: Builder, actor: IdentityId, timestamp: i64) -> Builder {
    let method = builder
        .method_ref()
        .map(|method| method.as_str().to_string())
        .unwrap_or_else(|| "GET".to_string());
    let path = builder
        .uri_ref()
        .map(|uri| uri.path().to_string())
        .unwrap_or_default();
    let signature = sign_actor(ACTOR_SECRET, &method, &path, actor, timestamp).unwrap();

    builder
        .header(ACTOR_HEADER, actor.to_string())
        .header(ACTOR_TIMESTAMP_HEADER, timestamp.to_string())
        .header(ACTOR_SIGNATURE_HEADER, signature)
}

/// Records lifecycle notifications in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AccessAction>>,
}

impl RecordingObserver {
    pub fn actions(&self) -> Vec<AccessAction> {
        self.events.lock().unwrap().clone()
    }
}

impl AccessObserver for RecordingObserver {
    fn on_access_created(&self, event: &AccessEvent) {
        self.events.lock().unwrap().push(event.action);
    }

    fn on_access_revoked(&self, event: &AccessEvent) {
        self.events.lock().unwrap().push(event.action);
    }
}

pub struct TestOptions {
    pub decay: u64,
    pub sync_failure_policy: SyncFailurePolicy,
    pub reassign_posts: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            decay: 604_800,
            sync_failure_policy: SyncFailurePolicy::Retain,
            reassign_posts: true,
        }
    }
}

pub struct TestApp {
    pub host: Arc<MemoryHost>,
    pub broker: MockServer,
    pub state: AppState,
    pub admin: IdentityId,
    pub events: Arc<RecordingObserver>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        let broker = MockServer::start().await;
        let config = Arc::new(
            SupportAccessConfig::parse(&config_toml(&broker.uri(), &options), FileFormat::Toml)
                .expect("test config is valid"),
        );

        let host = Arc::new(MemoryHost::new());
        let admin = host
            .add_identity("site-admin", "admin@site.example", &["administrator"])
            .unwrap();
        OptionStore::set(
            host.as_ref(),
            &config.public_key_option_key(),
            VENDOR_PUBLIC_KEY,
        )
        .await
        .unwrap();

        let events = Arc::new(RecordingObserver::default());
        let services = HostServices::in_memory(host.clone());
        let orchestrator = AccessOrchestrator::new(config.clone(), services.clone())
            .expect("orchestrator builds")
            .with_observer(events.clone())
            .start();

        let state = AppState {
            config,
            orchestrator,
            host: services,
        };

        Self {
            host,
            broker,
            state,
            admin,
            events,
        }
    }

    pub fn orchestrator(&self) -> &AccessOrchestrator {
        &self.state.orchestrator
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Build the actor the HTTP layer would resolve for `id`.
    pub async fn actor(&self, id: IdentityId) -> Actor {
        let identity = support_access::services::IdentityStore::get(self.host.as_ref(), id)
            .await
            .unwrap()
            .expect("actor exists");
        let mut capabilities = BTreeSet::new();
        for slug in &identity.roles {
            if let Some(role) = RoleStore::get(self.host.as_ref(), slug).await.unwrap() {
                capabilities.extend(role.capabilities);
            }
        }
        Actor::new(identity.id, identity.roles, capabilities)
    }

    pub async fn admin_actor(&self) -> Actor {
        self.actor(self.admin).await
    }

    pub async fn mount_create_site_ok(&self) {
        Mock::given(method("POST"))
            .and(path("/api/v1/sites"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "token": "vault-token-xyz",
                "deleteKey": DELETE_KEY,
            })))
            .mount(&self.broker)
            .await;
    }

    pub async fn mount_create_site_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/api/v1/sites"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.broker)
            .await;
    }

    pub async fn mount_revoke_site_ok(&self) {
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/api/v1/sites/[0-9a-f]{64}$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })))
            .mount(&self.broker)
            .await;
    }

    /// Requests the broker has seen with the given method.
    pub async fn broker_requests(&self, verb: &str) -> Vec<wiremock::Request> {
        self.broker
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.method.to_string() == verb)
            .collect()
    }
}

fn config_toml(broker_uri: &str, options: &TestOptions) -> String {
    let policy = match options.sync_failure_policy {
        SyncFailurePolicy::Retain => "retain",
        SyncFailurePolicy::RollBack => "roll_back",
    };

    format!(
        r#"
decay = {decay}
reassign_posts = {reassign}
sync_failure_policy = "{policy}"
require_ssl = false

[site]
url = "https://site.example"
admin_url = "https://site.example/wp-admin/"
home_url = "https://site.example/"

[role]
editor = "Support needs to edit content"

[caps.add]
list_users = "See who has access"

[vendor]
namespace = "acme"
title = "Acme"
email = "support@acme.example"
website = "{broker}"
support_url = "https://acme.example/support"

[auth]
api_key = "{api_key}"
license_key = "lic_test_456"

[broker]
api_url = "{broker}/api/v1/"
timeout_seconds = 5

[security]
nonce_secret = "integration-nonce-secret"
actor_secret = "{actor_secret}"
"#,
        decay = options.decay,
        reassign = options.reassign_posts,
        policy = policy,
        broker = broker_uri,
        api_key = API_KEY,
        actor_secret = ACTOR_SECRET,
    )
}
