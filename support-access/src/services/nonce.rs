//! Per-actor, per-action anti-forgery tokens.
//!
//! A token is an HMAC over `action|actor|tick` where a tick is half the
//! configured lifetime. The current and previous tick are accepted, so a token
//! stays valid for between half and the full lifetime.

use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use service_core::utils::signature;

use crate::models::IdentityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceAction {
    Grant,
    Revoke,
}

impl NonceAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "grant" | "generate_support_access" => Some(NonceAction::Grant),
            "revoke" => Some(NonceAction::Revoke),
            _ => None,
        }
    }

    fn key(self, namespace: &str) -> String {
        match self {
            NonceAction::Grant => format!("{}-generate_support_access", namespace),
            NonceAction::Revoke => format!("{}-revoke", namespace),
        }
    }
}

pub struct NonceService {
    secret: Secret<String>,
    namespace: String,
    half_life: i64,
}

impl NonceService {
    pub fn new(secret: Secret<String>, namespace: &str, lifetime_seconds: u64) -> Self {
        let half_life = i64::try_from(lifetime_seconds / 2).unwrap_or(i64::MAX).max(1);
        Self {
            secret,
            namespace: namespace.to_string(),
            half_life,
        }
    }

    fn tick(&self, unix_seconds: i64) -> i64 {
        unix_seconds.div_euclid(self.half_life) + 1
    }

    fn sign(&self, action: NonceAction, actor: IdentityId, tick: i64) -> Result<String, anyhow::Error> {
        signature::sign(
            self.secret.expose_secret(),
            &[&action.key(&self.namespace), &actor.to_string(), &tick.to_string()],
        )
    }

    pub fn create(&self, action: NonceAction, actor: IdentityId) -> Result<String, anyhow::Error> {
        self.create_at(action, actor, Utc::now().timestamp())
    }

    pub fn create_at(
        &self,
        action: NonceAction,
        actor: IdentityId,
        unix_seconds: i64,
    ) -> Result<String, anyhow::Error> {
        self.sign(action, actor, self.tick(unix_seconds))
    }

    pub fn verify(&self, action: NonceAction, actor: IdentityId, token: &str) -> bool {
        self.verify_at(action, actor, token, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        action: NonceAction,
        actor: IdentityId,
        token: &str,
        unix_seconds: i64,
    ) -> bool {
        if token.is_empty() {
            return false;
        }

        let tick = self.tick(unix_seconds);
        let action_key = action.key(&self.namespace);
        let actor = actor.to_string();
        [tick, tick - 1].into_iter().any(|t| {
            signature::verify(
                self.secret.expose_secret(),
                &[&action_key, &actor, &t.to_string()],
                token,
            )
            .unwrap_or(false)
        })
    }
}
