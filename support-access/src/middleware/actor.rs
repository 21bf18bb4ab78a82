use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use chrono::Utc;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::utils::signature;
use std::collections::BTreeSet;

use crate::{
    models::{Actor, IdentityId},
    AppState,
};

/// Header carrying the acting host identity. Stands in for the host's own
/// session handling.
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ACTOR_TIMESTAMP_HEADER: &str = "x-actor-timestamp";
pub const ACTOR_SIGNATURE_HEADER: &str = "x-actor-signature";

/// Signed actor headers older or newer than this are rejected.
pub const ACTOR_MAX_SKEW_SECONDS: i64 = 60;

/// Signature the host attaches to vouch for `actor` on one request.
///
/// Covers the method, the path without query and the unix timestamp, so a
/// captured header set cannot be moved to another route.
pub fn sign_actor(
    secret: &str,
    method: &str,
    path: &str,
    actor: IdentityId,
    timestamp: i64,
) -> Result<String, anyhow::Error> {
    signature::sign(
        secret,
        &[method, path, &actor.to_string(), &timestamp.to_string()],
    )
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing or invalid {} header", name)))
}

/// Resolves the acting identity and the union of its roles' capabilities.
///
/// `x-actor-id` is only trusted alongside a valid `x-actor-signature` from
/// the host, checked with the shared actor secret.
#[axum::async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id: IdentityId = header(&parts.headers, ACTOR_HEADER)?
            .parse()
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid {} header", ACTOR_HEADER)))?;

        let timestamp: i64 = header(&parts.headers, ACTOR_TIMESTAMP_HEADER)?
            .parse()
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid actor timestamp")))?;
        if (Utc::now().timestamp() - timestamp).abs() > ACTOR_MAX_SKEW_SECONDS {
            tracing::warn!(actor = %id, "Actor signature timestamp outside the allowed window");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Actor signature expired")));
        }

        let provided = header(&parts.headers, ACTOR_SIGNATURE_HEADER)?;
        let valid = signature::verify(
            state.config.security.actor_secret.expose_secret(),
            &[
                parts.method.as_str(),
                parts.uri.path(),
                &id.to_string(),
                &timestamp.to_string(),
            ],
            provided,
        )?;
        if !valid {
            tracing::warn!(actor = %id, "Rejected request with an invalid actor signature");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid actor signature")));
        }

        let identity = state.host.identities.get(id).await?.ok_or_else(|| {
            tracing::warn!(actor = %id, "Request from unknown actor");
            AppError::Unauthorized(anyhow::anyhow!("Unknown actor"))
        })?;

        let mut capabilities = BTreeSet::new();
        for slug in &identity.roles {
            if let Some(role) = state.host.roles.get(slug).await? {
                capabilities.extend(role.capabilities);
            }
        }

        Ok(Actor::new(identity.id, identity.roles, capabilities))
    }
}
