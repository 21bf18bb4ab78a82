use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{MessageResponse, RevokeQuery},
    models::Actor,
    services::{orchestrator::REVOKE_CAPABILITY, Initiator, NonceAction, RevokeTarget},
    AppState,
};

/// Manual revoke link. Anyone who may not revoke is sent to the site home
/// page without further detail. A support identity revoking its own access
/// is sent there too, since its session no longer reaches the admin.
pub async fn revoke(
    State(state): State<AppState>,
    actor: Option<Actor>,
    Query(query): Query<RevokeQuery>,
) -> Result<Response, AppError> {
    let config = &state.config;
    if query.revoke != config.namespace() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Unknown vendor namespace"
        )));
    }

    let Some(actor) = actor.filter(|actor| state.orchestrator.can_revoke(actor)) else {
        tracing::info!("Revoke link used without permission, redirecting home");
        return Ok(Redirect::to(&config.site.home_url).into_response());
    };

    let valid = query
        .nonce
        .as_deref()
        .is_some_and(|nonce| state.orchestrator.nonces().verify(NonceAction::Revoke, actor.id, nonce));
    if !valid {
        tracing::warn!(actor = %actor.id, "Revoke rejected: invalid anti-forgery token");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invalid anti-forgery token"
        )));
    }

    let target = RevokeTarget::parse(query.id.as_deref().unwrap_or("all"));
    let outcome = state
        .orchestrator
        .revoke(&target, Initiator::Actor(&actor))
        .await?;

    if !actor.can(REVOKE_CAPABILITY) {
        tracing::info!(actor = %actor.id, revoked = outcome.revoked(), "Support identity revoked its own access");
        return Ok(Redirect::to(&config.site.home_url).into_response());
    }

    let message = if outcome.revoked() {
        format!("Done! {} Support access revoked.", config.vendor.title)
    } else {
        format!("{} Support access was already revoked.", config.vendor.title)
    };

    Ok(Json(MessageResponse { message }).into_response())
}
