use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        ExtendRequest, ExtendResponse, GenerateRequest, GrantResponse, NonceQuery, NonceResponse,
        PartialGrantResponse,
    },
    models::Actor,
    services::{orchestrator::CREATE_CAPABILITY, NonceAction},
    utils::{ValidatedJson, ValidatedPayload},
    AppState,
};

/// Grant support access to the configured vendor.
pub async fn generate(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedPayload(req): ValidatedPayload<GenerateRequest>,
) -> Result<Response, AppError> {
    if req.vendor != state.config.namespace() {
        tracing::debug!(vendor = %req.vendor, "Grant requested for another vendor");
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Unknown vendor namespace"
        )));
    }

    let nonce = req
        .nonce
        .as_deref()
        .filter(|nonce| !nonce.is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing anti-forgery token")))?;

    if !state
        .orchestrator
        .nonces()
        .verify(NonceAction::Grant, actor.id, nonce)
    {
        tracing::warn!(actor = %actor.id, "Grant rejected: invalid anti-forgery token");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invalid anti-forgery token"
        )));
    }

    let outcome = state.orchestrator.grant(&actor).await?;
    let grant = GrantResponse::from(&outcome.grant);

    Ok(match outcome.sync_error {
        None => (StatusCode::CREATED, Json(grant)).into_response(),
        Some(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PartialGrantResponse {
                grant,
                message: format!(
                    "Support access was created but could not be sent to {}: {}",
                    state.config.vendor.title, err
                ),
                error: err.code().to_string(),
            }),
        )
            .into_response(),
    })
}

/// Issue an anti-forgery token bound to the acting identity.
pub async fn issue_nonce(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<NonceQuery>,
) -> Result<Json<NonceResponse>, AppError> {
    let action = NonceAction::parse(&query.action).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown action '{}'", query.action))
    })?;

    let nonce = state.orchestrator.nonces().create(action, actor.id)?;

    Ok(Json(NonceResponse {
        action: query.action,
        nonce,
    }))
}

pub async fn extend(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<ExtendRequest>,
) -> Result<Json<ExtendResponse>, AppError> {
    if !actor.can(CREATE_CAPABILITY) {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "You do not have permission to extend support access"
        )));
    }

    let expires_at = state
        .orchestrator
        .extend(&req.identifier, req.expires_at())
        .await?;

    Ok(Json(ExtendResponse {
        expires_at: expires_at.timestamp(),
    }))
}
