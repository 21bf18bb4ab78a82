use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{
    dtos::{SupportUserEntry, SupportUsersResponse},
    models::Actor,
    services::RevokeTarget,
    AppState,
};

/// Live support identities with a revoke link for each.
pub async fn list_support_users(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<SupportUsersResponse>, AppError> {
    let identities = state.orchestrator.support_identities(&actor).await?;

    let mut users = Vec::with_capacity(identities.len());
    for identity in identities {
        let revoke_url = match &identity.identifier_hash {
            Some(hash) => Some(
                state
                    .orchestrator
                    .revoke_url(&actor, &RevokeTarget::Identifier(hash.clone()))?,
            ),
            None => None,
        };
        users.push(SupportUserEntry {
            identity,
            revoke_url,
        });
    }

    Ok(Json(SupportUsersResponse { users }))
}
