use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::{services::LoginOutcome, AppState};

pub const SESSION_COOKIE: &str = "support_session";

/// Auto-login link handed to the vendor: `/{endpoint}/{identifier}`.
///
/// Every failure is a plain 404 so the link does not reveal whether the
/// endpoint, the identifier or the expiry was wrong.
pub async fn login(
    State(state): State<AppState>,
    Path((endpoint, identifier)): Path<(String, String)>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let stored = state.orchestrator.endpoint().await?;
    if stored.as_deref() != Some(endpoint.as_str()) {
        tracing::debug!("Login attempted on an unregistered endpoint");
        return Err(not_found());
    }

    match state.orchestrator.login(&identifier).await? {
        LoginOutcome::Authenticated { identity, session } => {
            tracing::info!(identity_id = %identity.id, "Support login redirected to admin");
            let cookie = Cookie::build((SESSION_COOKIE, session))
                .path("/")
                .http_only(true)
                .secure(state.config.require_ssl)
                .same_site(SameSite::Lax);

            Ok((
                jar.add(cookie),
                Redirect::to(&state.config.site.admin_url),
            )
                .into_response())
        }
        LoginOutcome::Expired => {
            tracing::info!("Support login refused: access expired");
            Err(not_found())
        }
        LoginOutcome::NotFound => Err(not_found()),
    }
}

fn not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Support access not found"))
}
