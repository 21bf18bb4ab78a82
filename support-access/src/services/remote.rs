//! Broker protocol client.
//!
//! `POST {api}/sites` registers a grant, `DELETE {api}/sites/{keyStoreID}`
//! removes it. Every response goes through [`handle_response`], which turns
//! each failure mode into its own [`RemoteError`] variant.

use reqwest::{header, Client, Method};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::SupportAccessConfig;
use crate::models::{Envelope, VaultTokens};
use crate::services::host::OptionStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request to the broker failed: {0}")]
    RequestFailed(String),

    #[error("The broker did not accept the API key")]
    Unauthenticated,

    #[error("The broker rejected the access token")]
    InvalidToken,

    #[error("The broker does not know this vendor or site")]
    NotFound,

    #[error("The broker is unavailable")]
    Unavailable,

    #[error("Invalid response from the broker")]
    InvalidResponse { body: String },

    #[error("The broker returned an empty response")]
    MissingResponseBody,

    #[error("The broker reported errors: {0}")]
    ErrorsInResponse(String),

    #[error("The broker answered with unexpected status {status}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Broker response is missing the '{0}' key")]
    MissingRequiredKey(String),

    #[error("No delete key is stored for this site")]
    MissingDeleteKey,

    #[error("Could not update the stored broker tokens: {0}")]
    TokenStore(String),
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::RequestFailed(_) => "request_failed",
            RemoteError::Unauthenticated => "unauthenticated",
            RemoteError::InvalidToken => "invalid_token",
            RemoteError::NotFound => "not_found",
            RemoteError::Unavailable => "unavailable",
            RemoteError::InvalidResponse { .. } => "invalid_response",
            RemoteError::UnexpectedStatus { .. } => "unexpected_status",
            RemoteError::MissingResponseBody => "missing_response_body",
            RemoteError::ErrorsInResponse(_) => "errors_in_response",
            RemoteError::MissingRequiredKey(_) => "missing_required_key",
            RemoteError::MissingDeleteKey => "missing_delete_key",
            RemoteError::TokenStore(_) => "token_store",
        }
    }

    /// Worth retrying later without changing configuration.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::RequestFailed(_) | RemoteError::Unavailable)
    }

    /// Raw response body, kept for diagnostics.
    pub fn body(&self) -> Option<&str> {
        match self {
            RemoteError::InvalidResponse { body } | RemoteError::UnexpectedStatus { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }
}

/// Classify a broker response. `status` is `None` when the transport gave no
/// usable status line.
pub fn handle_response(
    status: Option<u16>,
    body: &str,
    required_keys: &[&str],
) -> Result<Map<String, Value>, RemoteError> {
    let Some(status) = status else {
        return Err(RemoteError::InvalidResponse {
            body: body.to_string(),
        });
    };

    match status {
        401 => return Err(RemoteError::Unauthenticated),
        403 => return Err(RemoteError::InvalidToken),
        404 => return Err(RemoteError::NotFound),
        500..=599 => return Err(RemoteError::Unavailable),
        _ => {}
    }

    if !(200..300).contains(&status) {
        return Err(classify_failure(status, body));
    }

    if body.trim().is_empty() {
        return Err(RemoteError::MissingResponseBody);
    }

    let parsed: Value = serde_json::from_str(body).map_err(|_| RemoteError::InvalidResponse {
        body: body.to_string(),
    })?;

    let Value::Object(map) = parsed else {
        return Err(RemoteError::InvalidResponse {
            body: body.to_string(),
        });
    };

    if let Some(errors) = map.get("errors") {
        let mut messages = Vec::new();
        flatten_errors(errors, &mut messages);
        return Err(RemoteError::ErrorsInResponse(messages.join(" ")));
    }

    if let Some(missing) = required_keys.iter().find(|key| !is_set(map.get(**key))) {
        return Err(RemoteError::MissingRequiredKey((*missing).to_string()));
    }

    Ok(map)
}

/// A non-2xx status without its own mapping. Broker validation messages are
/// still surfaced when the body carries them.
fn classify_failure(status: u16, body: &str) -> RemoteError {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(errors) = map.get("errors") {
            let mut messages = Vec::new();
            flatten_errors(errors, &mut messages);
            return RemoteError::ErrorsInResponse(messages.join(" "));
        }
    }

    RemoteError::UnexpectedStatus {
        status,
        body: body.to_string(),
    }
}

// Null and empty strings count as absent.
fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn flatten_errors(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| flatten_errors(v, out)),
        Value::Object(map) => map.values().for_each(|v| flatten_errors(v, out)),
        Value::Null => {}
        other => out.push(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct RevokeRequest<'a> {
    #[serde(rename = "publicKey")]
    public_key: &'a str,
}

pub struct RemoteAccessClient {
    client: Client,
    config: Arc<SupportAccessConfig>,
    options: Arc<dyn OptionStore>,
}

impl RemoteAccessClient {
    pub fn new(
        config: Arc<SupportAccessConfig>,
        options: Arc<dyn OptionStore>,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.broker.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            options,
        })
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        bearer: &str,
        body: &T,
    ) -> Result<(Option<u16>, String), RemoteError> {
        let url = self.config.broker_url(path);
        tracing::debug!(method = %method, url = %url, "Sending broker request");

        let response = self
            .client
            .request(method.clone(), &url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(method = %method, url = %url, error = %e, "Broker request failed");
                RemoteError::RequestFailed(e.to_string())
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            tracing::error!(error = %e, "Could not read broker response body");
            RemoteError::RequestFailed(e.to_string())
        })?;

        tracing::debug!(status, "Broker responded");
        Ok((Some(status), body))
    }

    /// Register the grant and remember the returned tokens, replacing any
    /// previous ones.
    pub async fn create_site(&self, envelope: &Envelope) -> Result<VaultTokens, RemoteError> {
        let api_key = self.config.auth.api_key.expose_secret();
        let (status, body) = self.send(Method::POST, "sites", api_key, envelope).await?;

        let response = handle_response(status, &body, &["token", "deleteKey"]).map_err(|e| {
            tracing::error!(code = e.code(), error = %e, "Broker rejected site registration");
            e
        })?;

        let tokens = VaultTokens {
            vault_token: string_field(&response, "token"),
            delete_key: string_field(&response, "deleteKey"),
            key_store_id: envelope.secret_id.clone(),
        };

        let serialized =
            serde_json::to_string(&tokens).map_err(|e| RemoteError::TokenStore(e.to_string()))?;
        self.options
            .set(&self.config.token_option_key(), &serialized)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Could not persist broker tokens");
                RemoteError::TokenStore(e.to_string())
            })?;

        tracing::info!(namespace = %self.config.namespace(), "Site registered with broker");
        Ok(tokens)
    }

    /// Deregister the current grant using the stored delete key, then clear
    /// the token slot.
    pub async fn revoke_site(&self) -> Result<(), RemoteError> {
        let tokens = self
            .stored_tokens()
            .await?
            .ok_or(RemoteError::MissingDeleteKey)?;

        if tokens.delete_key.is_empty() {
            return Err(RemoteError::MissingDeleteKey);
        }

        let path = format!("sites/{}", tokens.key_store_id);
        let request = RevokeRequest {
            public_key: self.config.auth.api_key.expose_secret(),
        };
        let (status, body) = self
            .send(Method::DELETE, &path, &tokens.delete_key, &request)
            .await?;

        handle_response(status, &body, &[]).map_err(|e| {
            tracing::error!(code = e.code(), error = %e, "Broker rejected site revocation");
            e
        })?;

        if let Err(e) = self.options.delete(&self.config.token_option_key()).await {
            tracing::warn!(error = %e, "Could not clear stored broker tokens");
        }

        tracing::info!(namespace = %self.config.namespace(), "Site revoked on broker");
        Ok(())
    }

    pub async fn stored_tokens(&self) -> Result<Option<VaultTokens>, RemoteError> {
        let raw = self
            .options
            .get(&self.config.token_option_key())
            .await
            .map_err(|e| RemoteError::TokenStore(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| RemoteError::TokenStore(e.to_string())),
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
