//! Vendor public key handling and the encrypted create-site envelope.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, Oaep, RsaPublicKey};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::SupportAccessConfig;
use crate::models::Envelope;
use crate::services::host::OptionStore;
use crate::services::remote::{handle_response, RemoteError};

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Nothing to encrypt, or no key to encrypt with")]
    NoData,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("No vendor public key is stored locally")]
    NoLocalKey,

    #[error("Could not fetch the vendor public key: {0}")]
    KeyFetch(#[source] Box<RemoteError>),

    #[error("Could not store the vendor public key: {0}")]
    DbSaveError(String),
}

impl EncryptionError {
    pub fn code(&self) -> &'static str {
        match self {
            EncryptionError::NoData => "no_data",
            EncryptionError::EncryptionFailed(_) => "encryption_failed",
            EncryptionError::NoLocalKey => "no_local_key",
            EncryptionError::KeyFetch(_) => "key_fetch_failed",
            EncryptionError::DbSaveError(_) => "db_save_error",
        }
    }
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, EncryptionError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem).or_else(|spki_err| {
        RsaPublicKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
            EncryptionError::EncryptionFailed(format!("{} {}", spki_err, pkcs1_err))
        })
    })
}

/// RSA-OAEP (SHA-256) encrypt `plaintext`, base64 encoded.
pub fn encrypt(plaintext: &str, public_key_pem: &str) -> Result<String, EncryptionError> {
    if plaintext.is_empty() || public_key_pem.trim().is_empty() {
        return Err(EncryptionError::NoData);
    }

    let key = parse_public_key(public_key_pem)?;
    let ciphertext = key
        .encrypt(
            &mut rand::thread_rng(),
            Oaep::new::<Sha256>(),
            plaintext.as_bytes(),
        )
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

    Ok(STANDARD.encode(ciphertext))
}

pub struct EncryptionService {
    client: Client,
    config: Arc<SupportAccessConfig>,
    options: Arc<dyn OptionStore>,
}

impl EncryptionService {
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

    pub async fn local_key(&self) -> Result<String, EncryptionError> {
        match self.options.get(&self.config.public_key_option_key()).await {
            Ok(Some(key)) if !key.trim().is_empty() => Ok(key),
            Ok(_) => Err(EncryptionError::NoLocalKey),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored vendor public key");
                Err(EncryptionError::NoLocalKey)
            }
        }
    }

    /// Fetch the key the vendor publishes on its website.
    pub async fn fetch_remote_key(&self) -> Result<String, EncryptionError> {
        let url = self.config.public_key_url();
        tracing::debug!(url = %url, "Fetching vendor public key");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Vendor public key request failed");
                EncryptionError::KeyFetch(Box::new(RemoteError::RequestFailed(e.to_string())))
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            EncryptionError::KeyFetch(Box::new(RemoteError::RequestFailed(e.to_string())))
        })?;

        let json = handle_response(Some(status), &body, &["publicKey"]).map_err(|e| {
            tracing::error!(code = e.code(), error = %e, "Vendor public key response rejected");
            EncryptionError::KeyFetch(Box::new(e))
        })?;

        match json.get("publicKey").and_then(|v| v.as_str()) {
            Some(key) if !key.trim().is_empty() => Ok(key.to_string()),
            _ => Err(EncryptionError::KeyFetch(Box::new(
                RemoteError::MissingRequiredKey("publicKey".to_string()),
            ))),
        }
    }

    /// Cached key if there is one, otherwise fetch and cache. Never falls back
    /// to sending plaintext.
    pub async fn encryption_key(&self) -> Result<String, EncryptionError> {
        match self.local_key().await {
            Ok(key) => return Ok(key),
            Err(EncryptionError::NoLocalKey) => {
                tracing::debug!("No cached vendor public key, fetching from vendor");
            }
            Err(e) => return Err(e),
        }

        let key = self.fetch_remote_key().await?;

        self.options
            .set(&self.config.public_key_option_key(), &key)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Could not cache vendor public key");
                EncryptionError::DbSaveError(e.to_string())
            })?;

        tracing::info!(namespace = %self.config.namespace(), "Vendor public key cached");
        Ok(key)
    }

    pub async fn envelope(
        &self,
        secret: &Secret<String>,
        secret_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Envelope, EncryptionError> {
        let key = self.encryption_key().await?;

        Ok(Envelope {
            public_key: self.config.auth.api_key.expose_secret().clone(),
            access_key: self.config.auth.license_key.expose_secret().clone(),
            secret_id: secret_id.to_string(),
            site_url: encrypt(&self.config.site.url, &key)?,
            key_store_id: encrypt(secret_id, &key)?,
            identifier: encrypt(secret.expose_secret(), &key)?,
            expires_at: expires_at.map(|at| at.timestamp()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            meta_data: self.config.metadata.clone(),
        })
    }
}
