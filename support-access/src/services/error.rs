use service_core::error::AppError;
use thiserror::Error;

use super::encryption::EncryptionError;
use super::remote::RemoteError;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Role '{0}' does not exist")]
    RoleNotFound(String),

    #[error("{0}")]
    EmailConflict(String),

    #[error(transparent)]
    RemoteSync(#[from] RemoteError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("{0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl AccessError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::Validation(_) => "validation",
            AccessError::Authorization(_) => "forbidden",
            AccessError::Conflict(_) => "exists",
            AccessError::RoleNotFound(_) => "role_not_found",
            AccessError::EmailConflict(_) => "email_exists",
            AccessError::RemoteSync(e) => e.code(),
            AccessError::Encryption(e) => e.code(),
            AccessError::NotFound(_) => "not_found",
            AccessError::Store(_) => "store_error",
        }
    }

    /// Broker or key failures: the grant may exist locally but is not synced.
    pub fn is_sync_failure(&self) -> bool {
        matches!(self, AccessError::RemoteSync(_) | AccessError::Encryption(_))
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AccessError::Authorization(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            AccessError::Conflict(msg) | AccessError::EmailConflict(msg) => {
                AppError::Conflict(anyhow::anyhow!(msg))
            }
            AccessError::RoleNotFound(slug) => {
                AppError::ConfigError(anyhow::anyhow!("Role '{}' does not exist", slug))
            }
            e @ (AccessError::RemoteSync(_) | AccessError::Encryption(_)) => {
                AppError::ServiceUnavailable(e.to_string())
            }
            AccessError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            AccessError::Store(e) => AppError::InternalError(e),
        }
    }
}
