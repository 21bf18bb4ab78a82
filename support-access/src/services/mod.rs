//! Services layer for support-access.
//!
//! Identity, role, expiry and broker services, composed by the
//! [`AccessOrchestrator`] into grant and revoke flows.

pub mod codec;
pub mod encryption;
pub mod error;
pub mod host;
pub mod identity;
pub mod nonce;
pub mod orchestrator;
pub mod redis;
pub mod remote;
pub mod roles;
pub mod scheduler;
pub mod webhook;

pub use encryption::{EncryptionError, EncryptionService};
pub use error::AccessError;
pub use host::{
    DuplicateIdentity, HostServices, IdentityStore, MemoryHost, OptionStore, ResourceId, RoleStore,
    SessionIssuer,
};
pub use identity::{AccessIdentity, LocalDeletion, RevokeTarget};
pub use nonce::{NonceAction, NonceService};
pub use orchestrator::{
    AccessOrchestrator, GrantOutcome, GrantStage, Initiator, LoginOutcome, RearmReport,
    RevokeOutcome,
};
pub use redis::RedisOptionStore;
pub use remote::{RemoteAccessClient, RemoteError};
pub use roles::{EnsureOutcome, RoleManager};
pub use scheduler::ExpiryScheduler;
pub use webhook::{AccessObserver, WebhookNotifier};
