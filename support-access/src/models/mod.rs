pub mod actor;
pub mod grant;
pub mod identity;
pub mod role;

pub use actor::Actor;
pub use grant::{AccessAction, AccessEvent, Envelope, GrantResult, VaultTokens};
pub use identity::{Identity, IdentityId, NewIdentity, SupportIdentity};
pub use role::Role;
