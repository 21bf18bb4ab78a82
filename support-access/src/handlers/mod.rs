//! HTTP handlers for support-access.

pub mod access;
pub mod health;
pub mod login;
pub mod revoke;
pub mod users;

pub use access::*;
pub use health::*;
pub use login::*;
pub use revoke::*;
pub use users::*;
