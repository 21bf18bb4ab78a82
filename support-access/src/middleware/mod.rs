pub mod actor;

pub use actor::{
    sign_actor, ACTOR_HEADER, ACTOR_MAX_SKEW_SECONDS, ACTOR_SIGNATURE_HEADER,
    ACTOR_TIMESTAMP_HEADER,
};
