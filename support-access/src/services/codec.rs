//! Identifier secrets and the one-way hashes used to look them up.
//!
//! Hashes are SHA-256 rendered as lowercase hex, so a stored hash is always
//! [`HASH_LENGTH`] characters. Raw secrets are longer than that, which is what
//! lets [`normalize_identifier`] tell the two apart.

use rand::{distributions::Alphanumeric, Rng};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

pub const HASH_LENGTH: usize = 64;
pub const SECRET_LENGTH: usize = 96;
const PASSWORD_LENGTH: usize = 64;
const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_[]{}<>~+=,.;:/?|";

pub fn generate_secret() -> Secret<String> {
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect();
    Secret::new(secret)
}

/// Throwaway login password for the support identity. Nobody is told it.
pub fn generate_password() -> Secret<String> {
    let mut rng = rand::thread_rng();
    let password: String = (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect();
    Secret::new(password)
}

pub fn hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Broker lookup key for a grant.
pub fn key_store_id(site_url: &str, secret: &Secret<String>) -> String {
    hash(&format!("{}{}", site_url, secret.expose_secret()))
}

/// Public endpoint path segment bound to the identifier hash.
pub fn endpoint_hash(site_url: &str, identifier_hash: &str) -> String {
    hash(&format!("{}{}", site_url, identifier_hash))
}

/// Anything longer than a hash is a raw secret and gets hashed; otherwise the
/// value is taken to be a hash already.
pub fn normalize_identifier(identifier: &str) -> String {
    let identifier = identifier.trim();
    if identifier.len() > HASH_LENGTH {
        hash(identifier)
    } else {
        identifier.to_string()
    }
}
