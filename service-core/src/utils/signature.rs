use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the `|`-joined parts, hex encoded.
pub fn sign(secret: &str, parts: &[&str]) -> Result<String, anyhow::Error> {
    if secret.is_empty() {
        return Err(anyhow::anyhow!("Signing secret must not be empty"));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(parts.join("|").as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify a signature produced by [`sign`] using constant-time comparison
pub fn verify(secret: &str, parts: &[&str], signature: &str) -> Result<bool, anyhow::Error> {
    let expected_signature = sign(secret, parts)?;

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
