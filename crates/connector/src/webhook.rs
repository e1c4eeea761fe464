//! Shared webhook signature helpers.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `payload` under `secret`.
#[must_use]
pub fn compute_hmac_sha256(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded HMAC-SHA256 signature in constant time.
#[must_use]
pub fn verify_hmac_sha256(secret: &str, payload: &[u8], signature: &str) -> bool {
    let expected = compute_hmac_sha256(secret, payload);
    // Compare the hex strings in constant time; lengths differing is an
    // immediate (non-secret) mismatch.
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_and_verify() {
        let payload = br#"{"id":"evt_1"}"#;
        let sig = compute_hmac_sha256("whsec_test", payload);
        assert!(verify_hmac_sha256("whsec_test", payload, &sig));
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = b"payload";
        let sig = compute_hmac_sha256("secret-a", payload);
        assert!(!verify_hmac_sha256("secret-b", payload, &sig));
    }

    #[test]
    fn tampered_payload_fails() {
        let sig = compute_hmac_sha256("s", b"original");
        assert!(!verify_hmac_sha256("s", b"tampered", &sig));
    }

    #[test]
    fn malformed_signature_fails() {
        assert!(!verify_hmac_sha256("s", b"payload", "not-hex"));
        assert!(!verify_hmac_sha256("s", b"payload", ""));
    }
}
