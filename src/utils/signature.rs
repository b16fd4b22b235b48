use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn compute_signature(secret: &str, payload: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Checks a hex HMAC-SHA256 of the raw payload, optionally prefixed with `sha256=`.
pub fn verify_signature(secret: &str, payload: &[u8], header_value: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let provided = header_value.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Some(expected) = compute_signature(secret, payload) else {
        return false;
    };

    // Compare signatures in constant time to prevent timing attacks
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"payment","data":{"id":"123"}}"#;

    fn sign(secret: &str, payload: &[u8]) -> String {
        hex::encode(compute_signature(secret, payload).unwrap())
    }

    #[test]
    fn accepts_valid_signature() {
        let signature = sign(SECRET, PAYLOAD);
        assert!(verify_signature(SECRET, PAYLOAD, &signature));
        assert!(verify_signature(SECRET, PAYLOAD, &format!("sha256={}", signature)));
    }

    #[test]
    fn rejects_tampered_payload_and_wrong_secret() {
        let signature = sign(SECRET, PAYLOAD);
        assert!(!verify_signature(SECRET, br#"{"id":"evt_2"}"#, &signature));
        assert!(!verify_signature("other", PAYLOAD, &signature));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(!verify_signature(SECRET, PAYLOAD, "not-hex"));
        assert!(!verify_signature(SECRET, PAYLOAD, ""));
        assert!(!verify_signature(SECRET, PAYLOAD, "abcd"));
        assert!(!verify_signature("", PAYLOAD, &sign("", PAYLOAD)));
    }
}
