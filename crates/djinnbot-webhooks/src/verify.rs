use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a `sha256=<hex>`-style signature header against the raw
/// request body using the per-installation webhook secret. Constant-time
/// by construction (`Mac::verify_slice`), so timing doesn't leak how many
/// leading bytes matched.
pub fn verify_signature(secret: &[u8], raw_body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn matching_signature_verifies() {
        let secret = b"shh";
        let body = b"{\"action\":\"opened\"}";
        let header = sign(secret, body);
        assert!(verify_signature(secret, body, &header));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = b"shh";
        let header = sign(secret, b"original");
        assert!(!verify_signature(secret, b"tampered", &header));
    }

    #[test]
    fn missing_prefix_is_rejected() {
        assert!(!verify_signature(b"shh", b"body", "deadbeef"));
    }
}
