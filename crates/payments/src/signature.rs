//! Gateway callback signatures.
//!
//! The gateway signs each callback with
//! `hex(sha512(order_id + status_code + gross_amount + server_key))`.

use sha2::{Digest, Sha512};

/// Computes the lowercase hex signature for a callback.
pub fn sign(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> String {
    hex::encode(digest(order_id, status_code, gross_amount, server_key))
}

/// Checks `signature` against the expected value without short-circuiting
/// on the first differing byte. Hex case is ignored.
pub fn verify(
    signature: &str,
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let expected = digest(order_id, status_code, gross_amount, server_key);
    constant_time_eq(&provided, &expected)
}

fn digest(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_sha512_hex() {
        let signature = sign("ORD-1", "200", "10000.00", "secret");
        assert_eq!(signature.len(), 128);
        assert!(signature.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(signature, sign("ORD-1", "200", "10000.00", "secret"));
    }

    #[test]
    fn verify_accepts_either_hex_case() {
        let signature = sign("ORD-1", "200", "10000.00", "secret");
        assert!(verify(&signature, "ORD-1", "200", "10000.00", "secret"));
        assert!(verify(
            &signature.to_uppercase(),
            "ORD-1",
            "200",
            "10000.00",
            "secret"
        ));
    }

    #[test]
    fn verify_rejects_tampering() {
        let signature = sign("ORD-1", "200", "10000.00", "secret");
        assert!(!verify(&signature, "ORD-1", "200", "1.00", "secret"));
        assert!(!verify(&signature, "ORD-1", "200", "10000.00", "other"));
        assert!(!verify("not-hex", "ORD-1", "200", "10000.00", "secret"));
        assert!(!verify(&signature[..64], "ORD-1", "200", "10000.00", "secret"));
    }
}
