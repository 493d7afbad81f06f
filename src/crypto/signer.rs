//! HMAC-SHA256 signing over a single process-wide secret.

use crate::AttendanceError;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Stateless signer keyed once at startup.
///
/// The keyed MAC state is cloned per call, so a `Signer` can be shared
/// across threads without locking.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Key a signer with the given secret.
    pub fn new(secret: &[u8]) -> Result<Self, AttendanceError> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AttendanceError::Crypto(format!("Invalid HMAC key: {}", e)))?;
        Ok(Self { mac })
    }

    /// Compute the raw signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Compute the signature of `payload` as standard base64.
    pub fn sign_b64(&self, payload: &str) -> String {
        STANDARD.encode(self.sign(payload.as_bytes()))
    }

    /// Check `signature` against `payload` in constant time.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }

    /// Check a base64 signature; undecodable input never verifies.
    pub fn verify_b64(&self, payload: &str, signature_b64: &str) -> bool {
        match STANDARD.decode(signature_b64) {
            Ok(signature) => self.verify(payload.as_bytes(), &signature),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_sign_is_deterministic() {
        let signer = Signer::new(SECRET).unwrap();
        assert_eq!(signer.sign(b"payload"), signer.sign(b"payload"));
        assert_eq!(signer.sign(b"payload").len(), 32);
    }

    #[test]
    fn test_rfc4231_case_2() {
        // HMAC-SHA256 test vector: key "Jefe"
        let signer = Signer::new(b"Jefe").unwrap();
        let sig = signer.sign(b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(sig),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_roundtrip() {
        let signer = Signer::new(SECRET).unwrap();
        let sig = signer.sign_b64("a|b|c");
        assert!(signer.verify_b64("a|b|c", &sig));
    }

    #[test]
    fn test_verify_rejects_other_payload() {
        let signer = Signer::new(SECRET).unwrap();
        let sig = signer.sign_b64("a|b|c");
        assert!(!signer.verify_b64("a|b|d", &sig));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let signer = Signer::new(SECRET).unwrap();
        let other = Signer::new(b"fedcba9876543210fedcba9876543210").unwrap();
        let sig = signer.sign_b64("payload");
        assert!(!other.verify_b64("payload", &sig));
    }

    #[test]
    fn test_verify_rejects_bad_base64() {
        let signer = Signer::new(SECRET).unwrap();
        assert!(!signer.verify_b64("payload", "not-base64!!!"));
    }

    #[test]
    fn test_verify_rejects_truncated_signature() {
        let signer = Signer::new(SECRET).unwrap();
        let sig = signer.sign(b"payload");
        assert!(!signer.verify(b"payload", &sig[..16]));
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = Signer::new(SECRET).unwrap();
        assert_eq!(format!("{:?}", signer), "Signer { .. }");
    }
}
