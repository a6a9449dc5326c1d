use crypto_core::hash::{constant_time_eq, hmac_sha256_hex};

/// Keyed hashing for one-time codes and captcha answers
///
/// Six-digit codes have a tiny search space, so a plain digest would be
/// reversible from a database dump. The HMAC key never leaves the process.
#[derive(Clone)]
pub struct OtpHasher {
    key: Vec<u8>,
}

impl OtpHasher {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Hash bound to the phone so equal codes differ across numbers
    pub fn hash(&self, subject: &str, value: &str) -> String {
        hmac_sha256_hex(&self.key, &format!("{}:{}", subject, value))
    }

    pub fn verify(&self, subject: &str, value: &str, expected_hash: &str) -> bool {
        constant_time_eq(&self.hash(subject, value), expected_hash)
    }
}

impl std::fmt::Debug for OtpHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpHasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_subject_bound() {
        let hasher = OtpHasher::new("key");
        assert_ne!(hasher.hash("+14155552671", "123456"), hasher.hash("+14155552672", "123456"));
    }

    #[test]
    fn test_verify() {
        let hasher = OtpHasher::new("key");
        let hash = hasher.hash("+14155552671", "004211");
        assert!(hasher.verify("+14155552671", "004211", &hash));
        assert!(!hasher.verify("+14155552671", "4211", &hash));
        assert!(!OtpHasher::new("other").verify("+14155552671", "004211", &hash));
    }
}
