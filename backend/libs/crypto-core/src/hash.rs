use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute SHA256 hash of input bytes
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Hex-encoded SHA256, the storage form for opaque tokens
pub fn sha256_hex(input: &str) -> String {
    hex::encode(sha256(input.as_bytes()))
}

/// Hex-encoded HMAC-SHA256 keyed with a server-side secret
///
/// Used for low-entropy secrets (numeric codes, captcha answers) where a bare
/// digest could be reversed by enumerating the input space.
pub fn hmac_sha256_hex(key: &[u8], input: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality for digests
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
