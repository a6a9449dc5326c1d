//! Shared cryptographic primitives for the auth backend
//!
//! - `jwt`: access-token signing and validation (RS256 / HS256)
//! - `hash`: SHA-256, HMAC-SHA256 and constant-time digest comparison
//! - `token`: CSPRNG-backed opaque tokens and numeric codes
pub mod hash;
pub mod jwt;
pub mod token;

pub use jwt::{Claims, JwtCodec};
