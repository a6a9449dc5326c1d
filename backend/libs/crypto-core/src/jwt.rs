/// JWT access-token codec
///
/// Signs and validates short-lived bearer tokens for the phone auth service.
///
/// ## Algorithms
///
/// - **RS256**: production layout, PEM private key signs and PEM public key validates
/// - **HS256**: shared secret, accepted for development and tests
///
/// The algorithm is fixed when the codec is built; tokens carrying any other
/// `alg` header are rejected, which closes the algorithm-confusion hole.
///
/// ## Usage
///
/// ```rust
/// use crypto_core::jwt::JwtCodec;
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// let codec = JwtCodec::hs256(b"dev-secret", "auth-service", 900);
/// let token = codec.issue_access_token(Uuid::new_v4(), "+989121234567", Utc::now()).unwrap();
/// let claims = codec.validate(&token).unwrap().claims;
/// assert_eq!(claims.token_type, "access");
/// ```
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ACCESS_TOKEN_TYPE: &str = "access";

/// JWT claims carried by every access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
    /// Issuer
    pub iss: String,
    /// Token type, always "access" for tokens minted here
    pub token_type: String,
    /// Verified phone number of the subject
    pub phone: String,
}

impl Claims {
    /// Parse the subject as a user id
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|e| anyhow!("Invalid user ID format in token: {e}"))
    }
}

/// Signing and validation keys bound to one algorithm
#[derive(Clone)]
pub struct JwtCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl_secs: i64,
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl JwtCodec {
    /// Build an RS256 codec from PEM-formatted keys
    ///
    /// ## Errors
    ///
    /// Returns error if either PEM is malformed or not an RSA key.
    pub fn rs256(
        private_key_pem: &str,
        public_key_pem: &str,
        issuer: &str,
        access_ttl_secs: i64,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow!("Failed to parse RSA private key: {e}"))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow!("Failed to parse RSA public key: {e}"))?;

        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding_key,
            decoding_key,
            issuer: issuer.to_string(),
            access_ttl_secs,
        })
    }

    /// Build an HS256 codec from a shared secret
    pub fn hs256(secret: &[u8], issuer: &str, access_ttl_secs: i64) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            access_ttl_secs,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Lifetime of access tokens in seconds
    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    /// Mint an access token for `user_id`, issued at `now`
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let expiry = now + Duration::seconds(self.access_ttl_secs);

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: expiry.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            phone: phone.to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to generate access token: {e}"))
    }

    /// Validate and decode an access token
    ///
    /// ## Errors
    ///
    /// Returns error if:
    /// - Signature or algorithm does not match this codec
    /// - Token is expired
    /// - Issuer differs
    /// - Token type is not "access"
    pub fn validate(&self, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("Token validation failed: {e}"))?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(anyhow!("Token validation failed: not an access token"));
        }

        Ok(data)
    }
}
