/// Access and refresh token lifecycle
///
/// Access tokens are short-lived JWTs. Refresh tokens are opaque random
/// strings stored only as SHA-256; each one is redeemable once, and
/// redeeming it deletes it before the replacement pair is minted.
use crate::clock::Clock;
use crate::db::{RefreshTokenStore, UserStore};
use crate::error::{AuthError, Result};
use crate::models::{ClientInfo, RefreshToken, User};
use crate::services::metrics::AuthMetrics;
use chrono::Duration;
use crypto_core::hash::sha256_hex;
use crypto_core::{Claims, JwtCodec};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const REFRESH_TOKEN_LENGTH: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub token_type: &'static str,
}

pub struct TokenIssuer {
    codec: JwtCodec,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
    metrics: AuthMetrics,
}

impl TokenIssuer {
    pub fn new(
        codec: JwtCodec,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        refresh_ttl_days: i64,
        metrics: AuthMetrics,
    ) -> Self {
        Self {
            codec,
            refresh_tokens,
            users,
            clock,
            refresh_ttl: Duration::days(refresh_ttl_days),
            metrics,
        }
    }

    /// Mint a new session for `user`
    pub async fn issue(&self, user: &User, client: &ClientInfo) -> Result<TokenPair> {
        let now = self.clock.now();
        let access_token = self.codec.issue_access_token(user.id, &user.phone, now)?;
        let refresh_token = crypto_core::token::random_alphanumeric(REFRESH_TOKEN_LENGTH);

        self.refresh_tokens
            .insert(&RefreshToken {
                id: Uuid::new_v4(),
                user_id: user.id,
                token_hash: sha256_hex(&refresh_token),
                expires_at: now + self.refresh_ttl,
                last_used_at: now,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                created_at: now,
            })
            .await?;

        self.metrics.record_token("issue");
        info!(user_id = %user.id, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.codec.access_ttl_secs(),
            token_type: "Bearer",
        })
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The presented token is deleted first; replaying it afterwards fails.
    pub async fn rotate(&self, presented: &str, client: &ClientInfo) -> Result<TokenPair> {
        let Some(stored) = self
            .refresh_tokens
            .take_by_hash(&sha256_hex(presented))
            .await?
        else {
            self.metrics.record_token("rejected");
            warn!("Refresh token not found or already used");
            return Err(AuthError::InvalidToken);
        };

        if stored.is_expired(self.clock.now()) {
            self.metrics.record_token("rejected");
            info!(user_id = %stored.user_id, "Expired refresh token presented");
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .users
            .find_by_id(stored.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            self.refresh_tokens.delete_for_user(user.id).await?;
            return Err(AuthError::AccountDisabled);
        }

        let pair = self.issue(&user, client).await?;
        self.metrics.record_token("rotate");
        Ok(pair)
    }

    /// End one session; the token must belong to `user_id`
    pub async fn revoke(&self, user_id: Uuid, presented: &str) -> Result<bool> {
        let removed = self
            .refresh_tokens
            .delete_by_hash(user_id, &sha256_hex(presented))
            .await?;
        if removed {
            self.metrics.record_token("revoke");
        }
        Ok(removed)
    }

    /// End every session of `user_id`
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let removed = self.refresh_tokens.delete_for_user(user_id).await?;
        self.metrics.record_token("revoke_all");
        info!(%user_id, removed, "Revoked all refresh tokens");
        Ok(removed)
    }

    /// Validate a bearer access token
    pub fn authenticate(&self, access_token: &str) -> Result<Claims> {
        let data = self
            .codec
            .validate(access_token)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{MemoryRefreshTokenStore, MemoryUserStore};
    use chrono::Utc;

    struct Harness {
        issuer: TokenIssuer,
        clock: ManualClock,
        users: Arc<MemoryUserStore>,
        tokens: Arc<MemoryRefreshTokenStore>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(Utc::now());
        let users = Arc::new(MemoryUserStore::new());
        let tokens = Arc::new(MemoryRefreshTokenStore::new());
        let issuer = TokenIssuer::new(
            JwtCodec::hs256(b"issuer-test", "phone-auth", 900),
            tokens.clone(),
            users.clone(),
            Arc::new(clock.clone()),
            30,
            AuthMetrics::new("issuer-test"),
        );
        Harness {
            issuer,
            clock,
            users,
            tokens,
        }
    }

    #[tokio::test]
    async fn test_issue_persists_only_hash() {
        let h = harness();
        let user = h
            .users
            .find_or_create_by_phone("+14155552671", h.clock.now())
            .await
            .unwrap();

        let pair = h.issuer.issue(&user, &ClientInfo::default()).await.unwrap();
        assert_eq!(pair.refresh_token.len(), 64);
        assert_eq!(pair.expires_in, 900);
        assert_eq!(h.tokens.len(), 1);

        let claims = h.issuer.authenticate(&pair.access_token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user.id);
    }

    #[tokio::test]
    async fn test_expired_refresh_token_rejected() {
        let h = harness();
        let user = h
            .users
            .find_or_create_by_phone("+14155552671", h.clock.now())
            .await
            .unwrap();
        let pair = h.issuer.issue(&user, &ClientInfo::default()).await.unwrap();

        h.clock.advance(Duration::days(31));
        let err = h
            .issuer
            .rotate(&pair.refresh_token, &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
        assert!(h.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_account_cannot_rotate() {
        let h = harness();
        let user = h
            .users
            .find_or_create_by_phone("+14155552671", h.clock.now())
            .await
            .unwrap();
        let pair = h.issuer.issue(&user, &ClientInfo::default()).await.unwrap();
        h.users.set_active("+14155552671", false);

        let err = h
            .issuer
            .rotate(&pair.refresh_token, &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));
    }

    #[tokio::test]
    async fn test_revoke_requires_owner() {
        let h = harness();
        let user = h
            .users
            .find_or_create_by_phone("+14155552671", h.clock.now())
            .await
            .unwrap();
        let pair = h.issuer.issue(&user, &ClientInfo::default()).await.unwrap();

        assert!(!h.issuer.revoke(Uuid::new_v4(), &pair.refresh_token).await.unwrap());
        assert!(h.issuer.revoke(user.id, &pair.refresh_token).await.unwrap());
        assert!(h.tokens.is_empty());
    }

    #[test]
    fn test_garbage_access_token_rejected() {
        let h = harness();
        assert!(matches!(
            h.issuer.authenticate("not.a.jwt"),
            Err(AuthError::InvalidToken)
        ));
    }
}
