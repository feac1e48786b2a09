//! Token issuance, validation and revocation
//!
//! Tokens are HS256 JWTs with a random `jti`. The `typ` claim separates short
//! lived access tokens, long lived refresh tokens and the MFA-pending token
//! handed out between the password step and the second factor.
//!
//! Every validation consults the [`RevocationList`]. A lookup error rejects
//! the token.

pub mod blacklist;

pub use blacklist::{RevocationList, TokenBlacklist, start_cleanup_task};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Error, UserId,
    error::TokenError,
    events::{EventBus, SecurityEvent},
    policy::LookupPolicy,
};

/// Minimum length of the signing secret, in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    /// Issued after the password step when a second factor is still required
    MfaPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user id)
    pub sub: String,
    /// Unique token id, the revocation key
    pub jti: String,
    pub typ: TokenType,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl TokenClaims {
    pub fn user_id(&self) -> UserId {
        UserId::new(&self.sub)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Configuration for JWT issuance.
#[derive(Clone)]
pub struct TokenConfig {
    secret_key: Vec<u8>,
    /// Issuer claim, also enforced on validation when set
    pub issuer: Option<String>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub mfa_pending_ttl: Duration,
}

impl TokenConfig {
    /// Create a new token configuration with HS256 algorithm
    pub fn new_hs256(secret_key: impl Into<Vec<u8>>) -> Self {
        Self {
            secret_key: secret_key.into(),
            issuer: None,
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            mfa_pending_ttl: Duration::minutes(5),
        }
    }

    /// Set the issuer claim
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    pub fn with_mfa_pending_ttl(mut self, ttl: Duration) -> Self {
        self.mfa_pending_ttl = ttl;
        self
    }

    pub fn ttl_for(&self, typ: TokenType) -> Duration {
        match typ {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
            TokenType::MfaPending => self.mfa_pending_ttl,
        }
    }

    pub fn secret_len(&self) -> usize {
        self.secret_key.len()
    }

    /// Get the validation configuration for JWT verification
    ///
    /// Expiry is checked with zero leeway.
    pub fn get_validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret_key", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("mfa_pending_ttl", &self.mfa_pending_ttl)
            .finish()
    }
}

/// A signed token together with the claims needed to revoke it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
}

pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    revocations: Arc<dyn RevocationList>,
    lookup_policy: LookupPolicy,
    events: EventBus,
}

impl TokenService {
    pub fn new(config: TokenConfig, revocations: Arc<dyn RevocationList>, events: EventBus) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(&config.secret_key),
            decoding_key: DecodingKey::from_secret(&config.secret_key),
            config,
            revocations,
            lookup_policy: LookupPolicy::fail_closed(),
            events,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn revocations(&self) -> &Arc<dyn RevocationList> {
        &self.revocations
    }

    /// Sign a fresh token of type `typ` for `user_id`.
    pub fn issue(
        &self,
        user_id: &UserId,
        email: Option<&str>,
        typ: TokenType,
    ) -> Result<IssuedToken, Error> {
        let now = Utc::now();
        let expires_at = now + self.config.ttl_for(typ);
        let claims = TokenClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            typ,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
            email: email.map(str::to_string),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    pub fn issue_pair(&self, user_id: &UserId, email: Option<&str>) -> Result<TokenPair, Error> {
        let access = self.issue(user_id, email, TokenType::Access)?;
        let refresh = self.issue(user_id, email, TokenType::Refresh)?;

        tracing::debug!(user_id = %user_id, access_jti = %access.jti, "Issued token pair");

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.config.access_ttl.num_seconds(),
        })
    }

    pub fn issue_mfa_pending(
        &self,
        user_id: &UserId,
        email: Option<&str>,
    ) -> Result<IssuedToken, Error> {
        self.issue(user_id, email, TokenType::MfaPending)
    }

    fn decode_claims(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.config.get_validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })
    }

    /// Verify signature, expiry and issuer, then check the revocation list.
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, Error> {
        let claims = self.decode_claims(token)?;

        if self.is_blacklisted(&claims.jti).await {
            tracing::debug!(jti = %claims.jti, "Rejected revoked token");
            return Err(TokenError::Revoked.into());
        }

        Ok(claims)
    }

    /// Like [`validate`](Self::validate) but also requires the token type.
    pub async fn validate_as(&self, token: &str, expected: TokenType) -> Result<TokenClaims, Error> {
        let claims = self.validate(token).await?;
        if claims.typ != expected {
            tracing::debug!(jti = %claims.jti, typ = ?claims.typ, expected = ?expected, "Rejected token of wrong type");
            return Err(TokenError::WrongType.into());
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The refresh token itself is returned unchanged.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        let claims = self.validate_as(refresh_token, TokenType::Refresh).await?;
        let access = self.issue(&claims.user_id(), claims.email.as_deref(), TokenType::Access)?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh_token.to_string(),
            expires_in: self.config.access_ttl.num_seconds(),
        })
    }

    /// Revoke a token until its own expiry.
    ///
    /// Returns `false` when the token has already expired and needs no entry.
    pub async fn revoke(&self, token: &str) -> Result<bool, Error> {
        let claims = match self.decode_claims(token) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        self.add_token(&claims.jti, claims.expires_at()).await?;
        Ok(true)
    }

    /// Revoke the access token and, if given, the refresh token.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), Error> {
        self.revoke(access_token).await?;
        if let Some(refresh_token) = refresh_token {
            self.revoke(refresh_token).await?;
        }
        Ok(())
    }

    /// Insert a revocation entry directly.
    pub async fn add_token(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), Error> {
        if self.revocations.add(jti, expires_at).await? {
            self.announce_revocation(jti).await;
        }
        Ok(())
    }

    /// Consume a single-use token by revoking its `jti`.
    ///
    /// Of several concurrent callers holding the same claims exactly one
    /// succeeds; the others get [`TokenError::Revoked`].
    pub async fn redeem(&self, claims: &TokenClaims) -> Result<(), Error> {
        if !self.revocations.add(&claims.jti, claims.expires_at()).await? {
            tracing::warn!(jti = %claims.jti, "Rejected reuse of single-use token");
            return Err(TokenError::Revoked.into());
        }
        self.announce_revocation(&claims.jti).await;
        Ok(())
    }

    async fn announce_revocation(&self, jti: &str) {
        tracing::info!(jti = jti, "Revoked token");
        self.events
            .publish(SecurityEvent::TokenRevoked {
                jti: jti.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Whether `jti` is revoked. Lookup errors count as revoked.
    pub async fn is_blacklisted(&self, jti: &str) -> bool {
        self.lookup_policy
            .resolve("revocation", self.revocations.is_revoked(jti).await)
    }
}
