use std::{sync::Arc, time::Duration};

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::{Claims, TokenKind},
        repo::UserStore,
    },
    config::JwtConfig,
    error::AppError,
};

const ISSUE_FAILED: &str = "Something went wrong while generating refresh and access token";
const REFRESH_REUSED: &str = "Refresh token is expired or used";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Secret and lifetime for one kind of token.
#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::from_secs((ttl_minutes.max(1) as u64).saturating_mul(60)),
        }
    }
}

/// Mints, checks, rotates and revokes access/refresh tokens.
///
/// The refresh token stored on the user row is the only record of a live
/// session: a presented refresh token is accepted only while it is exactly
/// that value, so overwriting or clearing the column revokes it.
#[derive(Clone)]
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
    audience: String,
    users: Arc<dyn UserStore>,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig, users: Arc<dyn UserStore>) -> Self {
        Self {
            access: SigningKeys::new(&cfg.access_secret, cfg.access_ttl_minutes),
            refresh: SigningKeys::new(&cfg.refresh_secret, cfg.refresh_ttl_minutes),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            users,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn sign_with_kind(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<String> {
        let keys = self.keys(kind);
        let now = OffsetDateTime::now_utc();
        let exp = now.saturating_add(TimeDuration::seconds(
            i64::try_from(keys.ttl.as_secs()).unwrap_or(i64::MAX),
        ));
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &keys.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    fn sign_pair(&self, user_id: Uuid) -> Result<TokenPair, AppError> {
        let access_token = self
            .sign_with_kind(user_id, TokenKind::Access)
            .map_err(|e| AppError::internal_with(ISSUE_FAILED, e))?;
        let refresh_token = self
            .sign_with_kind(user_id, TokenKind::Refresh)
            .map_err(|e| AppError::internal_with(ISSUE_FAILED, e))?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    fn decode_kind(&self, token: &str, kind: TokenKind) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation)?;
        if data.claims.kind != kind {
            anyhow::bail!("expected {:?} token, got {:?}", kind, data.claims.kind);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }

    /// Signs a fresh pair and makes its refresh token the user's only valid one.
    #[instrument(skip(self))]
    pub async fn issue(&self, user_id: Uuid) -> Result<TokenPair, AppError> {
        let pair = self.sign_pair(user_id)?;
        match self
            .users
            .set_refresh_token(user_id, Some(&pair.refresh_token))
            .await
        {
            Ok(true) => {
                info!(%user_id, "token pair issued");
                Ok(pair)
            }
            Ok(false) => {
                warn!(%user_id, "issue for unknown user");
                Err(AppError::internal(ISSUE_FAILED))
            }
            Err(e) => Err(AppError::internal_with(ISSUE_FAILED, e)),
        }
    }

    /// Checks signature and expiry, then that `token` is the one stored on the user.
    #[instrument(skip_all)]
    pub async fn verify_refresh(&self, token: &str) -> Result<Uuid, AppError> {
        let claims = self.decode_kind(token, TokenKind::Refresh).map_err(|e| {
            debug!(error = %e, "refresh token rejected");
            AppError::InvalidToken("Invalid refresh token".into())
        })?;

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid refresh token".into()))?;

        if user.refresh_token.as_deref() != Some(token) {
            warn!(user_id = %user.id, "stale refresh token presented");
            return Err(AppError::Unauthorized(REFRESH_REUSED.into()));
        }
        Ok(user.id)
    }

    /// Exchanges a valid refresh token for a new pair. The presented token is
    /// dead afterwards even if it had not expired.
    #[instrument(skip_all)]
    pub async fn rotate(&self, presented: &str) -> Result<TokenPair, AppError> {
        let user_id = self.verify_refresh(presented).await?;
        let pair = self.sign_pair(user_id)?;

        let swapped = self
            .users
            .replace_refresh_token(user_id, presented, &pair.refresh_token)
            .await?;
        if !swapped {
            // Another rotation or a logout got there between verify and write.
            warn!(%user_id, "refresh token changed during rotation");
            return Err(AppError::Unauthorized(REFRESH_REUSED.into()));
        }

        info!(%user_id, "refresh token rotated");
        Ok(pair)
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, user_id: Uuid) -> Result<(), AppError> {
        self.users.set_refresh_token(user_id, None).await?;
        info!(%user_id, "refresh token revoked");
        Ok(())
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AppError> {
        self.decode_kind(token, TokenKind::Access).map_err(|e| {
            debug!(error = %e, "access token rejected");
            AppError::Unauthorized("Invalid access token".into())
        })
    }
}
