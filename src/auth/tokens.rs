use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sqlx::PgPool;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::{Claims, TokenKind},
        repo_types::User,
    },
    config::JwtConfig,
    state::AppState,
};

/// Access/refresh pair minted for one user.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Why a presented refresh token was rejected.
///
/// Callers collapse every variant to 401; invalid-signature and unknown-user
/// share one message so the response does not reveal which identities exist.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh token is invalid or expired")]
    Invalid,
    #[error("refresh token is invalid or expired")]
    UserNotFound,
    #[error("refresh token is expired or already used")]
    Stale,
    #[error("refresh token could not be checked")]
    Store(#[source] anyhow::Error),
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            access_ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((access_ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    fn sign_with_kind(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Access)
    }
    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Refresh)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(claims)
    }
}

/// Mint a fresh pair for `user_id` and persist the refresh half on the user
/// row, superseding whatever token was stored before.
pub async fn issue_token_pair(
    db: &PgPool,
    keys: &JwtKeys,
    user_id: Uuid,
) -> anyhow::Result<TokenPair> {
    let access_token = keys.sign_access(user_id)?;
    let refresh_token = keys.sign_refresh(user_id)?;

    let updated = User::set_refresh_token(db, user_id, &refresh_token).await?;
    if !updated {
        error!(%user_id, "no user row to store the refresh token on");
        anyhow::bail!("user not found while issuing tokens");
    }

    debug!(%user_id, "token pair issued");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Check a presented refresh token: signature and expiry first, then the
/// embedded identity, then the rotate-on-use comparison against the value
/// currently stored on the user row.
pub async fn verify_refresh_token(
    db: &PgPool,
    keys: &JwtKeys,
    token: &str,
) -> Result<Uuid, RefreshError> {
    let claims = keys.verify_refresh(token).map_err(|e| {
        warn!(error = %e, "refresh token failed verification");
        RefreshError::Invalid
    })?;

    let user = User::find_by_id(db, claims.sub)
        .await
        .map_err(RefreshError::Store)?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "refresh token for unknown user");
            RefreshError::UserNotFound
        })?;

    ensure_current_token(token, user.refresh_token.as_deref())?;
    Ok(user.id)
}

// A token that no longer matches the stored value was rotated away or
// cleared by logout; either way it must not be exchangeable again.
fn ensure_current_token(presented: &str, stored: Option<&str>) -> Result<(), RefreshError> {
    match stored {
        Some(current) if current == presented => Ok(()),
        _ => Err(RefreshError::Stale),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    fn make_keys() -> JwtKeys {
        let state = AppState::fake();
        JwtKeys::from_ref(&state)
    }

    #[tokio::test]
    async fn sign_and_verify_access_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign_access(user_id).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[tokio::test]
    async fn sign_and_verify_refresh_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign_refresh(user_id).expect("sign refresh");
        let claims = keys.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[tokio::test]
    async fn verify_refresh_rejects_access_token() {
        let keys = make_keys();
        let token = keys.sign_access(Uuid::new_v4()).expect("sign access");
        let err = keys.verify_refresh(&token).unwrap_err();
        assert!(err.to_string().contains("not a refresh token"));
    }

    #[tokio::test]
    async fn verify_rejects_tampered_token() {
        let keys = make_keys();
        let token = keys.sign_refresh(Uuid::new_v4()).expect("sign refresh");
        let mut tampered = token.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).expect("utf8");
        assert!(keys.verify(&tampered).is_err());
    }

    #[test]
    fn current_token_matches_stored_value() {
        assert!(ensure_current_token("tok-1", Some("tok-1")).is_ok());
    }

    #[test]
    fn rotated_away_token_is_stale() {
        let err = ensure_current_token("tok-1", Some("tok-2")).unwrap_err();
        assert!(matches!(err, RefreshError::Stale));
        assert_eq!(err.to_string(), "refresh token is expired or already used");
    }

    #[test]
    fn cleared_token_is_stale() {
        // Logout sets the stored token to NULL.
        let err = ensure_current_token("tok-1", None).unwrap_err();
        assert!(matches!(err, RefreshError::Stale));
    }
}
