use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::warn;
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use super::cookies;
use crate::error::ApiError;
use crate::state::AppState;

/// Extracts and validates the access token, returning the user ID.
///
/// The token is taken from the `Authorization: Bearer` header or, for
/// browser clients, from the `accessToken` cookie.
#[derive(Debug)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::to_string);

        let token = bearer
            .or_else(|| cookies::extract_cookie(&parts.headers, cookies::ACCESS_TOKEN_COOKIE))
            .ok_or_else(|| ApiError::Unauthorized("missing access token".into()))?;

        let cfg = &state.config.jwt;
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&cfg.audience));
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));
        let decoding = DecodingKey::from_secret(cfg.secret.as_bytes());

        let data = decode::<Claims>(&token, &decoding, &validation).map_err(|e| {
            warn!(error = %e, "invalid or expired access token");
            ApiError::Unauthorized("invalid or expired token".into())
        })?;

        if data.claims.kind != TokenKind::Access {
            return Err(ApiError::Unauthorized("access token required".into()));
        }

        Ok(AuthUser(data.claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::JwtKeys;
    use axum::extract::FromRef;
    use axum::http::Request;

    fn parts_with_header(name: axum::http::HeaderName, value: String) -> Parts {
        let request = Request::builder()
            .uri("/")
            .header(name, value)
            .body(())
            .expect("build request");
        request.into_parts().0
    }

    #[tokio::test]
    async fn accepts_bearer_access_token() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let user_id = Uuid::new_v4();
        let token = keys.sign_access(user_id).expect("sign access");

        let mut parts = parts_with_header(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}"),
        );
        let AuthUser(got) = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("extract user");
        assert_eq!(got, user_id);
    }

    #[tokio::test]
    async fn accepts_access_token_cookie() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let user_id = Uuid::new_v4();
        let token = keys.sign_access(user_id).expect("sign access");

        let mut parts = parts_with_header(
            axum::http::header::COOKIE,
            format!("accessToken={token}"),
        );
        let AuthUser(got) = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("extract user");
        assert_eq!(got, user_id);
    }

    #[tokio::test]
    async fn rejects_refresh_token_as_access() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let token = keys.sign_refresh(Uuid::new_v4()).expect("sign refresh");

        let mut parts = parts_with_header(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}"),
        );
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn rejects_missing_token() {
        let state = AppState::fake();
        let request = Request::builder().uri("/").body(()).expect("build request");
        let mut parts = request.into_parts().0;
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
