use axum::{
    extract::{
        multipart::Field, DefaultBodyLimit, FromRef, Multipart, State,
    },
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        cookies::{self, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
        dto::{
            FilePart, LoginRequest, LoginResponse, PublicUser, RefreshRequest, RegisterForm,
            TokensResponse,
        },
        extractors::AuthUser,
        password::{hash_password, verify_password},
        repo_types::{NewUser, User},
        services::{any_blank, is_valid_email},
        tokens::{issue_token_pair, verify_refresh_token, JwtKeys, TokenPair},
    },
    error::{ApiError, ApiResult},
    response::ApiResponse,
    state::AppState,
    storage::ext_from_mime,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh))
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024)) // avatar + cover multipart
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let form = read_register_form(&mut multipart).await?;

    if any_blank([
        form.username.as_str(),
        form.fullname.as_str(),
        form.email.as_str(),
        form.password.as_str(),
    ]) {
        warn!("registration with blank fields");
        return Err(ApiError::Validation("all fields are required".into()));
    }

    let username = form.username.trim().to_lowercase();
    let email = form.email.trim().to_lowercase();

    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::Validation("a valid email is required".into()));
    }

    if User::find_by_username_or_email(&state.db, &username, &email)
        .await?
        .is_some()
    {
        warn!(%username, %email, "username or email already registered");
        return Err(ApiError::Conflict(
            "user with this username or email already exists".into(),
        ));
    }

    let avatar = form
        .avatar
        .filter(|part| !part.bytes.is_empty())
        .ok_or_else(|| {
            warn!("registration without avatar file");
            ApiError::Validation("avatar file is required".into())
        })?;

    let avatar_url = match upload_image(&state, "avatars", &avatar).await {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "avatar upload failed");
            return Err(ApiError::Validation("avatar file is required".into()));
        }
    };

    // A broken cover upload is tolerated; the profile just has no cover.
    let cover_image_url = match form.cover_image.filter(|part| !part.bytes.is_empty()) {
        Some(part) => match upload_image(&state, "covers", &part).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "cover image upload failed, continuing without");
                None
            }
        },
        None => None,
    };

    let hash = hash_password(&form.password)?;

    let user = User::create(
        &state.db,
        &NewUser {
            username: &username,
            email: &email,
            fullname: form.fullname.trim(),
            password_hash: &hash,
            avatar_url: &avatar_url,
            cover_image_url: cover_image_url.as_deref(),
        },
    )
    .await?;

    info!(user_id = %user.id, %username, "user registered");
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        PublicUser::from(user),
        "user registered successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(HeaderMap, ApiResponse<LoginResponse>)> {
    // At least one identifier, matching the lookup below.
    let username = payload
        .username
        .as_deref()
        .map(|u| u.trim().to_lowercase())
        .unwrap_or_default();
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();

    if username.is_empty() && email.is_empty() {
        warn!("login without username or email");
        return Err(ApiError::Validation("username or email is required".into()));
    }

    let user = User::find_by_username_or_email(&state.db, &username, &email)
        .await?
        .ok_or_else(|| {
            warn!(%username, %email, "login for unknown user");
            ApiError::NotFound("user does not exist".into())
        })?;

    let password_ok = verify_password(&payload.password, &user.password_hash)?;
    if !password_ok {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Unauthorized("invalid user credentials".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let pair = issue_token_pair(&state.db, &keys, user.id).await?;
    let set_cookies = token_cookies(&pair)?;

    // Re-read so the response reflects the stored row.
    let user = User::find_by_id(&state.db, user.id).await?.ok_or_else(|| {
        error!(user_id = %user.id, "user row vanished during login");
        ApiError::Internal(anyhow::anyhow!("user not found after login"))
    })?;

    info!(user_id = %user.id, "user logged in");
    let body = LoginResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: PublicUser::from(user),
    };
    Ok((
        set_cookies,
        ApiResponse::new(StatusCode::OK, body, "user logged in successfully"),
    ))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<(HeaderMap, ApiResponse<serde_json::Value>)> {
    User::clear_refresh_token(&state.db, user_id).await?;

    let mut set_cookies = HeaderMap::new();
    set_cookies.append(
        SET_COOKIE,
        cookies::clear_cookie(ACCESS_TOKEN_COOKIE).map_err(into_internal)?,
    );
    set_cookies.append(
        SET_COOKIE,
        cookies::clear_cookie(REFRESH_TOKEN_COOKIE).map_err(into_internal)?,
    );

    info!(%user_id, "user logged out");
    Ok((
        set_cookies,
        ApiResponse::new(StatusCode::OK, serde_json::json!({}), "user logged out"),
    ))
}

#[instrument(skip(state, headers, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> ApiResult<(HeaderMap, ApiResponse<TokensResponse>)> {
    let incoming = cookies::extract_cookie(&headers, REFRESH_TOKEN_COOKIE)
        .or_else(|| payload.and_then(|Json(body)| body.refresh_token))
        .filter(|t| !t.trim().is_empty());

    let Some(incoming) = incoming else {
        warn!("refresh without a token");
        return Err(ApiError::Unauthorized("refresh token is required".into()));
    };

    let keys = JwtKeys::from_ref(&state);
    let user_id = verify_refresh_token(&state.db, &keys, &incoming)
        .await
        .map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            ApiError::Unauthorized(e.to_string())
        })?;

    let pair = issue_token_pair(&state.db, &keys, user_id).await?;
    let set_cookies = token_cookies(&pair)?;

    info!(%user_id, "access token refreshed");
    let body = TokensResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    Ok((
        set_cookies,
        ApiResponse::new(StatusCode::OK, body, "access token refreshed"),
    ))
}

async fn read_register_form(multipart: &mut Multipart) -> Result<RegisterForm, ApiError> {
    let mut form = RegisterForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "malformed multipart body");
        ApiError::Validation("malformed multipart body".into())
    })? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "username" => form.username = read_text(field).await?,
            "fullname" => form.fullname = read_text(field).await?,
            "email" => form.email = read_text(field).await?,
            "password" => form.password = read_text(field).await?,
            "avatar" => form.avatar = Some(read_file(field).await?),
            "coverImage" => form.cover_image = Some(read_file(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(|e| {
        warn!(error = %e, "unreadable multipart field");
        ApiError::Validation("malformed multipart body".into())
    })
}

async fn read_file(field: Field<'_>) -> Result<FilePart, ApiError> {
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".into());
    let bytes = field.bytes().await.map_err(|e| {
        warn!(error = %e, "unreadable multipart file");
        ApiError::Validation("malformed multipart body".into())
    })?;
    Ok(FilePart {
        bytes,
        content_type,
    })
}

async fn upload_image(state: &AppState, prefix: &str, part: &FilePart) -> anyhow::Result<String> {
    let ext = ext_from_mime(&part.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", prefix, Uuid::new_v4(), ext);
    state
        .media
        .upload(&key, part.bytes.clone(), &part.content_type)
        .await
}

fn token_cookies(pair: &TokenPair) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        cookies::auth_cookie(ACCESS_TOKEN_COOKIE, &pair.access_token).map_err(into_internal)?,
    );
    headers.append(
        SET_COOKIE,
        cookies::auth_cookie(REFRESH_TOKEN_COOKIE, &pair.refresh_token).map_err(into_internal)?,
    );
    Ok(headers)
}

fn into_internal<E: std::error::Error + Send + Sync + 'static>(e: E) -> ApiError {
    ApiError::Internal(anyhow::Error::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_cookies_sets_both_cookies() {
        let pair = TokenPair {
            access_token: "acc.token".into(),
            refresh_token: "ref.token".into(),
        };
        let headers = token_cookies(&pair).expect("build cookies");
        let values: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().expect("ascii"))
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("accessToken=acc.token"));
        assert!(values[1].starts_with("refreshToken=ref.token"));
        assert!(values.iter().all(|v| v.contains("HttpOnly")));
        assert!(values.iter().all(|v| v.contains("Secure")));
    }

    #[tokio::test]
    async fn upload_image_keys_by_mime() {
        let state = crate::state::AppState::fake();
        let part = FilePart {
            bytes: bytes::Bytes::from_static(b"png-bytes"),
            content_type: "image/png".into(),
        };
        let url = upload_image(&state, "avatars", &part)
            .await
            .expect("fake upload");
        assert!(url.starts_with("https://media.fake.local/avatars/"));
        assert!(url.ends_with(".png"));
    }
}
