use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::jwt::{AuthUser, TokenKind};
use crate::models::user::{
    AuthResponse, DbUser, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, User,
};
use crate::utils::{digest_token, hash_password, utc_now, verify_password};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    ensure_email_available(&state.pool, &payload.email).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let user: User = fetch_user_by_id(&state.pool, user_id).await?.try_into()?;

    log_activity(
        &state.event_bus,
        "registered",
        Some(user.id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    let response = issue_tokens(&state, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, created_at, updated_at, deleted_at \
         FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(&payload.email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let user: User = db_user.try_into()?;
    let response = issue_tokens(&state, user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Refresh token invalid, expired or revoked")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let claims = state.jwt.decode(&payload.refresh_token, TokenKind::Refresh)?;

    // Rotation: the presented token must be live in storage and dies here.
    let revoked = sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = ? \
         WHERE token_hash = ? AND revoked_at IS NULL AND expires_at > ?",
    )
    .bind(utc_now())
    .bind(digest_token(&payload.refresh_token))
    .bind(utc_now())
    .execute(&state.pool)
    .await?;

    if revoked.rows_affected() == 0 {
        return Err(AppError::token("refresh token unknown or revoked"));
    }

    let user: User = fetch_user_by_id(&state.pool, claims.sub).await?.try_into()?;
    let response = issue_tokens(&state, user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    request_body = LogoutRequest,
    responses((status = 200, description = "Refresh token revoked", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(payload): Json<LogoutRequest>,
) -> AppResult<Json<MessageResponse>> {
    sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE token_hash = ? AND revoked_at IS NULL")
        .bind(utc_now())
        .bind(digest_token(&payload.refresh_token))
        .execute(&state.pool)
        .await?;

    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let user: User = fetch_user_by_id(&state.pool, auth.user_id).await?.try_into()?;
    Ok(Json(user))
}

async fn issue_tokens(state: &AppState, user: User) -> AppResult<AuthResponse> {
    let access_token = state.jwt.encode_access(user.id)?;
    let (refresh_token, expires_at) = state.jwt.encode_refresh(user.id)?;

    sqlx::query(
        "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user.id.to_string())
    .bind(digest_token(&refresh_token))
    .bind(expires_at)
    .bind(utc_now())
    .execute(&state.pool)
    .await?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        user,
    })
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_one(pool)
            .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

pub(crate) async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, created_at, updated_at, deleted_at \
         FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}
