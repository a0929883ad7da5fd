use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;

/// Short-lived access tokens plus long-lived refresh tokens, signed with
/// separate secrets. The `kind` claim keeps one from standing in for the
/// other even when both secrets are the same.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    secret: Arc<Vec<u8>>,
    refresh_secret: Arc<Vec<u8>>,
    access_ttl_minutes: i64,
    refresh_ttl_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub kind: TokenKind,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret =
            std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let refresh_secret = std::env::var("JWT_REFRESH_SECRET").unwrap_or_else(|_| secret.clone());

        let access_ttl_minutes = env_i64("JWT_ACCESS_TTL_MINUTES", 30)?;
        let refresh_ttl_days = env_i64("JWT_REFRESH_TTL_DAYS", 30)?;

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            refresh_secret: Arc::new(refresh_secret.into_bytes()),
            access_ttl_minutes,
            refresh_ttl_days,
        })
    }

    pub fn encode_access(&self, user_id: Uuid) -> Result<String, AppError> {
        self.encode(user_id, TokenKind::Access, Duration::minutes(self.access_ttl_minutes), &self.secret)
            .map(|(token, _)| token)
    }

    /// Returns the token together with its expiry so the caller can persist
    /// the revocation record.
    pub fn encode_refresh(&self, user_id: Uuid) -> Result<(String, DateTime<Utc>), AppError> {
        self.encode(
            user_id,
            TokenKind::Refresh,
            Duration::days(self.refresh_ttl_days),
            &self.refresh_secret,
        )
    }

    fn encode(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        ttl: Duration,
        key: &[u8],
    ) -> Result<(String, DateTime<Utc>), AppError> {
        let now = Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            sub: user_id,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
            kind,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(key))
            .map_err(|err| AppError::token(err.to_string()))?;

        Ok((token, exp))
    }

    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, AppError> {
        let key = match expected {
            TokenKind::Access => &self.secret,
            TokenKind::Refresh => &self.refresh_secret,
        };

        let mut validation = Validation::default();
        validation.validate_exp = true;

        let claims = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(key), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))?;

        if claims.kind != expected {
            return Err(AppError::token("wrong token kind"));
        }

        Ok(claims)
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid integer"))),
        Err(_) => Ok(default),
    }
}

/// Pulls a bearer token out of an Authorization header, if one is present.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token, TokenKind::Access)?;

        Ok(AuthUser { user_id: claims.sub })
    }
}
