//! Accounts, bearer tokens and admin gating.
//!
//! Missing `JWT_SECRET`/`ADMIN_SECRET` environment variables mint a
//! cryptographically random per-process secret and log a warning; tokens
//! and admin access then do not survive a restart.

use std::sync::OnceLock;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use grantline_core::{Error, User};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

static JWT_SECRET: OnceLock<Vec<u8>> = OnceLock::new();
static ADMIN_SECRET: OnceLock<String> = OnceLock::new();

const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_TTL_HOURS: i64 = 24;

fn random_secret() -> String {
    let mut buf = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn jwt_secret() -> &'static [u8] {
    JWT_SECRET.get_or_init(|| {
        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret.trim().as_bytes().to_vec(),
            _ => {
                warn!(
                    subsystem = "api",
                    component = "auth",
                    "JWT_SECRET is not set; using ephemeral in-memory fallback secret"
                );
                random_secret().into_bytes()
            }
        }
    })
}

fn admin_secret() -> &'static str {
    ADMIN_SECRET.get_or_init(|| match std::env::var("ADMIN_SECRET") {
        Ok(secret) if !secret.trim().is_empty() => secret.trim().to_string(),
        _ => {
            warn!(
                subsystem = "api",
                component = "auth",
                "ADMIN_SECRET is not set; using ephemeral in-memory fallback secret"
            );
            random_secret()
        }
    })
}

/// Constant-time string comparison for secret checks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

fn generate_token(user_id: Uuid) -> ApiResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret()),
    )
    .map_err(|e| ApiError(Error::Internal(format!("signing token: {}", e))))
}

/// Authenticated user id extracted from a bearer token.
pub struct AuthUser(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError(Error::Unauthorized("missing Authorization header".into())))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError(Error::Unauthorized("invalid Authorization header".into())))?;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret()),
            &Validation::default(),
        )
        .map_err(|_| ApiError(Error::Unauthorized("invalid or expired token".into())))?;

        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApiError(Error::Unauthorized("invalid token subject".into())))?;

        Ok(AuthUser(user_id))
    }
}

/// Gate admin routes on `X-Admin-Secret` or `Authorization: Bearer <secret>`.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    let secret = admin_secret();
    let headers = request.headers();

    if let Some(v) = headers.get("X-Admin-Secret").and_then(|v| v.to_str().ok()) {
        if constant_time_eq(v, secret) {
            return Ok(next.run(request).await);
        }
    }
    if let Some(v) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if constant_time_eq(v, secret) {
            return Ok(next.run(request).await);
        }
    }

    Err(ApiError(Error::Unauthorized(
        "unauthorized admin access".into(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<AuthResponse>)> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError(Error::InvalidInput("invalid email".into())));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError(Error::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))));
    }

    if state.db.users.email_exists(&email).await? {
        return Err(ApiError(Error::Conflict("user already exists".into())));
    }

    let hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError(Error::Internal(format!("hashing failed: {}", e))))?;

    let user = state.db.users.insert(&email, &hash).await?;
    let token = generate_token(user.id)?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(AuthResponse { token, user }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();

    let Some(mut user) = state.db.users.get_by_email(&email).await? else {
        return Err(ApiError(Error::Unauthorized("invalid credentials".into())));
    };

    let matches = bcrypt::verify(&req.password, &user.password_hash)
        .map_err(|e| ApiError(Error::Internal(format!("verifying password: {}", e))))?;
    if !matches {
        return Err(ApiError(Error::Unauthorized("invalid credentials".into())));
    }

    user.password_hash = String::new();
    let token = generate_token(user.id)?;
    Ok(Json(AuthResponse { token, user }))
}

pub async fn save_opportunity(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    axum::extract::Path(id): axum::extract::Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    state.db.users.save_opportunity(user_id, id).await?;
    Ok(axum::http::StatusCode::OK)
}

pub async fn unsave_opportunity(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    axum::extract::Path(id): axum::extract::Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.db.users.unsave_opportunity(user_id, id).await?;
    Ok(Json(serde_json::json!({ "status": "unsaved" })))
}

pub async fn saved_opportunities(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<grantline_core::Opportunity>>> {
    let opps = state.db.users.saved_opportunities(user_id).await?;
    Ok(Json(opps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings_only() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secrets"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn random_secrets_are_distinct_and_url_safe() {
        let a = random_secret();
        let b = random_secret();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn token_round_trips_subject() {
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id).unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(jwt_secret()),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user_id.to_string());
        assert!(data.claims.exp > data.claims.iat);
    }
}
