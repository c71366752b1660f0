//! Identity endpoints: sign-up, sign-in, sign-out, refresh, and the caller's
//! own view of their session.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::response::{AppendHeaders, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::api;
use crate::auth::gate::{
    ACCESS_COOKIE, AuthUser, FRONT_COOKIE, REFRESH_COOKIE, extract_refresh_cookie,
};
use crate::config::Config;
use crate::error::ApiError;
use crate::identity::{CustomClaims, IssuedSession};
use crate::store::{AppState, platform_admins};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/signin", post(signin))
        .route("/auth/signout", post(signout))
        .route("/auth/session/refresh", post(refresh))
        .route("/auth/me", get(me))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

fn session_cookies(config: &Config, session: &IssuedSession) -> Vec<(axum::http::HeaderName, String)> {
    let secure = if config.app_env.is_production() {
        "; Secure"
    } else {
        ""
    };
    let access_max_age = (session.front.access_expires_at - Utc::now())
        .num_seconds()
        .max(0);
    // Front-channel metadata: readable by the UI, never trusted by the core.
    let front_value = format!(
        "{}.{}",
        session.front.user_id,
        session.front.access_expires_at.timestamp()
    );

    vec![
        (
            SET_COOKIE,
            format!(
                "{ACCESS_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={access_max_age}{secure}",
                session.access_token
            ),
        ),
        (
            SET_COOKIE,
            format!(
                "{REFRESH_COOKIE}={}; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=2592000{secure}",
                session.refresh_token
            ),
        ),
        (
            SET_COOKIE,
            format!(
                "{FRONT_COOKIE}={front_value}; Path=/; SameSite=Lax; Max-Age={access_max_age}{secure}"
            ),
        ),
    ]
}

fn clear_cookies() -> Vec<(axum::http::HeaderName, String)> {
    vec![
        (
            SET_COOKIE,
            format!("{ACCESS_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
        ),
        (
            SET_COOKIE,
            format!("{REFRESH_COOKIE}=; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=0"),
        ),
        (
            SET_COOKIE,
            format!("{FRONT_COOKIE}=; Path=/; SameSite=Lax; Max-Age=0"),
        ),
    ]
}

fn session_body(session: &IssuedSession) -> serde_json::Value {
    serde_json::json!({
        "user_id": session.front.user_id,
        "access_token": session.access_token,
        "refresh_token": session.refresh_token,
        "access_expires_at": session.front.access_expires_at,
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(email = %body.email), err)]
async fn signup(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::check_email(&body.email)?;
    validation::check_password(&body.password)?;

    let user_id = state
        .identity
        .create_email_password_user(&body.email, &body.password, CustomClaims::default())
        .await?;

    let session = state
        .identity
        .issue_session(user_id, CustomClaims::default())
        .await?;

    Ok((
        AppendHeaders(session_cookies(&state.config, &session)),
        api::created(session_body(&session)),
    ))
}

#[tracing::instrument(skip(state, body), fields(email = %body.email), err)]
async fn signin(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .identity
        .verify_email_password(&body.email, &body.password)
        .await?;

    Ok((
        AppendHeaders(session_cookies(&state.config, &session)),
        api::ok(session_body(&session)),
    ))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id), err)]
async fn signout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state.identity.revoke_session(auth.session_handle).await?;

    Ok((
        AppendHeaders(clear_cookies()),
        api::ok_message("signed out"),
    ))
}

/// Consumes the refresh token (body field or cookie) and rotates it.
async fn refresh(
    State(state): State<AppState>,
    parts: Parts,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = body
        .and_then(|Json(b)| b.refresh_token)
        .or_else(|| extract_refresh_cookie(&parts))
        .ok_or(ApiError::Unauthenticated)?;

    let session = state.identity.refresh_session(&refresh_token).await?;

    Ok((
        AppendHeaders(session_cookies(&state.config, &session)),
        api::ok(session_body(&session)),
    ))
}

/// Resolves the two-phase admin check in one round trip: clients must not
/// issue tenant-scoped requests until `is_platform_admin` is known.
async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<impl IntoResponse, ApiError> {
    let is_platform_admin = platform_admins::is_admin(&state.pool, auth.user_id).await?;
    let email = state.identity.user_email(auth.user_id).await?;

    Ok(api::ok(serde_json::json!({
        "user_id": auth.user_id,
        "email": email,
        "is_platform_admin": is_platform_admin,
        "claims": auth.claims,
    })))
}
