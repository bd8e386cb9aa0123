//! Login, registration and session routes

use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use super::account::{authenticate, require_non_empty, start_session, validate_email};
use crate::{
    auth::{validate_password_strength, AuthUser, Role},
    error::{ApiError, ApiResult},
    state::AppState,
    store::{normalize_identifier, NewPrincipal, Store},
};

#[derive(Debug, Deserialize)]
pub struct StudentRegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ClubRegisterRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ClubLoginRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl SessionInfo {
    fn anonymous() -> Self {
        Self {
            authenticated: false,
            id: None,
            role: None,
            name: None,
            expires_at: None,
        }
    }
}

/// Register a student account and sign it in
pub async fn register_student(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Json(req): Json<StudentRegisterRequest>,
) -> ApiResult<Response> {
    require_non_empty(&req.name, "name")?;
    validate_email(&req.email)?;
    validate_password_strength(&req.password).map_err(ApiError::Validation)?;

    let password_hash = state.passwords.hash(&req.password).await?;
    let principal = store
        .create(NewPrincipal {
            role: Role::Student,
            identifier: normalize_identifier(&req.email),
            display_name: req.name.trim().to_string(),
            description: None,
            password_hash,
        })
        .await?;

    tracing::info!(principal_id = %principal.id, "Student registered");
    start_session(&state, &principal, StatusCode::CREATED)
}

/// Register a club account and sign it in.
///
/// The club name doubles as its login identifier.
pub async fn register_club(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Json(req): Json<ClubRegisterRequest>,
) -> ApiResult<Response> {
    require_non_empty(&req.name, "name")?;
    validate_password_strength(&req.password).map_err(ApiError::Validation)?;

    let description = Some(req.description.trim().to_string()).filter(|d| !d.is_empty());
    let password_hash = state.passwords.hash(&req.password).await?;
    let principal = store
        .create(NewPrincipal {
            role: Role::Club,
            identifier: normalize_identifier(&req.name),
            display_name: req.name.trim().to_string(),
            description,
            password_hash,
        })
        .await?;

    tracing::info!(principal_id = %principal.id, "Club registered");
    start_session(&state, &principal, StatusCode::CREATED)
}

pub async fn login_student(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Json(req): Json<EmailLoginRequest>,
) -> ApiResult<Response> {
    let principal = authenticate(&state, &store, Role::Student, &req.email, &req.password).await?;
    start_session(&state, &principal, StatusCode::OK)
}

pub async fn login_club(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Json(req): Json<ClubLoginRequest>,
) -> ApiResult<Response> {
    let principal = authenticate(&state, &store, Role::Club, &req.name, &req.password).await?;
    start_session(&state, &principal, StatusCode::OK)
}

pub async fn login_admin(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Json(req): Json<EmailLoginRequest>,
) -> ApiResult<Response> {
    let principal = authenticate(&state, &store, Role::Admin, &req.email, &req.password).await?;
    start_session(&state, &principal, StatusCode::OK)
}

/// Describe the session carried by the request, if any
pub async fn session(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let Some(auth_user) = request.extensions().get::<AuthUser>().cloned() else {
        return Ok(Json(SessionInfo::anonymous()).into_response());
    };
    let store = request
        .extensions()
        .get::<Store>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("store handle missing from request".to_string()))?;

    let name = match store.find_by_id(auth_user.principal_id).await? {
        Some(principal) if principal.role == auth_user.role => principal.display_name,
        _ => {
            // Principal is gone; stop the client from resending the cookie
            tracing::info!(
                principal_id = %auth_user.principal_id,
                "Session refers to a principal that no longer exists"
            );
            return Ok((
                AppendHeaders([(SET_COOKIE, state.cookie_policy.clear_cookie())]),
                Json(SessionInfo::anonymous()),
            )
                .into_response());
        }
    };

    Ok(Json(SessionInfo {
        authenticated: true,
        id: Some(auth_user.principal_id),
        role: Some(auth_user.role),
        name: Some(name),
        expires_at: Some(auth_user.expires_at),
    })
    .into_response())
}

/// Clear the session cookie. Safe to call any number of times.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        AppendHeaders([(SET_COOKIE, state.cookie_policy.clear_cookie())]),
        Json(json!({ "message": "Logged out" })),
    )
}
