//! Shared session and credential handling used by every role's routes

use axum::{
    http::{header::SET_COOKIE, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{validate_password_strength, AuthUser, Role},
    error::{ApiError, ApiResult},
    state::AppState,
    store::{normalize_identifier, CredentialUpdate, Principal, Store},
};

/// Body returned whenever a session cookie is issued
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    /// E-mail for students and administrators, club name for clubs
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Principal> for ProfileResponse {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            role: principal.role,
            name: principal.display_name,
            identifier: principal.identifier,
            description: principal.description,
            created_at: principal.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Issue a token for `principal` and attach it as the session cookie
pub fn start_session(
    state: &AppState,
    principal: &Principal,
    status: StatusCode,
) -> ApiResult<Response> {
    let session = state.jwt_manager.issue(principal.id, principal.role)?;
    let cookie = state.cookie_policy.session_cookie(&session);

    tracing::info!(
        principal_id = %principal.id,
        role = %principal.role,
        expires_at = session.claims.exp,
        "Session issued"
    );

    let body = SessionResponse {
        id: principal.id,
        role: principal.role,
        name: principal.display_name.clone(),
        expires_at: session.claims.expires_at(),
    };

    Ok((status, AppendHeaders([(SET_COOKIE, cookie)]), Json(body)).into_response())
}

/// Resolve login credentials within one role.
///
/// Unknown identifier and wrong password produce the same error and cost the
/// same amount of hashing work.
pub async fn authenticate(
    state: &AppState,
    store: &Store,
    role: Role,
    identifier: &str,
    password: &str,
) -> ApiResult<Principal> {
    if identifier.trim().is_empty() || password.is_empty() {
        return Err(ApiError::Validation("All fields are required".to_string()));
    }

    let principal = store
        .find_by_credentials(&normalize_identifier(identifier), role)
        .await?;
    let verified = state
        .passwords
        .verify(password, principal.as_ref().map(|p| p.password_hash.as_str()))
        .await?;

    match principal {
        Some(principal) if verified => Ok(principal),
        _ => {
            tracing::warn!(role = %role, "Login rejected: invalid credentials");
            Err(ApiError::CredentialInvalid)
        }
    }
}

/// Load the principal behind the current session
pub async fn load_principal(store: &Store, auth_user: &AuthUser) -> ApiResult<Principal> {
    match store.find_by_id(auth_user.principal_id).await? {
        Some(principal) if principal.role == auth_user.role => Ok(principal),
        _ => {
            tracing::warn!(
                principal_id = %auth_user.principal_id,
                "Session refers to a principal that no longer exists"
            );
            Err(ApiError::NotFound)
        }
    }
}

/// Check the current password, apply `update`, and re-issue the session cookie
pub async fn rotate_credentials(
    state: &AppState,
    store: &Store,
    auth_user: &AuthUser,
    current_password: &str,
    update: CredentialUpdate,
) -> ApiResult<Response> {
    if update.is_empty() {
        return Err(ApiError::Validation("Nothing to update".to_string()));
    }

    let principal = load_principal(store, auth_user).await?;
    if !state
        .passwords
        .verify(current_password, Some(&principal.password_hash))
        .await?
    {
        tracing::warn!(
            principal_id = %principal.id,
            "Credential rotation rejected: wrong current password"
        );
        return Err(ApiError::CredentialInvalid);
    }

    store.update_credentials(principal.id, update).await?;
    tracing::info!(principal_id = %principal.id, role = %principal.role, "Credentials rotated");

    start_session(state, &principal, StatusCode::OK)
}

/// Password rotation shared by the student and club routes
pub async fn change_password(
    state: &AppState,
    store: &Store,
    auth_user: &AuthUser,
    req: ChangePasswordRequest,
) -> ApiResult<Response> {
    validate_password_strength(&req.new_password).map_err(ApiError::Validation)?;

    let password_hash = state.passwords.hash(&req.new_password).await?;
    rotate_credentials(
        state,
        store,
        auth_user,
        &req.current_password,
        CredentialUpdate {
            identifier: None,
            password_hash: Some(password_hash),
        },
    )
    .await
}

/// Loose shape check; deliverability is not our concern
pub fn validate_email(email: &str) -> ApiResult<()> {
    let email = email.trim();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
        .unwrap_or(false);
    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(ApiError::Validation("Invalid email address".to_string()))
    }
}

pub fn require_non_empty(value: &str, field: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ada@campus.edu").is_ok());
        assert!(validate_email(" ada@campus.edu ").is_ok());
        assert!(validate_email("ada").is_err());
        assert!(validate_email("@campus.edu").is_err());
        assert!(validate_email("ada@campus").is_err());
        assert!(validate_email("a da@campus.edu").is_err());
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("Chess Club", "name").is_ok());
        assert!(matches!(
            require_non_empty("   ", "name"),
            Err(ApiError::Validation(msg)) if msg == "name is required"
        ));
    }
}
