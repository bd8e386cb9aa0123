//! Administrator routes

use axum::{extract::State, response::Response, Extension, Json};
use serde::Deserialize;

use super::account::{self, ProfileResponse};
use crate::{
    auth::{validate_password_strength, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
    store::{normalize_identifier, CredentialUpdate, Store},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetAdminRequest {
    pub current_password: String,
    pub new_email: Option<String>,
    pub new_password: Option<String>,
}

pub async fn me(
    Extension(store): Extension<Store>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let principal = account::load_principal(&store, &auth_user).await?;
    Ok(Json(principal.into()))
}

/// Rotate the administrator's login e-mail and/or password
pub async fn reset_admin(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ResetAdminRequest>,
) -> ApiResult<Response> {
    let new_email = req
        .new_email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty());
    let new_password = req.new_password.as_deref().filter(|p| !p.is_empty());

    if new_email.is_none() && new_password.is_none() {
        return Err(ApiError::Validation(
            "Provide a new email or a new password".to_string(),
        ));
    }

    let mut update = CredentialUpdate::default();
    if let Some(email) = new_email {
        account::validate_email(email)?;
        update.identifier = Some(normalize_identifier(email));
    }
    if let Some(password) = new_password {
        validate_password_strength(password).map_err(ApiError::Validation)?;
        update.password_hash = Some(state.passwords.hash(password).await?);
    }

    account::rotate_credentials(&state, &store, &auth_user, &req.current_password, update).await
}
