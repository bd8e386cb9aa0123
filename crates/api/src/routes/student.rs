//! Student routes

use axum::{extract::State, response::Response, Extension, Json};

use super::account::{self, ChangePasswordRequest, ProfileResponse};
use crate::{auth::AuthUser, error::ApiResult, state::AppState, store::Store};

pub async fn me(
    Extension(store): Extension<Store>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let principal = account::load_principal(&store, &auth_user).await?;
    Ok(Json(principal.into()))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(store): Extension<Store>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Response> {
    account::change_password(&state, &store, &auth_user, req).await
}
