//! Access middleware for Axum
//!
//! Per-request pipeline, applied as stacked layers:
//!
//! 1. [`require_ready`]: wait for the connection gate, attach the store handle
//! 2. [`require_role`] / [`optional_auth`]: read the session cookie, verify the
//!    token, check the route's role set, attach the [`AuthUser`]
//!
//! Any rejection ends the request with the uniform error envelope.

use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{cookie::CookiePolicy, jwt::Claims, JwtManager, Role, TokenError};
use crate::db::ConnectionGate;
use crate::error::{error_response, ApiError};
use crate::store::Store;

/// Resolved identity attached to a request after token verification.
///
/// Lives for one request only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub principal_id: Uuid,
    pub role: Role,
    pub expires_at: OffsetDateTime,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            principal_id: claims.sub,
            role: claims.role,
            expires_at: claims.expires_at(),
        }
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub cookie_policy: CookiePolicy,
}

impl AuthState {
    /// 401 that also tells the client to drop the dead cookie
    fn reject_invalid(&self, err: TokenError) -> Response {
        let mut response = AuthError::InvalidToken(err).into_response();
        append_clear_cookie(&mut response, &self.cookie_policy);
        response
    }
}

/// Role set a route group accepts
#[derive(Clone)]
pub struct RoleGuard {
    auth: AuthState,
    allowed: &'static [Role],
}

impl RoleGuard {
    pub fn new(auth: AuthState, allowed: &'static [Role]) -> Self {
        Self { auth, allowed }
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid session token: {0}")]
    InvalidToken(TokenError),
    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "Invalid or expired session"),
            // Never say which role would have been accepted
            AuthError::InsufficientPermissions => (StatusCode::FORBIDDEN, "Access denied"),
        };
        error_response(status, message)
    }
}

fn append_clear_cookie(response: &mut Response, policy: &CookiePolicy) {
    if let Ok(value) = HeaderValue::from_str(&policy.clear_cookie()) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

/// True if the handler already set (or cleared) the session cookie itself
fn sets_session_cookie(response: &Response, policy: &CookiePolicy) -> bool {
    let prefix = format!("{}=", policy.name());
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .any(|cookie| cookie.starts_with(&prefix))
}

/// `Ok(None)` when no session cookie was presented
fn authenticate_request(
    auth_state: &AuthState,
    request: &Request,
) -> Result<Option<AuthUser>, TokenError> {
    let Some(token) = auth_state.cookie_policy.extract_token(request.headers()) else {
        return Ok(None);
    };

    auth_state
        .jwt_manager
        .verify(&token)
        .map(|claims| Some(AuthUser::from(claims)))
}

/// Middleware that blocks until the shared data store is ready
pub async fn require_ready(
    State(gate): State<Arc<ConnectionGate<Store>>>,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.ensure_ready().await {
        Ok(store) => {
            request.extensions_mut().insert(store);
            next.run(request).await
        }
        Err(err) => {
            let retry_after = gate.retry_in().await;
            tracing::warn!(
                path = %request.uri().path(),
                error = %err,
                retry_after_ms = ?retry_after.map(|d| d.as_millis() as u64),
                "require_ready: shared resource unavailable"
            );
            ApiError::ServiceUnavailable { retry_after }.into_response()
        }
    }
}

/// Middleware that requires a valid session whose role is in the guard's set
pub async fn require_role(
    State(guard): State<RoleGuard>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_user = match authenticate_request(&guard.auth, &request) {
        Ok(Some(auth_user)) => auth_user,
        Ok(None) => {
            tracing::warn!(path = %path, "require_role: no session cookie");
            return AuthError::MissingAuth.into_response();
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "require_role: session rejected");
            return guard.auth.reject_invalid(err);
        }
    };

    if !guard.allows(auth_user.role) {
        tracing::warn!(
            path = %path,
            principal_id = %auth_user.principal_id,
            role = %auth_user.role,
            "require_role: role not permitted on this route"
        );
        return AuthError::InsufficientPermissions.into_response();
    }

    tracing::debug!(
        path = %path,
        principal_id = %auth_user.principal_id,
        role = %auth_user.role,
        "require_role: authorized"
    );
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// Middleware that optionally authenticates (public routes that benefit from a session)
///
/// An invalid cookie does not block the request, but the response clears it
/// unless the handler issued a new session cookie.
pub async fn optional_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate_request(&auth_state, &request) {
        Ok(Some(auth_user)) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => {
            tracing::debug!(
                path = %request.uri().path(),
                error = %err,
                "optional_auth: ignoring invalid session"
            );
            let mut response = next.run(request).await;
            if !sets_session_cookie(&response, &auth_state.cookie_policy) {
                append_clear_cookie(&mut response, &auth_state.cookie_policy);
            }
            response
        }
    }
}
