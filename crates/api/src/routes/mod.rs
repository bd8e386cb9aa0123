//! API routes

pub mod account;
pub mod admin;
pub mod auth;
pub mod club;
pub mod health;
pub mod student;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{
    auth::{optional_auth, require_ready, require_role, Role, RoleGuard},
    state::AppState,
};

const STUDENT_ONLY: &[Role] = &[Role::Student];
const CLUB_ONLY: &[Role] = &[Role::Club];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Create the main router.
///
/// Layers on a group wrap only the routes added before them, so the gate layer
/// is added last and runs first: gate, then session, then handler.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Login / registration: a session is optional and may be replaced
    let auth_routes = Router::new()
        .route("/student/register", post(auth::register_student))
        .route("/student/login", post(auth::login_student))
        .route("/club/register", post(auth::register_club))
        .route("/club/login", post(auth::login_club))
        .route("/admin/login", post(auth::login_admin))
        .route("/session", get(auth::session))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            optional_auth,
        ));

    let student_routes = Router::new()
        .route("/me", get(student::me))
        .route("/change-password", put(student::change_password))
        .layer(middleware::from_fn_with_state(
            RoleGuard::new(auth_state.clone(), STUDENT_ONLY),
            require_role,
        ));

    let club_routes = Router::new()
        .route("/me", get(club::me))
        .route("/change-password", put(club::change_password))
        .layer(middleware::from_fn_with_state(
            RoleGuard::new(auth_state.clone(), CLUB_ONLY),
            require_role,
        ));

    let admin_routes = Router::new()
        .route("/me", get(admin::me))
        .route("/reset-admin", post(admin::reset_admin))
        .layer(middleware::from_fn_with_state(
            RoleGuard::new(auth_state, ADMIN_ONLY),
            require_role,
        ));

    let gated = Router::new()
        .nest("/auth", auth_routes)
        .nest("/student", student_routes)
        .nest("/club", club_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            require_ready,
        ));

    // Never wait on the data store
    let ungated = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/auth/logout", get(auth::logout).post(auth::logout));

    Router::new()
        .nest("/api", ungated.merge(gated))
        .with_state(state)
}
