// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! ClubHub API Library
//!
//! Request-time gatekeeper for the ClubHub backend: the connection gate in
//! front of the credential store, signed session tokens, the session cookie
//! policy and the role-based access middleware.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use app::build_app;
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
