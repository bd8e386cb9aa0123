//! Identity and session layer: tokens, cookies, passwords and access middleware

pub mod cookie;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod role;

pub use cookie::{CookiePolicy, CookiePolicyError, SameSite, SESSION_COOKIE_NAME};
pub use jwt::{Claims, JwtManager, SessionToken, TokenError, DEFAULT_SESSION_TTL};
pub use middleware::{
    optional_auth, require_ready, require_role, AuthError, AuthState, AuthUser, RoleGuard,
};
pub use password::{validate_password_strength, PasswordError, PasswordService};
pub use role::{Role, UnknownRole};
