//! Configuration loaded from the environment
//!
//! Everything is validated here, once, at boot. A bad value is fatal for the
//! process; nothing is re-read per request.

use std::time::Duration;

use crate::auth::{jwt::MIN_SECRET_LENGTH, validate_password_strength, SameSite};
use crate::store::AdminSeed;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout: Duration,
    pub db_retry_initial: Duration,
    pub db_retry_max: Duration,
    pub db_eager_connect: bool,
    pub run_migrations: bool,
    pub jwt_secret: String,
    pub session_ttl: time::Duration,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub cookie_domain: Option<String>,
    /// Trusted front-end origins allowed to send credentialed requests
    pub allowed_origins: Vec<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
    pub log_format: LogFormat,
}

// Secrets stay out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_connect_timeout", &self.db_connect_timeout)
            .field("db_retry_initial", &self.db_retry_initial)
            .field("db_retry_max", &self.db_retry_max)
            .field("session_ttl", &self.session_ttl)
            .field("cookie_secure", &self.cookie_secure)
            .field("cookie_same_site", &self.cookie_same_site)
            .field("allowed_origins", &self.allowed_origins)
            .field("admin_seed", &self.admin_email.is_some())
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load from `.env` (if present) and the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LENGTH {
            return Err(invalid(
                "JWT_SECRET",
                format!("must be at least {} bytes", MIN_SECRET_LENGTH),
            ));
        }

        let session_ttl_hours: i64 = parse_or(get("SESSION_TTL_HOURS"), "SESSION_TTL_HOURS", 168)?;
        if session_ttl_hours <= 0 {
            return Err(invalid("SESSION_TTL_HOURS", "must be positive"));
        }

        let cookie_same_site = match get("COOKIE_SAME_SITE") {
            Some(value) => value
                .parse::<SameSite>()
                .map_err(|reason| invalid("COOKIE_SAME_SITE", reason))?,
            None => SameSite::None,
        };

        let allowed_origins: Vec<String> = get("FRONTEND_URL")
            .unwrap_or_else(|| "http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        if allowed_origins.is_empty() {
            return Err(invalid("FRONTEND_URL", "no origins given"));
        }
        if let Some(origin) = allowed_origins
            .iter()
            .find(|o| *o == "*" || !(o.starts_with("http://") || o.starts_with("https://")))
        {
            return Err(invalid(
                "FRONTEND_URL",
                format!(
                    "{:?} is not an explicit http(s) origin; credentialed CORS needs exact origins",
                    origin
                ),
            ));
        }

        let admin_email = get("ADMIN_EMAIL");
        let admin_password = get("ADMIN_PASSWORD");
        if admin_email.is_some() != admin_password.is_some() {
            return Err(invalid(
                "ADMIN_EMAIL",
                "ADMIN_EMAIL and ADMIN_PASSWORD must be set together",
            ));
        }
        if let Some(password) = &admin_password {
            validate_password_strength(password).map_err(|reason| invalid("ADMIN_PASSWORD", reason))?;
        }

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(invalid(
                    "LOG_FORMAT",
                    format!("expected text or json, got {:?}", other),
                ))
            }
        };

        let db_retry_initial =
            Duration::from_millis(parse_or(get("DB_RETRY_INITIAL_MS"), "DB_RETRY_INITIAL_MS", 500)?);
        let db_retry_max =
            Duration::from_millis(parse_or(get("DB_RETRY_MAX_MS"), "DB_RETRY_MAX_MS", 30_000)?);
        // Zero would retry on every request after a failure
        if db_retry_initial.is_zero() {
            return Err(invalid("DB_RETRY_INITIAL_MS", "must be positive"));
        }
        if db_retry_max < db_retry_initial {
            return Err(invalid(
                "DB_RETRY_MAX_MS",
                "must not be smaller than DB_RETRY_INITIAL_MS",
            ));
        }

        let db_max_connections: u32 = parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10)?;
        if db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "must be positive"));
        }
        let db_connect_timeout_secs: u64 =
            parse_or(get("DB_CONNECT_TIMEOUT_SECS"), "DB_CONNECT_TIMEOUT_SECS", 10)?;
        if db_connect_timeout_secs == 0 {
            return Err(invalid("DB_CONNECT_TIMEOUT_SECS", "must be positive"));
        }

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            database_url,
            db_max_connections,
            db_connect_timeout: Duration::from_secs(db_connect_timeout_secs),
            db_retry_initial,
            db_retry_max,
            db_eager_connect: parse_bool(get("DB_EAGER_CONNECT"), "DB_EAGER_CONNECT", true)?,
            run_migrations: parse_bool(get("RUN_MIGRATIONS"), "RUN_MIGRATIONS", true)?,
            jwt_secret,
            session_ttl: time::Duration::hours(session_ttl_hours),
            cookie_secure: parse_bool(get("COOKIE_SECURE"), "COOKIE_SECURE", true)?,
            cookie_same_site,
            cookie_domain: get("COOKIE_DOMAIN"),
            allowed_origins,
            admin_email,
            admin_password,
            argon2_memory_kib: parse_or(
                get("ARGON2_MEMORY_KIB"),
                "ARGON2_MEMORY_KIB",
                argon2::Params::DEFAULT_M_COST,
            )?,
            argon2_iterations: parse_or(
                get("ARGON2_ITERATIONS"),
                "ARGON2_ITERATIONS",
                argon2::Params::DEFAULT_T_COST,
            )?,
            argon2_parallelism: parse_or(
                get("ARGON2_PARALLELISM"),
                "ARGON2_PARALLELISM",
                argon2::Params::DEFAULT_P_COST,
            )?,
            log_format,
        })
    }

    pub fn admin_seed(&self) -> Option<AdminSeed> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some(AdminSeed {
                email: email.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(invalid(key, format!("expected a boolean, got {:?}", other))),
    }
}
