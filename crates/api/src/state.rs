//! Application state

use std::sync::Arc;

use crate::{
    auth::{AuthState, CookiePolicy, JwtManager, PasswordService},
    config::{Config, ConfigError},
    db::{ConnectionGate, Connector, RetryPolicy},
    store::{Store, StoreConnector},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Process-wide readiness gate for the credential store
    pub gate: Arc<ConnectionGate<Store>>,
    pub jwt_manager: JwtManager,
    pub cookie_policy: CookiePolicy,
    pub passwords: PasswordService,
}

impl AppState {
    /// Build state with the store described by the configuration
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let passwords = PasswordService::with_cost(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
        )
        .map_err(|e| ConfigError::Invalid {
            key: "ARGON2_MEMORY_KIB",
            reason: e.to_string(),
        })?;

        let connector = StoreConnector::from_config(&config, passwords.clone());
        Self::new(config, passwords, Arc::new(connector))
    }

    pub fn new(
        config: Config,
        passwords: PasswordService,
        connector: Arc<dyn Connector<Store>>,
    ) -> Result<Self, ConfigError> {
        let cookie_policy = CookiePolicy::new(
            config.cookie_secure,
            config.cookie_same_site,
            config.cookie_domain.clone(),
        )
        .map_err(|e| ConfigError::Invalid {
            key: "COOKIE_SAME_SITE",
            reason: e.to_string(),
        })?;

        if !cookie_policy.is_secure() {
            tracing::warn!("Session cookie Secure attribute disabled (COOKIE_SECURE=false); development only");
        }
        tracing::info!(
            same_site = cookie_policy.same_site().as_str(),
            secure = cookie_policy.is_secure(),
            "Session cookie policy resolved"
        );

        let jwt_manager = JwtManager::new(&config.jwt_secret, config.session_ttl);
        tracing::info!(
            ttl_hours = config.session_ttl.whole_hours(),
            "Session token manager initialized"
        );

        let gate = Arc::new(ConnectionGate::new(
            connector,
            RetryPolicy::new(config.db_retry_initial, config.db_retry_max),
            config.db_connect_timeout,
        ));

        Ok(Self {
            config,
            gate,
            jwt_manager,
            cookie_policy,
            passwords,
        })
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            cookie_policy: self.cookie_policy.clone(),
        }
    }
}
