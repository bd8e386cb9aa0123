//! Credential store
//!
//! The abstract repository this core authenticates against. Principals are owned
//! by the data collaborator; the core only reads them during login and writes
//! them during registration and credential rotation, never during routine
//! request authorization.

pub mod memory;
pub mod postgres;

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{PasswordService, Role};
use crate::config::Config;
use crate::db::{self, ConnectError, ConnectFuture, Connector};

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

/// Handle the connection gate hands to every request once the data store is up
pub type Store = Arc<dyn CredentialStore>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a principal with this identifier already exists")]
    Conflict,
    #[error("principal not found")]
    NotFound,
    #[error("corrupt principal record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Authenticated identity as stored by the data collaborator
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    /// Normalized login identifier (e-mail for students/admins, name for clubs)
    pub identifier: String,
    pub display_name: String,
    pub description: Option<String>,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub role: Role,
    pub identifier: String,
    pub display_name: String,
    pub description: Option<String>,
    pub password_hash: String,
}

/// Fields a credential rotation may change
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub identifier: Option<String>,
    pub password_hash: Option<String>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.identifier.is_none() && self.password_hash.is_none()
    }
}

pub trait CredentialStore: Send + Sync {
    /// Look up a principal by login identifier within one role
    fn find_by_credentials<'a>(
        &'a self,
        identifier: &'a str,
        role: Role,
    ) -> BoxFuture<'a, StoreResult<Option<Principal>>>;

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'_, StoreResult<Option<Principal>>>;

    fn create(&self, principal: NewPrincipal) -> BoxFuture<'_, StoreResult<Principal>>;

    fn update_credentials(
        &self,
        id: Uuid,
        update: CredentialUpdate,
    ) -> BoxFuture<'_, StoreResult<()>>;

    fn has_role(&self, role: Role) -> BoxFuture<'_, StoreResult<bool>>;
}

/// Login identifiers compare case-insensitively and ignore surrounding whitespace
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Administrator created during initialization when none exists yet
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Clone)]
pub enum StoreBackend {
    Postgres {
        url: String,
        max_connections: u32,
        acquire_timeout: Duration,
        run_migrations: bool,
    },
    Memory(Arc<MemoryCredentialStore>),
}

/// Opens the data store for the connection gate.
///
/// One call to `connect` is one full initialization attempt: pool creation,
/// migrations, then the administrator seed.
#[derive(Clone)]
pub struct StoreConnector {
    backend: StoreBackend,
    admin_seed: Option<AdminSeed>,
    passwords: PasswordService,
}

impl StoreConnector {
    pub fn new(
        backend: StoreBackend,
        admin_seed: Option<AdminSeed>,
        passwords: PasswordService,
    ) -> Self {
        Self {
            backend,
            admin_seed,
            passwords,
        }
    }

    pub fn from_config(config: &Config, passwords: PasswordService) -> Self {
        let backend = if config.database_url.starts_with("memory:") {
            tracing::warn!("Using in-process credential store; data is lost on restart");
            StoreBackend::Memory(Arc::new(MemoryCredentialStore::new()))
        } else {
            StoreBackend::Postgres {
                url: config.database_url.clone(),
                max_connections: config.db_max_connections,
                acquire_timeout: config.db_connect_timeout,
                run_migrations: config.run_migrations,
            }
        };

        Self::new(backend, config.admin_seed(), passwords)
    }

    async fn open(self) -> Result<Store, ConnectError> {
        let store: Store = match self.backend {
            StoreBackend::Postgres {
                url,
                max_connections,
                acquire_timeout,
                run_migrations,
            } => {
                let pool = db::create_pool(&url, max_connections, acquire_timeout)
                    .await
                    .map_err(|e| ConnectError::Failed(e.to_string()))?;
                if run_migrations {
                    db::run_migrations(&pool)
                        .await
                        .map_err(|e| ConnectError::Failed(e.to_string()))?;
                }
                Arc::new(PgCredentialStore::new(pool))
            }
            StoreBackend::Memory(store) => store,
        };

        if let Some(seed) = &self.admin_seed {
            seed_admin(store.as_ref(), &self.passwords, seed)
                .await
                .map_err(|e| ConnectError::Failed(format!("admin seed failed: {}", e)))?;
        }

        Ok(store)
    }
}

impl Connector<Store> for StoreConnector {
    fn connect(&self) -> ConnectFuture<Store> {
        Box::pin(self.clone().open())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Password(#[from] crate::auth::PasswordError),
}

/// Create the bootstrap administrator unless an administrator already exists
pub async fn seed_admin(
    store: &dyn CredentialStore,
    passwords: &PasswordService,
    seed: &AdminSeed,
) -> Result<bool, SeedError> {
    if store.has_role(Role::Admin).await? {
        tracing::debug!("Administrator already present, skipping seed");
        return Ok(false);
    }

    let password_hash = passwords.hash(&seed.password).await?;
    let admin = store
        .create(NewPrincipal {
            role: Role::Admin,
            identifier: normalize_identifier(&seed.email),
            display_name: "Administrator".to_string(),
            description: None,
            password_hash,
        })
        .await?;

    tracing::info!(principal_id = %admin.id, "Bootstrap administrator created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passwords() -> PasswordService {
        PasswordService::with_cost(8, 1, 1).unwrap()
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_identifier("Chess Club"), "chess club");
    }

    #[tokio::test]
    async fn test_seed_admin_runs_once() {
        let store = MemoryCredentialStore::new();
        let passwords = passwords();
        let seed = AdminSeed {
            email: "Root@Campus.edu".to_string(),
            password: "bootstrap-secret".to_string(),
        };

        assert!(seed_admin(&store, &passwords, &seed).await.unwrap());
        assert!(!seed_admin(&store, &passwords, &seed).await.unwrap());

        let admin = store
            .find_by_credentials("root@campus.edu", Role::Admin)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(passwords
            .verify("bootstrap-secret", Some(&admin.password_hash))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_memory_connector_opens_shared_store() {
        let memory = Arc::new(MemoryCredentialStore::new());
        let connector = StoreConnector::new(
            StoreBackend::Memory(memory.clone()),
            Some(AdminSeed {
                email: "admin@campus.edu".to_string(),
                password: "bootstrap-secret".to_string(),
            }),
            passwords(),
        );

        let store = connector.connect().await.unwrap();
        assert!(store.has_role(Role::Admin).await.unwrap());
        assert!(memory.has_role(Role::Admin).await.unwrap());
    }
}
