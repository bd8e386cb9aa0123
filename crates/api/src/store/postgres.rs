//! PostgreSQL-backed credential store

use futures::future::BoxFuture;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    normalize_identifier, CredentialStore, CredentialUpdate, NewPrincipal, Principal, StoreError,
    StoreResult,
};
use crate::auth::Role;

const PRINCIPAL_COLUMNS: &str =
    "id, role, identifier, display_name, description, password_hash, created_at";

/// Database row type for principal lookup
#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: Uuid,
    role: String,
    identifier: String,
    display_name: String,
    description: Option<String>,
    password_hash: String,
    created_at: OffsetDateTime,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: crate::auth::UnknownRole| StoreError::Corrupt(e.to_string()))?;

        Ok(Principal {
            id: row.id,
            role,
            identifier: row.identifier,
            display_name: row.display_name,
            description: row.description,
            password_hash: row.password_hash,
            created_at: row.created_at,
        })
    }
}

/// Unique violations on (role, identifier) surface as `Conflict`
fn map_write_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CredentialStore for PgCredentialStore {
    fn find_by_credentials<'a>(
        &'a self,
        identifier: &'a str,
        role: Role,
    ) -> BoxFuture<'a, StoreResult<Option<Principal>>> {
        Box::pin(async move {
            let row: Option<PrincipalRow> = sqlx::query_as(&format!(
                "SELECT {} FROM principals WHERE role = $1 AND identifier = $2",
                PRINCIPAL_COLUMNS
            ))
            .bind(role.as_str())
            .bind(normalize_identifier(identifier))
            .fetch_optional(&self.pool)
            .await?;

            row.map(Principal::try_from).transpose()
        })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'_, StoreResult<Option<Principal>>> {
        Box::pin(async move {
            let row: Option<PrincipalRow> = sqlx::query_as(&format!(
                "SELECT {} FROM principals WHERE id = $1",
                PRINCIPAL_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            row.map(Principal::try_from).transpose()
        })
    }

    fn create(&self, principal: NewPrincipal) -> BoxFuture<'_, StoreResult<Principal>> {
        Box::pin(async move {
            let row: PrincipalRow = sqlx::query_as(&format!(
                r#"
                INSERT INTO principals (
                    id, role, identifier, display_name, description, password_hash
                ) VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {}
                "#,
                PRINCIPAL_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(principal.role.as_str())
            .bind(normalize_identifier(&principal.identifier))
            .bind(&principal.display_name)
            .bind(&principal.description)
            .bind(&principal.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)?;

            Principal::try_from(row)
        })
    }

    fn update_credentials(
        &self,
        id: Uuid,
        update: CredentialUpdate,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let rows_affected = sqlx::query(
                r#"
                UPDATE principals
                SET identifier = COALESCE($2, identifier),
                    password_hash = COALESCE($3, password_hash),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(update.identifier.as_deref().map(normalize_identifier))
            .bind(update.password_hash)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?
            .rows_affected();

            if rows_affected == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn has_role(&self, role: Role) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM principals WHERE role = $1)")
                    .bind(role.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        })
    }
}
