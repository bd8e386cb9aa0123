//! In-process credential store, used by tests and `DATABASE_URL=memory://`

use futures::future::BoxFuture;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    normalize_identifier, CredentialStore, CredentialUpdate, NewPrincipal, Principal, StoreError,
    StoreResult,
};
use crate::auth::Role;

#[derive(Default)]
pub struct MemoryCredentialStore {
    principals: RwLock<HashMap<Uuid, Principal>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }
}

fn identifier_taken(
    principals: &HashMap<Uuid, Principal>,
    role: Role,
    identifier: &str,
    except: Option<Uuid>,
) -> bool {
    principals
        .values()
        .any(|p| p.role == role && p.identifier == identifier && Some(p.id) != except)
}

impl CredentialStore for MemoryCredentialStore {
    fn find_by_credentials<'a>(
        &'a self,
        identifier: &'a str,
        role: Role,
    ) -> BoxFuture<'a, StoreResult<Option<Principal>>> {
        Box::pin(async move {
            let identifier = normalize_identifier(identifier);
            let principals = self.principals.read().await;
            Ok(principals
                .values()
                .find(|p| p.role == role && p.identifier == identifier)
                .cloned())
        })
    }

    fn find_by_id(&self, id: Uuid) -> BoxFuture<'_, StoreResult<Option<Principal>>> {
        Box::pin(async move { Ok(self.principals.read().await.get(&id).cloned()) })
    }

    fn create(&self, principal: NewPrincipal) -> BoxFuture<'_, StoreResult<Principal>> {
        Box::pin(async move {
            let identifier = normalize_identifier(&principal.identifier);
            let mut principals = self.principals.write().await;

            if identifier_taken(&principals, principal.role, &identifier, None) {
                return Err(StoreError::Conflict);
            }

            let created = Principal {
                id: Uuid::new_v4(),
                role: principal.role,
                identifier,
                display_name: principal.display_name,
                description: principal.description,
                password_hash: principal.password_hash,
                created_at: OffsetDateTime::now_utc(),
            };
            principals.insert(created.id, created.clone());
            Ok(created)
        })
    }

    fn update_credentials(
        &self,
        id: Uuid,
        update: CredentialUpdate,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut principals = self.principals.write().await;
            let role = principals.get(&id).ok_or(StoreError::NotFound)?.role;

            let identifier = update.identifier.as_deref().map(normalize_identifier);
            if let Some(identifier) = &identifier {
                if identifier_taken(&principals, role, identifier, Some(id)) {
                    return Err(StoreError::Conflict);
                }
            }

            let principal = principals.get_mut(&id).ok_or(StoreError::NotFound)?;
            if let Some(identifier) = identifier {
                principal.identifier = identifier;
            }
            if let Some(password_hash) = update.password_hash {
                principal.password_hash = password_hash;
            }
            Ok(())
        })
    }

    fn has_role(&self, role: Role) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            Ok(self
                .principals
                .read()
                .await
                .values()
                .any(|p| p.role == role))
        })
    }
}
