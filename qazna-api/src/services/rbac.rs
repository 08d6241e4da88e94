//! RBAC: organizations, users, roles, permissions, and their relations.
//! Validation happens here, before anything reaches a store.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use qazna_core::error::AppError;

use crate::models::{Organization, Permission, Role, User, UserRoleAssignment, UserStatus};
use crate::services::password::hash_password;

pub const PERM_LEDGER_ACCOUNT_CREATE: &str = "ledger.account.create";
pub const PERM_LEDGER_TRANSFER: &str = "ledger.transfer";
pub const PERM_PLATFORM_OBSERVE: &str = "platform.observe";
pub const PERM_MANAGE_ORGANIZATIONS: &str = "auth.manage_organizations";
pub const PERM_MANAGE_USERS: &str = "auth.manage_users";
pub const PERM_MANAGE_ROLES: &str = "auth.manage_roles";
pub const PERM_MANAGE_PERMISSIONS: &str = "auth.manage_permissions";

/// Permission catalog seeded at startup and assumed by the transport layer.
pub fn builtin_permissions() -> Vec<(&'static str, &'static str)> {
    vec![
        (PERM_LEDGER_ACCOUNT_CREATE, "Create ledger accounts"),
        (PERM_LEDGER_TRANSFER, "Transfer funds between accounts"),
        (PERM_PLATFORM_OBSERVE, "Read operational state"),
        (PERM_MANAGE_ORGANIZATIONS, "Manage organizations"),
        (PERM_MANAGE_USERS, "Manage users"),
        (PERM_MANAGE_ROLES, "Manage roles"),
        (PERM_MANAGE_PERMISSIONS, "Manage permissions"),
    ]
}

/// Persistence surface for the RBAC model. Implementations allocate IDs and
/// timestamps, map uniqueness violations to `Conflict`, and enforce the
/// same-organization rule for assignments transactionally.
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn create_organization(
        &self,
        name: &str,
        metadata: Map<String, Value>,
    ) -> Result<Organization, AppError>;
    async fn get_organization(&self, id: &str) -> Result<Organization, AppError>;
    async fn list_organizations(&self) -> Result<Vec<Organization>, AppError>;
    async fn update_organization(
        &self,
        id: &str,
        name: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Organization, AppError>;
    async fn delete_organization(&self, id: &str) -> Result<(), AppError>;

    async fn create_user(
        &self,
        organization_id: &str,
        email: &str,
        password_hash: &str,
        status: UserStatus,
    ) -> Result<User, AppError>;
    async fn find_user(&self, id: &str) -> Result<User, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<User, AppError>;
    async fn list_users(&self, organization_id: &str) -> Result<Vec<User>, AppError>;

    async fn create_role(
        &self,
        organization_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<Role, AppError>;
    async fn find_role(&self, id: &str) -> Result<Role, AppError>;
    async fn list_roles(&self, organization_id: &str) -> Result<Vec<Role>, AppError>;

    async fn ensure_permissions(&self, permissions: &[(String, String)]) -> Result<(), AppError>;
    async fn list_permissions(&self) -> Result<Vec<Permission>, AppError>;
    async fn set_role_permissions(&self, role_id: &str, keys: &[String]) -> Result<(), AppError>;
    async fn permissions_for_role(&self, role_id: &str) -> Result<Vec<Permission>, AppError>;

    async fn assign_role(&self, user_id: &str, role_id: &str)
        -> Result<UserRoleAssignment, AppError>;
    async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), AppError>;
    async fn assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>, AppError>;

    async fn user_permissions(&self, user_id: &str) -> Result<Vec<String>, AppError>;
    async fn user_role_names(&self, user_id: &str) -> Result<Vec<String>, AppError>;
}

pub struct RbacService {
    store: Arc<dyn RbacStore>,
}

impl RbacService {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RbacStore> {
        &self.store
    }

    /// Seed the built-in permission catalog.
    pub async fn ensure_builtins(&self) -> Result<(), AppError> {
        let seeded: Vec<(String, String)> = builtin_permissions()
            .into_iter()
            .map(|(key, description)| (key.to_string(), description.to_string()))
            .collect();
        self.store.ensure_permissions(&seeded).await
    }

    pub async fn create_organization(
        &self,
        name: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Organization, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("organization name is required"));
        }
        self.store.create_organization(name, metadata.unwrap_or_default()).await
    }

    pub async fn get_organization(&self, id: &str) -> Result<Organization, AppError> {
        self.store.get_organization(id.trim()).await
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>, AppError> {
        self.store.list_organizations().await
    }

    pub async fn update_organization(
        &self,
        id: &str,
        name: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Organization, AppError> {
        let name = match name {
            Some(raw) => {
                let trimmed = raw.trim().to_string();
                if trimmed.is_empty() {
                    return Err(AppError::bad_request("organization name is required"));
                }
                Some(trimmed)
            }
            None => None,
        };
        if name.is_none() && metadata.is_none() {
            return Err(AppError::bad_request("nothing to update"));
        }
        self.store.update_organization(id.trim(), name, metadata).await
    }

    pub async fn delete_organization(&self, id: &str) -> Result<(), AppError> {
        self.store.delete_organization(id.trim()).await
    }

    pub async fn create_user(
        &self,
        organization_id: &str,
        email: &str,
        password: &str,
        status: &str,
    ) -> Result<User, AppError> {
        let organization_id = organization_id.trim();
        if organization_id.is_empty() {
            return Err(AppError::bad_request("organization_id is required"));
        }
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::bad_request("valid email is required"));
        }
        let password = password.trim();
        if password.is_empty() {
            return Err(AppError::bad_request("password is required"));
        }
        let status = UserStatus::parse(status)
            .ok_or_else(|| AppError::bad_request(format!("unsupported status {status}")))?;

        let password_hash = hash_password(password)?;
        self.store.create_user(organization_id, &email, &password_hash, status).await
    }

    pub async fn list_users(&self, organization_id: &str) -> Result<Vec<User>, AppError> {
        self.store.list_users(organization_id.trim()).await
    }

    pub async fn create_role(
        &self,
        organization_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Role, AppError> {
        let organization_id = organization_id.trim();
        if organization_id.is_empty() {
            return Err(AppError::bad_request("organization_id is required"));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("role name is required"));
        }
        let description = description.trim();
        let description = if description.is_empty() { None } else { Some(description.to_string()) };
        self.store.create_role(organization_id, name, description).await
    }

    pub async fn list_roles(&self, organization_id: &str) -> Result<Vec<Role>, AppError> {
        self.store.list_roles(organization_id.trim()).await
    }

    pub async fn set_role_permissions(
        &self,
        role_id: &str,
        permissions: &[String],
    ) -> Result<(), AppError> {
        let role_id = role_id.trim();
        if role_id.is_empty() {
            return Err(AppError::bad_request("role_id is required"));
        }
        let keys = dedupe_keys(permissions);
        self.store.set_role_permissions(role_id, &keys).await
    }

    pub async fn assign_role_to_user(
        &self,
        user_id: &str,
        role_id: &str,
    ) -> Result<UserRoleAssignment, AppError> {
        let user_id = user_id.trim();
        let role_id = role_id.trim();
        if user_id.is_empty() || role_id.is_empty() {
            return Err(AppError::bad_request("user_id and role_id are required"));
        }
        self.store.assign_role(user_id, role_id).await
    }

    pub async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), AppError> {
        let user_id = user_id.trim();
        let role_id = role_id.trim();
        if user_id.is_empty() || role_id.is_empty() {
            return Err(AppError::bad_request("user_id and role_id are required"));
        }
        self.store.unassign_role(user_id, role_id).await
    }

    pub async fn list_assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>, AppError> {
        self.store.assignments(user_id.trim()).await
    }

    /// Resolve the caller's permission keys by joining assignments, role
    /// permissions, and the permission catalog.
    pub async fn user_permissions(&self, user_id: &str) -> Result<BTreeSet<String>, AppError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::bad_request("user_id is required"));
        }
        Ok(self.store.user_permissions(user_id).await?.into_iter().collect())
    }
}

fn dedupe_keys(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let value = value.trim();
        if value.is_empty() || !seen.insert(value.to_string()) {
            continue;
        }
        out.push(value.to_string());
    }
    out
}
