//! Hand-written in-memory store doubles. Used by tests and by DSN-less
//! deployments; each mirrors the conflict and cascade semantics of its
//! PostgreSQL counterpart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

use qazna_core::error::AppError;
use qazna_core::ids;

use crate::models::{
    AuditEntry, AuthCode, OAuthClient, Organization, Permission, RefreshTokenRecord, Role,
    SigningKey, User, UserRoleAssignment, UserStatus,
};
use crate::models::key::KeyStatus;
use crate::services::audit::AuditStore;
use crate::services::keys::KeyStore;
use crate::services::oauth::OAuthStore;
use crate::services::rbac::RbacStore;
use crate::services::tokens::RefreshTokenStore;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// RBAC

#[derive(Default)]
struct RbacState {
    organizations: HashMap<String, Organization>,
    users: HashMap<String, User>,
    roles: HashMap<String, Role>,
    permissions: Vec<Permission>,
    role_permissions: HashMap<String, Vec<String>>,
    assignments: Vec<UserRoleAssignment>,
}

#[derive(Default)]
pub struct MemoryRbacStore {
    state: Mutex<RbacState>,
}

impl MemoryRbacStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RbacStore for MemoryRbacStore {
    async fn create_organization(
        &self,
        name: &str,
        metadata: Map<String, Value>,
    ) -> Result<Organization, AppError> {
        let mut state = lock(&self.state);
        if state.organizations.values().any(|o| o.name == name) {
            return Err(AppError::conflict("organization already exists"));
        }
        let now = Utc::now();
        let org = Organization {
            id: ids::new_id(),
            name: name.to_string(),
            metadata,
            created_at: now,
            updated_at: now,
        };
        state.organizations.insert(org.id.clone(), org.clone());
        Ok(org)
    }

    async fn get_organization(&self, id: &str) -> Result<Organization, AppError> {
        lock(&self.state)
            .organizations
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("organization not found"))
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, AppError> {
        let state = lock(&self.state);
        let mut orgs: Vec<_> = state.organizations.values().cloned().collect();
        orgs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(orgs)
    }

    async fn update_organization(
        &self,
        id: &str,
        name: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Organization, AppError> {
        let mut state = lock(&self.state);
        if let Some(new_name) = &name {
            if state.organizations.values().any(|o| o.id != id && &o.name == new_name) {
                return Err(AppError::conflict("organization already exists"));
            }
        }
        let org = state
            .organizations
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("organization not found"))?;
        if let Some(name) = name {
            org.name = name;
        }
        if let Some(metadata) = metadata {
            org.metadata = metadata;
        }
        org.updated_at = Utc::now();
        Ok(org.clone())
    }

    async fn delete_organization(&self, id: &str) -> Result<(), AppError> {
        let mut state = lock(&self.state);
        if state.organizations.remove(id).is_none() {
            return Err(AppError::not_found("organization not found"));
        }
        let doomed_roles: Vec<String> = state
            .roles
            .values()
            .filter(|r| r.organization_id == id)
            .map(|r| r.id.clone())
            .collect();
        state.users.retain(|_, u| u.organization_id != id);
        state.roles.retain(|_, r| r.organization_id != id);
        for role_id in &doomed_roles {
            state.role_permissions.remove(role_id);
        }
        state.assignments.retain(|a| a.organization_id != id);
        Ok(())
    }

    async fn create_user(
        &self,
        organization_id: &str,
        email: &str,
        password_hash: &str,
        status: UserStatus,
    ) -> Result<User, AppError> {
        let mut state = lock(&self.state);
        if !state.organizations.contains_key(organization_id) {
            return Err(AppError::not_found("organization not found"));
        }
        if state.users.values().any(|u| u.email == email) {
            return Err(AppError::conflict("user already exists"));
        }
        let now = Utc::now();
        let user = User {
            id: ids::new_id(),
            organization_id: organization_id.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            status,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> Result<User, AppError> {
        lock(&self.state)
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("user not found"))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, AppError> {
        lock(&self.state)
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| AppError::not_found("user not found"))
    }

    async fn list_users(&self, organization_id: &str) -> Result<Vec<User>, AppError> {
        let state = lock(&self.state);
        let mut users: Vec<_> = state
            .users
            .values()
            .filter(|u| u.organization_id == organization_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn create_role(
        &self,
        organization_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<Role, AppError> {
        let mut state = lock(&self.state);
        if !state.organizations.contains_key(organization_id) {
            return Err(AppError::not_found("organization not found"));
        }
        if state
            .roles
            .values()
            .any(|r| r.organization_id == organization_id && r.name == name)
        {
            return Err(AppError::conflict("role already exists"));
        }
        let now = Utc::now();
        let role = Role {
            id: ids::new_id(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            description,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn find_role(&self, id: &str) -> Result<Role, AppError> {
        lock(&self.state)
            .roles
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("role not found"))
    }

    async fn list_roles(&self, organization_id: &str) -> Result<Vec<Role>, AppError> {
        let state = lock(&self.state);
        let mut roles: Vec<_> = state
            .roles
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(roles)
    }

    async fn ensure_permissions(&self, permissions: &[(String, String)]) -> Result<(), AppError> {
        let mut state = lock(&self.state);
        for (key, description) in permissions {
            if state.permissions.iter().any(|p| &p.key == key) {
                continue;
            }
            state.permissions.push(Permission {
                id: ids::new_id(),
                key: key.clone(),
                description: if description.is_empty() { None } else { Some(description.clone()) },
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, AppError> {
        let mut perms = lock(&self.state).permissions.clone();
        perms.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(perms)
    }

    async fn set_role_permissions(&self, role_id: &str, keys: &[String]) -> Result<(), AppError> {
        let mut state = lock(&self.state);
        if !state.roles.contains_key(role_id) {
            return Err(AppError::not_found("role not found"));
        }
        let mut permission_ids = Vec::with_capacity(keys.len());
        for key in keys {
            let perm = state
                .permissions
                .iter()
                .find(|p| &p.key == key)
                .ok_or_else(|| AppError::not_found(format!("permission {key} not found")))?;
            permission_ids.push(perm.id.clone());
        }
        state.role_permissions.insert(role_id.to_string(), permission_ids);
        Ok(())
    }

    async fn permissions_for_role(&self, role_id: &str) -> Result<Vec<Permission>, AppError> {
        let state = lock(&self.state);
        let ids = state.role_permissions.get(role_id).cloned().unwrap_or_default();
        Ok(state
            .permissions
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
    ) -> Result<UserRoleAssignment, AppError> {
        let mut state = lock(&self.state);
        let user = state
            .users
            .get(user_id)
            .ok_or_else(|| AppError::not_found("user not found"))?;
        let role = state
            .roles
            .get(role_id)
            .ok_or_else(|| AppError::not_found("role not found"))?;
        if user.organization_id != role.organization_id {
            return Err(AppError::bad_request("user and role belong to different organizations"));
        }
        if state
            .assignments
            .iter()
            .any(|a| a.user_id == user_id && a.role_id == role_id)
        {
            return Err(AppError::conflict("role already assigned"));
        }
        let assignment = UserRoleAssignment {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
            organization_id: user.organization_id.clone(),
            created_at: Utc::now(),
        };
        state.assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), AppError> {
        let mut state = lock(&self.state);
        let before = state.assignments.len();
        state
            .assignments
            .retain(|a| !(a.user_id == user_id && a.role_id == role_id));
        if state.assignments.len() == before {
            return Err(AppError::not_found("assignment not found"));
        }
        Ok(())
    }

    async fn assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>, AppError> {
        Ok(lock(&self.state)
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn user_permissions(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let state = lock(&self.state);
        let mut keys = Vec::new();
        for assignment in state.assignments.iter().filter(|a| a.user_id == user_id) {
            let ids = state.role_permissions.get(&assignment.role_id).cloned().unwrap_or_default();
            for perm in state.permissions.iter().filter(|p| ids.contains(&p.id)) {
                if !keys.contains(&perm.key) {
                    keys.push(perm.key.clone());
                }
            }
        }
        Ok(keys)
    }

    async fn user_role_names(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let state = lock(&self.state);
        let mut names = Vec::new();
        for assignment in state.assignments.iter().filter(|a| a.user_id == user_id) {
            if let Some(role) = state.roles.get(&assignment.role_id) {
                if !names.contains(&role.name) {
                    names.push(role.name.clone());
                }
            }
        }
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Signing keys

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<Vec<SigningKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test seam: move a key's expiry so rotation paths can be exercised
    /// without waiting out the TTL.
    pub async fn age_key(&self, kid: &str, expires_at: DateTime<Utc>) {
        let mut keys = lock(&self.keys);
        if let Some(key) = keys.iter_mut().find(|k| k.kid == kid) {
            key.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn find_active(&self) -> Result<Option<SigningKey>, AppError> {
        Ok(lock(&self.keys).iter().find(|k| k.status == KeyStatus::Active).cloned())
    }

    async fn find(&self, kid: &str) -> Result<Option<SigningKey>, AppError> {
        Ok(lock(&self.keys).iter().find(|k| k.kid == kid).cloned())
    }

    async fn rotate_in(&self, key: &SigningKey) -> Result<(), AppError> {
        let mut keys = lock(&self.keys);
        let now = Utc::now();
        for existing in keys.iter_mut() {
            if existing.status == KeyStatus::Active {
                existing.status = KeyStatus::Retired;
                existing.rotated_at = Some(now);
            }
        }
        keys.push(key.clone());
        Ok(())
    }

    async fn list_verifiable(&self, cutoff: DateTime<Utc>) -> Result<Vec<SigningKey>, AppError> {
        let mut keys: Vec<_> =
            lock(&self.keys).iter().filter(|k| k.expires_at > cutoff).cloned().collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens

#[derive(Default)]
pub struct MemoryRefreshTokenStore {
    tokens: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        lock(&self.tokens).insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(lock(&self.tokens).get(id).cloned())
    }

    async fn revoke(&self, id: &str) -> Result<bool, AppError> {
        match lock(&self.tokens).get_mut(id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<(), AppError> {
        for record in lock(&self.tokens).values_mut() {
            if record.user_id == user_id {
                record.revoked = true;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OAuth

#[derive(Default)]
struct OAuthState {
    clients: HashMap<String, OAuthClient>,
    codes: HashMap<String, AuthCode>,
}

#[derive(Default)]
pub struct MemoryOAuthStore {
    state: Mutex<OAuthState>,
}

impl MemoryOAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the development client used by smoke flows.
    pub fn with_demo_client() -> Self {
        let store = Self::default();
        lock(&store.state).clients.insert(
            "demo-client".to_string(),
            OAuthClient {
                id: "demo-client".to_string(),
                secret: "demo-secret".to_string(),
                redirect_uri: "http://localhost/callback".to_string(),
                name: "Demo Client".to_string(),
            },
        );
        store
    }

    pub fn register_client(&self, client: OAuthClient) {
        lock(&self.state).clients.insert(client.id.clone(), client);
    }
}

#[async_trait]
impl OAuthStore for MemoryOAuthStore {
    async fn find_client(&self, id: &str) -> Result<Option<OAuthClient>, AppError> {
        Ok(lock(&self.state).clients.get(id).cloned())
    }

    async fn insert_code(&self, code: &AuthCode) -> Result<(), AppError> {
        lock(&self.state).codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn find_code(&self, code: &str, client_id: &str) -> Result<Option<AuthCode>, AppError> {
        Ok(lock(&self.state)
            .codes
            .get(code)
            .filter(|c| c.client_id == client_id)
            .cloned())
    }

    async fn mark_consumed(
        &self,
        code: &str,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = lock(&self.state);
        match state.codes.get_mut(code) {
            Some(record) if record.client_id == client_id && record.consumed_at.is_none() => {
                record.consumed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit

#[derive(Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AppError> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}
