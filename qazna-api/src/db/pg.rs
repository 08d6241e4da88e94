//! PostgreSQL store implementations for the auth subsystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use qazna_core::error::AppError;
use qazna_core::ids;

use crate::db::map_db_error;
use crate::models::key::KeyStatus;
use crate::models::{
    AuditEntry, AuthCode, CodeChallengeMethod, OAuthClient, Organization, Permission,
    RefreshTokenRecord, Role, SigningKey, User, UserRoleAssignment, UserStatus,
};
use crate::services::audit::AuditStore;
use crate::services::keys::KeyStore;
use crate::services::oauth::OAuthStore;
use crate::services::rbac::RbacStore;
use crate::services::tokens::RefreshTokenStore;

fn metadata_from_row(row: &PgRow, column: &str) -> Result<Map<String, Value>, AppError> {
    let raw: Option<Value> = row
        .try_get(column)
        .map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
    Ok(match raw {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    })
}

fn organization_from_row(row: &PgRow) -> Result<Organization, AppError> {
    Ok(Organization {
        id: row.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        name: row.try_get("name").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        metadata: metadata_from_row(row, "metadata")?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, AppError> {
    let status: String =
        row.try_get("status").map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
    Ok(User {
        id: row.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        organization_id: row
            .try_get("organization_id")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        email: row.try_get("email").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        password_hash: row
            .try_get("password_hash")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        status: UserStatus::parse(&status)
            .ok_or_else(|| AppError::Database(anyhow::anyhow!("unknown user status {status}")))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, AppError> {
    Ok(Role {
        id: row.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        organization_id: row
            .try_get("organization_id")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        name: row.try_get("name").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        description: row
            .try_get("description")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, AppError> {
    Ok(Permission {
        id: row.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        key: row.try_get("key").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        description: row
            .try_get("description")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
    })
}

const ORG_COLUMNS: &str = "id, name, metadata, created_at, updated_at";
const USER_COLUMNS: &str =
    "id, organization_id, email, password_hash, status, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, organization_id, name, description, created_at, updated_at";

// ---------------------------------------------------------------------------
// RBAC

pub struct PgRbacStore {
    pool: PgPool,
}

impl PgRbacStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RbacStore for PgRbacStore {
    async fn create_organization(
        &self,
        name: &str,
        metadata: Map<String, Value>,
    ) -> Result<Organization, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO organizations (id, name, metadata)
             VALUES ($1, $2, $3)
             RETURNING {ORG_COLUMNS}"
        ))
        .bind(ids::new_id())
        .bind(name)
        .bind(Value::Object(metadata))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "organization"))?;
        organization_from_row(&row)
    }

    async fn get_organization(&self, id: &str) -> Result<Organization, AppError> {
        let row = sqlx::query(&format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "organization"))?
            .ok_or_else(|| AppError::not_found("organization not found"))?;
        organization_from_row(&row)
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "organization"))?;
        rows.iter().map(organization_from_row).collect()
    }

    async fn update_organization(
        &self,
        id: &str,
        name: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Organization, AppError> {
        let row = sqlx::query(&format!(
            "UPDATE organizations
             SET name = coalesce($2, name),
                 metadata = coalesce($3, metadata),
                 updated_at = now()
             WHERE id = $1
             RETURNING {ORG_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(metadata.map(Value::Object))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "organization"))?
        .ok_or_else(|| AppError::not_found("organization not found"))?;
        organization_from_row(&row)
    }

    async fn delete_organization(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "organization"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("organization not found"));
        }
        Ok(())
    }

    async fn create_user(
        &self,
        organization_id: &str,
        email: &str,
        password_hash: &str,
        status: UserStatus,
    ) -> Result<User, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (id, organization_id, email, password_hash, status)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(ids::new_id())
        .bind(organization_id)
        .bind(email)
        .bind(password_hash)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "user"))?;
        user_from_row(&row)
    }

    async fn find_user(&self, id: &str) -> Result<User, AppError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "user"))?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        user_from_row(&row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, AppError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "user"))?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        user_from_row(&row)
    }

    async fn list_users(&self, organization_id: &str) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE organization_id = $1 ORDER BY created_at ASC"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "user"))?;
        rows.iter().map(user_from_row).collect()
    }

    async fn create_role(
        &self,
        organization_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<Role, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO roles (id, organization_id, name, description)
             VALUES ($1, $2, $3, $4)
             RETURNING {ROLE_COLUMNS}"
        ))
        .bind(ids::new_id())
        .bind(organization_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "role"))?;
        role_from_row(&row)
    }

    async fn find_role(&self, id: &str) -> Result<Role, AppError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "role"))?
            .ok_or_else(|| AppError::not_found("role not found"))?;
        role_from_row(&row)
    }

    async fn list_roles(&self, organization_id: &str) -> Result<Vec<Role>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles
             WHERE organization_id = $1 ORDER BY created_at ASC"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "role"))?;
        rows.iter().map(role_from_row).collect()
    }

    async fn ensure_permissions(&self, permissions: &[(String, String)]) -> Result<(), AppError> {
        for (key, description) in permissions {
            sqlx::query(
                "INSERT INTO permissions (id, key, description)
                 VALUES ($1, $2, $3) ON CONFLICT (key) DO NOTHING",
            )
            .bind(ids::new_id())
            .bind(key)
            .bind(description)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "permission"))?;
        }
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, AppError> {
        let rows = sqlx::query(
            "SELECT id, key, description, created_at FROM permissions ORDER BY key ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "permission"))?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn set_role_permissions(&self, role_id: &str, keys: &[String]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_db_error(e, "role"))?;

        let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "role"))?;
        if exists.is_none() {
            return Err(AppError::not_found("role not found"));
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "role permission"))?;

        for key in keys {
            let perm = sqlx::query("SELECT id FROM permissions WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_db_error(e, "permission"))?
                .ok_or_else(|| AppError::not_found(format!("permission {key} not found")))?;
            let perm_id: String =
                perm.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)",
            )
            .bind(role_id)
            .bind(perm_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "role permission"))?;
        }

        tx.commit().await.map_err(|e| map_db_error(e, "role permission"))?;
        Ok(())
    }

    async fn permissions_for_role(&self, role_id: &str) -> Result<Vec<Permission>, AppError> {
        let rows = sqlx::query(
            "SELECT p.id, p.key, p.description, p.created_at
             FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = $1",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "permission"))?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
    ) -> Result<UserRoleAssignment, AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_db_error(e, "assignment"))?;

        let user_org: String = sqlx::query("SELECT organization_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "user"))?
            .ok_or_else(|| AppError::not_found("user not found"))?
            .try_get("organization_id")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
        let role_org: String = sqlx::query("SELECT organization_id FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "role"))?
            .ok_or_else(|| AppError::not_found("role not found"))?
            .try_get("organization_id")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
        if user_org != role_org {
            return Err(AppError::bad_request("user and role belong to different organizations"));
        }

        let row = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id, organization_id)
             VALUES ($1, $2, $3)
             RETURNING user_id, role_id, organization_id, created_at",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(&user_org)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "assignment"))?;

        let assignment = UserRoleAssignment {
            user_id: row.try_get("user_id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
            role_id: row.try_get("role_id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
            organization_id: row
                .try_get("organization_id")
                .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        };

        tx.commit().await.map_err(|e| map_db_error(e, "assignment"))?;
        Ok(assignment)
    }

    async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "assignment"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("assignment not found"));
        }
        Ok(())
    }

    async fn assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id, role_id, organization_id, created_at
             FROM user_roles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "assignment"))?;

        rows.iter()
            .map(|row| {
                Ok(UserRoleAssignment {
                    user_id: row
                        .try_get("user_id")
                        .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                    role_id: row
                        .try_get("role_id")
                        .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                    organization_id: row
                        .try_get("organization_id")
                        .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                })
            })
            .collect()
    }

    async fn user_permissions(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT DISTINCT p.key
             FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             JOIN user_roles ur ON ur.role_id = rp.role_id
             WHERE ur.user_id = $1
             ORDER BY p.key",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "permission"))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("key")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))
            })
            .collect()
    }

    async fn user_role_names(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT DISTINCT r.name
             FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = $1
             ORDER BY r.name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "role"))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Signing keys

pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const KEY_COLUMNS: &str =
    "kid, public_pem, private_pem, created_at, expires_at, rotated_at, status";

fn signing_key_from_row(row: &PgRow) -> Result<SigningKey, AppError> {
    let status: String =
        row.try_get("status").map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
    Ok(SigningKey {
        kid: row.try_get("kid").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        public_pem: row
            .try_get("public_pem")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        private_pem: row
            .try_get("private_pem")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        rotated_at: row
            .try_get("rotated_at")
            .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
        status: KeyStatus::parse(&status)
            .ok_or_else(|| AppError::Database(anyhow::anyhow!("unknown key status {status}")))?,
    })
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn find_active(&self) -> Result<Option<SigningKey>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM auth_keys
             WHERE status = 'active' ORDER BY created_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "signing key"))?;
        row.as_ref().map(signing_key_from_row).transpose()
    }

    async fn find(&self, kid: &str) -> Result<Option<SigningKey>, AppError> {
        let row = sqlx::query(&format!("SELECT {KEY_COLUMNS} FROM auth_keys WHERE kid = $1"))
            .bind(kid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "signing key"))?;
        row.as_ref().map(signing_key_from_row).transpose()
    }

    async fn rotate_in(&self, key: &SigningKey) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_db_error(e, "signing key"))?;

        sqlx::query(
            "UPDATE auth_keys SET status = 'retired', rotated_at = now()
             WHERE status = 'active'",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "signing key"))?;

        sqlx::query(
            "INSERT INTO auth_keys
                 (kid, public_pem, private_pem, created_at, expires_at, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&key.kid)
        .bind(&key.public_pem)
        .bind(&key.private_pem)
        .bind(key.created_at)
        .bind(key.expires_at)
        .bind(key.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "signing key"))?;

        tx.commit().await.map_err(|e| map_db_error(e, "signing key"))?;
        Ok(())
    }

    async fn list_verifiable(&self, cutoff: DateTime<Utc>) -> Result<Vec<SigningKey>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM auth_keys
             WHERE expires_at > $1 ORDER BY created_at DESC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "signing key"))?;
        rows.iter().map(signing_key_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at, revoked)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.revoked)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "refresh token"))?;
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        let row = sqlx::query(
            "SELECT id, user_id, token_hash, expires_at, created_at, revoked
             FROM refresh_tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "refresh token"))?;

        row.map(|row| {
            Ok(RefreshTokenRecord {
                id: row.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                user_id: row
                    .try_get("user_id")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                token_hash: row
                    .try_get("token_hash")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                expires_at: row
                    .try_get("expires_at")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                created_at: row
                    .try_get("created_at")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                revoked: row
                    .try_get("revoked")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
            })
        })
        .transpose()
    }

    async fn revoke(&self, id: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE id = $1 AND NOT revoked")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| map_db_error(e, "refresh token"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "refresh token"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OAuth

pub struct PgOAuthStore {
    pool: PgPool,
}

impl PgOAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OAuthStore for PgOAuthStore {
    async fn find_client(&self, id: &str) -> Result<Option<OAuthClient>, AppError> {
        let row = sqlx::query("SELECT id, secret, redirect_uri, name FROM oauth_clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "oauth client"))?;

        row.map(|row| {
            Ok(OAuthClient {
                id: row.try_get("id").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                secret: row
                    .try_get("secret")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                redirect_uri: row
                    .try_get("redirect_uri")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                name: row.try_get("name").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
            })
        })
        .transpose()
    }

    async fn insert_code(&self, code: &AuthCode) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO oauth_auth_codes
                 (code, client_id, code_challenge, code_challenge_method, redirect_uri,
                  user_id, roles, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.as_str())
        .bind(&code.redirect_uri)
        .bind(&code.user_id)
        .bind(serde_json::to_value(&code.roles).unwrap_or(Value::Array(vec![])))
        .bind(code.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "auth code"))?;
        Ok(())
    }

    async fn find_code(&self, code: &str, client_id: &str) -> Result<Option<AuthCode>, AppError> {
        let row = sqlx::query(
            "SELECT code, client_id, code_challenge, code_challenge_method, redirect_uri,
                    user_id, roles, expires_at, consumed_at
             FROM oauth_auth_codes WHERE code = $1 AND client_id = $2",
        )
        .bind(code)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "auth code"))?;

        row.map(|row| {
            let method: String = row
                .try_get("code_challenge_method")
                .map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
            let roles: Value =
                row.try_get("roles").map_err(|e| AppError::Database(anyhow::Error::new(e)))?;
            Ok(AuthCode {
                code: row.try_get("code").map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                client_id: row
                    .try_get("client_id")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                code_challenge: row
                    .try_get("code_challenge")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                code_challenge_method: CodeChallengeMethod::parse(&method).ok_or_else(|| {
                    AppError::Database(anyhow::anyhow!("unknown challenge method {method}"))
                })?,
                redirect_uri: row
                    .try_get("redirect_uri")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                user_id: row
                    .try_get("user_id")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                roles: serde_json::from_value(roles).unwrap_or_default(),
                expires_at: row
                    .try_get("expires_at")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
                consumed_at: row
                    .try_get("consumed_at")
                    .map_err(|e| AppError::Database(anyhow::Error::new(e)))?,
            })
        })
        .transpose()
    }

    async fn mark_consumed(
        &self,
        code: &str,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE oauth_auth_codes SET consumed_at = $3
             WHERE code = $1 AND client_id = $2 AND consumed_at IS NULL",
        )
        .bind(code)
        .bind(client_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "auth code"))?;
        Ok(result.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// Audit

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_log
                 (id, occurred_at, actor_user_id, actor_org_id, action,
                  resource_type, resource_id, metadata, trace_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&entry.id)
        .bind(entry.occurred_at)
        .bind(&entry.actor_user_id)
        .bind(&entry.actor_org_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(serde_json::to_value(&entry.metadata).unwrap_or(Value::Object(Map::new())))
        .bind(&entry.trace_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "audit entry"))?;
        Ok(())
    }
}
