//! Append-only audit log. Failures are logged and never abort the primary
//! operation.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use qazna_core::error::AppError;
use qazna_core::ids;

use crate::context::RequestContext;
use crate::models::AuditEntry;

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Record an action, correlated to the request and actor. Also mirrored
    /// as a structured log line.
    pub async fn record(
        &self,
        ctx: &RequestContext,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        metadata: BTreeMap<String, String>,
    ) {
        let entry = AuditEntry {
            id: ids::new_id(),
            occurred_at: Utc::now(),
            actor_user_id: ctx.user_id().map(ToString::to_string),
            actor_org_id: ctx.org_id().map(ToString::to_string),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            metadata,
            trace_id: ctx.request_id.clone(),
        };

        tracing::info!(
            r#type = "audit",
            event = %entry.action,
            request_id = entry.trace_id.as_deref().unwrap_or(""),
            user_id = entry.actor_user_id.as_deref().unwrap_or(""),
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            "audit_event"
        );

        if let Err(err) = self.store.append(&entry).await {
            tracing::error!(event = %entry.action, error = %err, "audit_log_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryAuditStore;

    #[tokio::test]
    async fn append_records_actor_and_trace() {
        let store = Arc::new(MemoryAuditStore::new());
        let audit = AuditService::new(store.clone());

        let ctx = RequestContext {
            request_id: Some("req-1".into()),
            actor: Some(crate::context::Actor {
                user_id: "user-1".into(),
                org_id: Some("org-1".into()),
                roles: vec![],
                token_permissions: vec![],
            }),
        };
        audit
            .record(&ctx, "ledger.transfer.execute", "transaction", "tx-1", BTreeMap::new())
            .await;

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.action, "ledger.transfer.execute");
        assert_eq!(entry.actor_user_id.as_deref(), Some("user-1"));
        assert_eq!(entry.actor_org_id.as_deref(), Some("org-1"));
        assert_eq!(entry.trace_id.as_deref(), Some("req-1"));
    }

    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn append(&self, _entry: &AuditEntry) -> Result<(), AppError> {
            Err(AppError::Internal(anyhow::anyhow!("disk full")))
        }
    }

    #[tokio::test]
    async fn append_failure_is_swallowed() {
        let audit = AuditService::new(Arc::new(FailingStore));
        // Must not panic or propagate.
        audit
            .record(
                &RequestContext::default(),
                "rbac.role.create",
                "role",
                "r-1",
                BTreeMap::new(),
            )
            .await;
    }
}
