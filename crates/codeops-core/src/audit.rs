//! Audit pipeline
//!
//! Every mutating operation reports here. The write is handed to a
//! detached task so it commits independently of the caller; an audit
//! failure is logged and absorbed, never propagated. Consumers must not
//! assume an audit record lands before the primary record it describes.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::error::Result;
use crate::store::{AuditFilter, AuditRepository, NewAuditRecord, Page};
use crate::types::AuditRecord;

/// Operation name constants used across the engines.
pub mod ops {
    pub const READ: &str = "READ";
    pub const WRITE: &str = "WRITE";
    pub const DELETE: &str = "DELETE";
    pub const DESTROY: &str = "DESTROY";
    pub const ROTATE: &str = "ROTATE";
    pub const SEAL: &str = "SEAL";
    pub const UNSEAL: &str = "UNSEAL";
    pub const POLICY_CREATE: &str = "POLICY_CREATE";
    pub const POLICY_UPDATE: &str = "POLICY_UPDATE";
    pub const POLICY_DELETE: &str = "POLICY_DELETE";
    pub const BIND: &str = "BIND";
    pub const UNBIND: &str = "UNBIND";
    pub const LEASE_CREATE: &str = "LEASE_CREATE";
    pub const LEASE_REVOKE: &str = "LEASE_REVOKE";
    pub const LEASE_EXPIRE: &str = "LEASE_EXPIRE";
    pub const TRANSIT_CREATE: &str = "TRANSIT_CREATE";
    pub const TRANSIT_ROTATE: &str = "TRANSIT_ROTATE";
    pub const TRANSIT_ENCRYPT: &str = "TRANSIT_ENCRYPT";
    pub const TRANSIT_DECRYPT: &str = "TRANSIT_DECRYPT";
}

#[derive(Clone)]
pub struct AuditSink {
    repo: Arc<dyn AuditRepository>,
}

impl AuditSink {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    pub fn log_success(
        &self,
        ctx: &OperationContext,
        operation: &str,
        path: Option<&str>,
        resource_type: &str,
        resource_id: Option<String>,
        details: Option<Value>,
    ) {
        self.submit(ctx, operation, path, resource_type, resource_id, true, None, details);
    }

    pub fn log_failure(
        &self,
        ctx: &OperationContext,
        operation: &str,
        path: Option<&str>,
        resource_type: &str,
        resource_id: Option<String>,
        error: &str,
    ) {
        self.submit(
            ctx,
            operation,
            path,
            resource_type,
            resource_id,
            false,
            Some(error.to_string()),
            None,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn submit(
        &self,
        ctx: &OperationContext,
        operation: &str,
        path: Option<&str>,
        resource_type: &str,
        resource_id: Option<String>,
        success: bool,
        error: Option<String>,
        details: Option<Value>,
    ) {
        let record = NewAuditRecord {
            team_id: ctx.team_id,
            user_id: ctx.actor.clone(),
            operation: operation.to_string(),
            path: path.map(str::to_string),
            resource_type: Some(resource_type.to_string()),
            resource_id,
            success,
            error,
            client_ip: ctx.client_ip.clone(),
            correlation_id: ctx.correlation_id.clone(),
            details,
        };

        let repo = Arc::clone(&self.repo);
        let operation = operation.to_string();
        // Detached task: the write commits on its own, and its outcome is
        // invisible to the caller.
        tokio::spawn(async move {
            if let Err(err) = repo.append(record).await {
                warn!(%operation, error = %err, "audit write failed");
            }
        });
    }

    pub async fn query(
        &self,
        team_id: Uuid,
        params: AuditQueryParams,
        page: Page,
    ) -> Result<Vec<AuditRecord>> {
        self.repo.query(team_id, &params.into_filter(), page).await
    }
}

/// Raw query parameters from a caller. Only the highest-priority non-empty
/// filter applies: resource > user > operation > path > time range >
/// failures-only > all.
#[derive(Debug, Clone, Default)]
pub struct AuditQueryParams {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    pub operation: Option<String>,
    pub path: Option<String>,
    pub start: Option<chrono::DateTime<chrono::Utc>>,
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    pub failures_only: bool,
}

impl AuditQueryParams {
    pub fn into_filter(self) -> AuditFilter {
        if let (Some(resource_type), Some(resource_id)) = (self.resource_type, self.resource_id) {
            return AuditFilter::Resource {
                resource_type,
                resource_id,
            };
        }
        if let Some(user) = self.user_id {
            return AuditFilter::User(user);
        }
        if let Some(operation) = self.operation {
            return AuditFilter::Operation(operation);
        }
        if let Some(path) = self.path {
            return AuditFilter::Path(path);
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            return AuditFilter::TimeRange { start, end };
        }
        if self.failures_only {
            return AuditFilter::FailuresOnly;
        }
        AuditFilter::All
    }
}
