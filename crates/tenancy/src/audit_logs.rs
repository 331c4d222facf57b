//! Audit log queries

use lnk_shared::{Actor, AuditLogEntry, AuditLogger, Capability, LnkResult, TenantId};

use crate::permissions::PermissionEvaluator;

pub const DEFAULT_AUDIT_PAGE: i64 = 50;
pub const MAX_AUDIT_PAGE: i64 = 500;

#[derive(Clone)]
pub struct AuditLogReader {
    permissions: PermissionEvaluator,
    audit: AuditLogger,
}

impl AuditLogReader {
    pub fn new(permissions: PermissionEvaluator, audit: AuditLogger) -> Self {
        Self { permissions, audit }
    }

    /// Most recent entries first. `limit` is clamped to 1..=500.
    pub async fn list_audit_logs(
        &self,
        tenant_id: TenantId,
        actor: Actor,
        limit: Option<i64>,
    ) -> LnkResult<Vec<AuditLogEntry>> {
        self.permissions
            .require(tenant_id, actor, Capability::AuditRead)
            .await?;

        let limit = limit.unwrap_or(DEFAULT_AUDIT_PAGE).clamp(1, MAX_AUDIT_PAGE);
        Ok(self
            .audit
            .sink()
            .list_audit_entries(tenant_id, limit)
            .await?)
    }
}
