//! Audit logging
//!
//! Every mutating tenant and billing operation records an [`AuditLogEntry`]
//! after its state change lands. The write is awaited before the operation
//! returns, so entries appear in order, but a failed write never fails the
//! operation: [`AuditLogger::record`] reports it through `tracing` and moves on.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::capability::Actor;
use crate::store::AuditSink;
use crate::types::{AuditEntryId, AuditLogEntry, TenantId};

/// Action names written to `audit_logs.action`
pub mod action {
    // Tenant lifecycle
    pub const TENANT_CREATED: &str = "tenant.created";
    pub const TENANT_UPDATED: &str = "tenant.updated";
    pub const TENANT_DELETED: &str = "tenant.deleted";
    pub const TENANT_OWNERSHIP_TRANSFERRED: &str = "tenant.ownership_transferred";
    pub const BRANDING_UPDATED: &str = "tenant.branding_updated";
    pub const SETTINGS_UPDATED: &str = "tenant.settings_updated";
    pub const FEATURES_UPDATED: &str = "tenant.features_updated";
    pub const SUB_TENANT_CREATED: &str = "sub_tenant.created";

    // Members
    pub const MEMBER_ROLE_UPDATED: &str = "member.role_updated";
    pub const MEMBER_REMOVED: &str = "member.removed";
    pub const MEMBER_LEFT: &str = "member.left";

    // Invitations
    pub const INVITATION_CREATED: &str = "invitation.created";
    pub const INVITATION_ACCEPTED: &str = "invitation.accepted";
    pub const INVITATION_CANCELLED: &str = "invitation.cancelled";
    pub const INVITATION_RESENT: &str = "invitation.resent";

    // API keys
    pub const API_KEY_CREATED: &str = "api_key.created";
    pub const API_KEY_REVOKED: &str = "api_key.revoked";
    pub const API_KEY_ROTATED: &str = "api_key.rotated";

    // Subscriptions
    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    pub const SUBSCRIPTION_UPDATED: &str = "subscription.updated";
    pub const SUBSCRIPTION_CANCELED: &str = "subscription.canceled";
    pub const SUBSCRIPTION_CANCEL_SCHEDULED: &str = "subscription.cancel_scheduled";
    pub const SUBSCRIPTION_REACTIVATED: &str = "subscription.reactivated";
    pub const SUBSCRIPTION_TRIAL_EXTENDED: &str = "subscription.trial_extended";
    pub const SUBSCRIPTION_PAST_DUE: &str = "subscription.past_due";
    pub const SUBSCRIPTION_PAUSED: &str = "subscription.paused";
    pub const SUBSCRIPTION_RESUMED: &str = "subscription.resumed";

    // Invoices
    pub const INVOICE_CREATED: &str = "invoice.created";
    pub const INVOICE_PAID: &str = "invoice.paid";
    pub const INVOICE_FAILED: &str = "invoice.failed";
    pub const INVOICE_VOIDED: &str = "invoice.voided";
    pub const INVOICE_REFUNDED: &str = "invoice.refunded";

    // Payment methods
    pub const PAYMENT_METHOD_ADDED: &str = "payment_method.added";
    pub const PAYMENT_METHOD_DEFAULT_SET: &str = "payment_method.default_set";
    pub const PAYMENT_METHOD_REMOVED: &str = "payment_method.removed";
}

/// Resource type names written to `audit_logs.resource_type`
pub mod resource {
    pub const TENANT: &str = "tenant";
    pub const MEMBER: &str = "member";
    pub const INVITATION: &str = "invitation";
    pub const API_KEY: &str = "api_key";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const INVOICE: &str = "invoice";
    pub const PAYMENT_METHOD: &str = "payment_method";
}

/// Builder for audit entries
pub struct AuditEntryBuilder {
    tenant_id: TenantId,
    action: &'static str,
    actor: Actor,
    resource_type: Option<&'static str>,
    resource_id: Option<String>,
    details: Option<serde_json::Value>,
}

impl AuditEntryBuilder {
    pub fn new(tenant_id: TenantId, action: &'static str) -> Self {
        Self {
            tenant_id,
            action,
            actor: Actor::System,
            resource_type: None,
            resource_id: None,
            details: None,
        }
    }

    pub fn actor(mut self, actor: impl Into<Actor>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn resource(mut self, resource_type: &'static str, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type);
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn build(self) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditEntryId::new(),
            tenant_id: self.tenant_id,
            actor_id: self.actor.user_id(),
            action: self.action.to_string(),
            resource_type: self.resource_type.map(str::to_string),
            resource_id: self.resource_id,
            details: self.details,
            ip_address: None,
            user_agent: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Best-effort writer in front of an [`AuditSink`]
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append an entry. Failures are logged and swallowed.
    pub async fn record(&self, builder: AuditEntryBuilder) {
        let entry = builder.build();
        if let Err(e) = self.sink.append(&entry).await {
            tracing::error!(
                tenant_id = %entry.tenant_id,
                action = %entry.action,
                error = %e,
                "failed to write audit log entry"
            );
        }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }
}
