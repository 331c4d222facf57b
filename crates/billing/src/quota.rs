//! Quota collaborator
//!
//! The subscription engine tells the quota side which plan a tenant is
//! entitled to whenever the effective plan changes. Usage counting happens
//! elsewhere; this seam only carries the plan and its limits.

use std::sync::Arc;

use async_trait::async_trait;
use lnk_shared::{Plan, TenantId, TenantStore};

use crate::error::{BillingError, BillingResult};

#[async_trait]
pub trait QuotaPlanner: Send + Sync {
    /// Apply `plan` as the tenant's enforced plan. Not retried on failure.
    async fn update_plan(&self, tenant_id: TenantId, plan: Plan) -> BillingResult<()>;
}

/// Writes the plan and its limits onto the tenant record
pub struct TenantQuotaPlanner {
    tenants: Arc<dyn TenantStore>,
}

impl TenantQuotaPlanner {
    pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl QuotaPlanner for TenantQuotaPlanner {
    async fn update_plan(&self, tenant_id: TenantId, plan: Plan) -> BillingResult<()> {
        self.tenants
            .update_plan(tenant_id, plan, plan.limits())
            .await
            .map_err(|e| BillingError::Quota(e.to_string()))?;

        tracing::info!(tenant_id = %tenant_id, plan = %plan, "tenant plan limits updated");
        Ok(())
    }
}
