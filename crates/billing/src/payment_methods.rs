//! Stored payment methods
//!
//! Card details are display metadata only; the provider reference is opaque.
//! At most one method per tenant is the default. Removing the default leaves
//! the tenant with no default; another method is never promoted implicitly.

use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, AuditEntryBuilder, AuditLogger, BillingStore, PaymentMethod, PaymentMethodId, TenantId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPaymentMethodParams {
    pub provider_ref: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub exp_month: Option<i32>,
    #[serde(default)]
    pub exp_year: Option<i32>,
    /// Make this the default, clearing any previous default in the same step
    #[serde(default)]
    pub make_default: bool,
}

pub struct PaymentMethodService {
    store: Arc<dyn BillingStore>,
    audit: AuditLogger,
}

impl PaymentMethodService {
    pub fn new(store: Arc<dyn BillingStore>, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    pub async fn add_payment_method(
        &self,
        tenant_id: TenantId,
        params: AddPaymentMethodParams,
        actor: Actor,
    ) -> BillingResult<PaymentMethod> {
        validate(&params)?;

        let method = PaymentMethod {
            id: PaymentMethodId::new(),
            tenant_id,
            provider_ref: params.provider_ref.trim().to_string(),
            brand: params.brand,
            last4: params.last4,
            exp_month: params.exp_month,
            exp_year: params.exp_year,
            is_default: params.make_default,
            created_at: OffsetDateTime::now_utc(),
        };
        self.store.insert_payment_method(&method).await?;

        tracing::info!(tenant_id = %tenant_id, payment_method_id = %method.id, is_default = method.is_default, "payment method added");
        self.log(&method, action::PAYMENT_METHOD_ADDED, actor).await;
        Ok(method)
    }

    pub async fn list_payment_methods(&self, tenant_id: TenantId) -> BillingResult<Vec<PaymentMethod>> {
        Ok(self.store.list_payment_methods(tenant_id).await?)
    }

    /// Make `method_id` the only default for the tenant.
    pub async fn set_default_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
        actor: Actor,
    ) -> BillingResult<PaymentMethod> {
        let method = self
            .store
            .set_default_payment_method(tenant_id, method_id)
            .await
            .map_err(|e| match BillingError::from(e) {
                BillingError::NotFound(_) => {
                    BillingError::NotFound(format!("payment method {}", method_id))
                }
                other => other,
            })?;

        tracing::info!(tenant_id = %tenant_id, payment_method_id = %method_id, "default payment method set");
        self.log(&method, action::PAYMENT_METHOD_DEFAULT_SET, actor).await;
        Ok(method)
    }

    pub async fn remove_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
        actor: Actor,
    ) -> BillingResult<()> {
        let removed = self
            .store
            .delete_payment_method(tenant_id, method_id)
            .await
            .map_err(|e| match BillingError::from(e) {
                BillingError::NotFound(_) => {
                    BillingError::NotFound(format!("payment method {}", method_id))
                }
                other => other,
            })?;

        if removed.is_default {
            tracing::warn!(tenant_id = %tenant_id, "default payment method removed; tenant has no default");
        }
        self.log(&removed, action::PAYMENT_METHOD_REMOVED, actor).await;
        Ok(())
    }

    async fn log(&self, method: &PaymentMethod, audit_action: &'static str, actor: Actor) {
        self.audit
            .record(
                AuditEntryBuilder::new(method.tenant_id, audit_action)
                    .actor(actor)
                    .resource(resource::PAYMENT_METHOD, method.id)
                    .details(serde_json::json!({
                        "brand": method.brand,
                        "last4": method.last4,
                        "is_default": method.is_default,
                    })),
            )
            .await;
    }
}

fn validate(params: &AddPaymentMethodParams) -> BillingResult<()> {
    if params.provider_ref.trim().is_empty() {
        return Err(BillingError::InvalidInput("provider_ref is required".into()));
    }
    if let Some(last4) = &params.last4 {
        if last4.len() != 4 || !last4.chars().all(|c| c.is_ascii_digit()) {
            return Err(BillingError::InvalidInput("last4 must be four digits".into()));
        }
    }
    if let Some(month) = params.exp_month {
        if !(1..=12).contains(&month) {
            return Err(BillingError::InvalidInput("exp_month must be 1-12".into()));
        }
    }
    Ok(())
}
