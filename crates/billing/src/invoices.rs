//! Invoice issuance, payment state and refunds

use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, AuditEntryBuilder, AuditLogger, BillingStore, Invoice, InvoiceId, InvoiceStatus,
    LineItem, TenantId,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};

/// Attempts at drawing a fresh invoice number before giving up
const MAX_NUMBER_ATTEMPTS: usize = 5;

/// Parameters for a new invoice against the tenant's current subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceParams {
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub tax_cents: i64,
}

/// Refund request. `amount_cents` defaults to the invoice total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundParams {
    pub amount_cents: Option<i64>,
    pub reason: Option<String>,
}

/// Generate an invoice number: `INV-<unix seconds>-<6 hex chars>`
pub fn generate_invoice_number(now: OffsetDateTime) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("INV-{}-{:06X}", now.unix_timestamp(), suffix)
}

pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
    audit: AuditLogger,
    config: BillingConfig,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn BillingStore>, audit: AuditLogger, config: BillingConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    pub async fn create_invoice(
        &self,
        tenant_id: TenantId,
        params: CreateInvoiceParams,
        actor: Actor,
    ) -> BillingResult<Invoice> {
        let subtotal_cents = validate_line_items(&params.line_items)?;
        if params.tax_cents < 0 {
            return Err(BillingError::InvalidAmount("tax cannot be negative".into()));
        }
        let total_cents = subtotal_cents
            .checked_add(params.tax_cents)
            .ok_or_else(|| BillingError::InvalidAmount("invoice total overflows".into()))?;

        let subscription = self
            .store
            .latest_subscription(tenant_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(tenant_id.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let mut invoice = Invoice {
            id: InvoiceId::new(),
            tenant_id,
            subscription_id: subscription.id,
            number: generate_invoice_number(now),
            subtotal_cents,
            tax_cents: params.tax_cents,
            total_cents,
            currency: subscription.currency.clone(),
            status: InvoiceStatus::Pending,
            due_date: now + Duration::days(self.config.invoice_due_days),
            paid_at: None,
            line_items: params.line_items,
            refund_amount_cents: None,
            refund_reason: None,
            refunded_at: None,
            created_at: now,
        };

        // The unique index on `number` is the real guard; retry on collision.
        let mut attempt = 1;
        loop {
            match self.store.insert_invoice(&invoice).await {
                Ok(()) => break,
                Err(lnk_shared::StoreError::UniqueViolation(_)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    tracing::warn!(number = %invoice.number, attempt, "invoice number collision, retrying");
                    invoice.number = generate_invoice_number(now);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            invoice_id = %invoice.id,
            number = %invoice.number,
            total_cents = invoice.total_cents,
            "invoice created"
        );
        self.log(&invoice, action::INVOICE_CREATED, actor, serde_json::json!({
            "number": invoice.number,
            "total_cents": invoice.total_cents,
            "currency": invoice.currency,
        }))
        .await;

        Ok(invoice)
    }

    pub async fn get_invoice(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        self.store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id)))
    }

    pub async fn list_invoices(&self, tenant_id: TenantId) -> BillingResult<Vec<Invoice>> {
        Ok(self.store.list_invoices(tenant_id).await?)
    }

    pub async fn mark_paid(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        actor: Actor,
    ) -> BillingResult<Invoice> {
        let invoice = self.get_invoice(tenant_id, invoice_id).await?;
        match invoice.status {
            InvoiceStatus::Pending | InvoiceStatus::Failed => {}
            InvoiceStatus::Paid => return Err(BillingError::AlreadyInState("paid".into())),
            other => {
                return Err(BillingError::InvalidTransition(format!(
                    "cannot pay a {:?} invoice",
                    other
                )))
            }
        }

        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Paid;
        updated.paid_at = Some(OffsetDateTime::now_utc());
        self.store.update_invoice(&updated, invoice.status).await?;

        tracing::info!(tenant_id = %tenant_id, invoice_id = %invoice_id, "invoice paid");
        self.log(&updated, action::INVOICE_PAID, actor, serde_json::json!({
            "total_cents": updated.total_cents,
        }))
        .await;
        Ok(updated)
    }

    pub async fn mark_failed(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        actor: Actor,
    ) -> BillingResult<Invoice> {
        let invoice = self.get_invoice(tenant_id, invoice_id).await?;
        match invoice.status {
            InvoiceStatus::Pending => {}
            InvoiceStatus::Failed => return Err(BillingError::AlreadyInState("failed".into())),
            other => {
                return Err(BillingError::InvalidTransition(format!(
                    "cannot fail a {:?} invoice",
                    other
                )))
            }
        }

        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Failed;
        self.store.update_invoice(&updated, invoice.status).await?;

        tracing::warn!(tenant_id = %tenant_id, invoice_id = %invoice_id, "invoice payment failed");
        self.log(&updated, action::INVOICE_FAILED, actor, serde_json::json!({})).await;
        Ok(updated)
    }

    pub async fn void_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        actor: Actor,
    ) -> BillingResult<Invoice> {
        let invoice = self.get_invoice(tenant_id, invoice_id).await?;
        match invoice.status {
            InvoiceStatus::Pending | InvoiceStatus::Failed => {}
            InvoiceStatus::Void => return Err(BillingError::AlreadyInState("void".into())),
            other => {
                return Err(BillingError::InvalidTransition(format!(
                    "cannot void a {:?} invoice",
                    other
                )))
            }
        }

        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Void;
        self.store.update_invoice(&updated, invoice.status).await?;

        tracing::info!(tenant_id = %tenant_id, invoice_id = %invoice_id, "invoice voided");
        self.log(&updated, action::INVOICE_VOIDED, actor, serde_json::json!({})).await;
        Ok(updated)
    }

    /// One-way move to `refunded`. Defaults the amount to the invoice total.
    pub async fn refund_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        params: RefundParams,
        actor: Actor,
    ) -> BillingResult<Invoice> {
        let invoice = self.get_invoice(tenant_id, invoice_id).await?;
        match invoice.status {
            InvoiceStatus::Refunded => return Err(BillingError::AlreadyInState("refunded".into())),
            InvoiceStatus::Void => {
                return Err(BillingError::InvalidTransition(
                    "cannot refund a void invoice".into(),
                ))
            }
            _ => {}
        }

        let amount = params.amount_cents.unwrap_or(invoice.total_cents);
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(
                "refund amount must be positive".into(),
            ));
        }
        if amount > invoice.total_cents {
            return Err(BillingError::RefundAmountExceedsTotal {
                requested_cents: amount,
                available_cents: invoice.total_cents,
            });
        }

        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Refunded;
        updated.refund_amount_cents = Some(amount);
        updated.refund_reason = params.reason;
        updated.refunded_at = Some(OffsetDateTime::now_utc());
        self.store.update_invoice(&updated, invoice.status).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            invoice_id = %invoice_id,
            refund_cents = amount,
            "invoice refunded"
        );
        self.log(&updated, action::INVOICE_REFUNDED, actor, serde_json::json!({
            "refund_amount_cents": amount,
            "total_cents": updated.total_cents,
            "reason": updated.refund_reason,
        }))
        .await;
        Ok(updated)
    }

    async fn log(
        &self,
        invoice: &Invoice,
        audit_action: &'static str,
        actor: Actor,
        details: serde_json::Value,
    ) {
        self.audit
            .record(
                AuditEntryBuilder::new(invoice.tenant_id, audit_action)
                    .actor(actor)
                    .resource(resource::INVOICE, invoice.id)
                    .details(details),
            )
            .await;
    }
}

/// Sum the line items, rejecting empty invoices and negative or overflowing amounts.
fn validate_line_items(items: &[LineItem]) -> BillingResult<i64> {
    if items.is_empty() {
        return Err(BillingError::InvalidInput(
            "an invoice needs at least one line item".into(),
        ));
    }

    items.iter().try_fold(0i64, |acc, item| {
        if item.quantity <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "line item '{}' must have a positive quantity",
                item.description
            )));
        }
        if item.unit_amount_cents < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "line item '{}' has a negative amount",
                item.description
            )));
        }
        item.amount_cents()
            .and_then(|amount| acc.checked_add(amount))
            .ok_or_else(|| BillingError::InvalidAmount("invoice subtotal overflows".into()))
    })
}
