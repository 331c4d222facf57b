//! lnk Billing
//!
//! Subscription state machine, invoices, payment methods and the entitlement
//! view. Plan changes are pushed to a [`QuotaPlanner`] so the tenant's
//! enforced limits follow its subscription.
//!
//! Callers are expected to have authorised the actor (capability
//! `billing.manage`) before calling in; this crate only records who acted.

pub mod config;
pub mod entitlement;
pub mod error;
pub mod invoices;
pub mod payment_methods;
pub mod period;
pub mod quota;
pub mod subscriptions;

use std::sync::Arc;

use lnk_shared::{AuditLogger, BillingStore};

pub use config::BillingConfig;
pub use entitlement::{compute_entitlement, Entitlement, EntitlementState};
pub use error::{BillingError, BillingResult};
pub use invoices::{CreateInvoiceParams, InvoiceService, RefundParams};
pub use payment_methods::{AddPaymentMethodParams, PaymentMethodService};
pub use quota::{QuotaPlanner, TenantQuotaPlanner};
pub use subscriptions::{
    CreateSubscriptionParams, SubscriptionService, UpdateSubscriptionParams,
    MAX_TRIAL_EXTENSION_DAYS,
};

/// Main billing service that coordinates all billing operations
pub struct BillingService {
    pub subscriptions: SubscriptionService,
    pub invoices: InvoiceService,
    pub payment_methods: PaymentMethodService,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        quota: Arc<dyn QuotaPlanner>,
        audit: AuditLogger,
        config: BillingConfig,
    ) -> Self {
        Self {
            subscriptions: SubscriptionService::new(
                store.clone(),
                quota,
                audit.clone(),
                config.clone(),
            ),
            invoices: InvoiceService::new(store.clone(), audit.clone(), config),
            payment_methods: PaymentMethodService::new(store, audit),
        }
    }
}
