//! Subscription state machine
//!
//! States: `trialing`, `active`, `past_due`, `paused`, `canceled`. A tenant
//! has at most one subscription outside `canceled`; the store enforces it.
//! Every write is a compare-and-swap on the status and `updated_at` that were
//! read, so two concurrent changes cannot both apply.
//!
//! Effective plan changes (create, plan change, immediate cancel,
//! reactivation after cancel) are pushed to the [`QuotaPlanner`]
//! synchronously and its error is surfaced unchanged.

use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, AuditEntryBuilder, AuditLogger, BillingCycle, BillingStore, Plan, Subscription,
    SubscriptionId, SubscriptionStatus, TenantId,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::config::BillingConfig;
use crate::entitlement::{compute_entitlement, Entitlement};
use crate::error::{BillingError, BillingResult};
use crate::period::period_end;
use crate::quota::QuotaPlanner;

/// Longest single trial extension
pub const MAX_TRIAL_EXTENSION_DAYS: i64 = 365;

/// Parameters for a new subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionParams {
    pub plan: Plan,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub provider_customer_id: Option<String>,
    #[serde(default)]
    pub provider_subscription_id: Option<String>,
}

/// Plan and/or cycle change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSubscriptionParams {
    pub plan: Option<Plan>,
    pub billing_cycle: Option<BillingCycle>,
}

pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    quota: Arc<dyn QuotaPlanner>,
    audit: AuditLogger,
    config: BillingConfig,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        quota: Arc<dyn QuotaPlanner>,
        audit: AuditLogger,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            quota,
            audit,
            config,
        }
    }

    /// Most recent subscription of any status
    pub async fn current_subscription(
        &self,
        tenant_id: TenantId,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self.store.latest_subscription(tenant_id).await?)
    }

    pub async fn entitlement(&self, tenant_id: TenantId) -> BillingResult<Entitlement> {
        let subscription = self.store.latest_subscription(tenant_id).await?;
        Ok(compute_entitlement(
            subscription.as_ref(),
            OffsetDateTime::now_utc(),
        ))
    }

    /// Start a subscription. Paid plans begin `trialing`, free begins `active`.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        params: CreateSubscriptionParams,
        actor: Actor,
    ) -> BillingResult<Subscription> {
        if let Some(existing) = self.store.latest_subscription(tenant_id).await? {
            if existing.status.is_live() {
                return Err(BillingError::AlreadyExists(format!(
                    "tenant {} already has a {} subscription",
                    tenant_id, existing.status
                )));
            }
        }

        let now = OffsetDateTime::now_utc();
        let (status, trial_ends_at) = if params.plan.is_free() {
            (SubscriptionStatus::Active, None)
        } else {
            (
                SubscriptionStatus::Trialing,
                Some(now + Duration::days(self.config.trial_days)),
            )
        };

        let subscription = Subscription {
            id: SubscriptionId::new(),
            tenant_id,
            plan: params.plan,
            status,
            billing_cycle: params.billing_cycle,
            provider_customer_id: params.provider_customer_id,
            provider_subscription_id: params.provider_subscription_id,
            amount_cents: params.plan.price_cents(params.billing_cycle),
            currency: self.config.currency.clone(),
            current_period_start: now,
            current_period_end: period_end(now, params.billing_cycle),
            trial_ends_at,
            canceled_at: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        };

        self.store
            .insert_subscription(&subscription)
            .await
            .map_err(|e| match BillingError::from(e) {
                BillingError::AlreadyExists(_) => BillingError::AlreadyExists(format!(
                    "tenant {} already has a live subscription",
                    tenant_id
                )),
                other => other,
            })?;

        self.quota.update_plan(tenant_id, subscription.plan).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %subscription.id,
            plan = %subscription.plan,
            status = %subscription.status,
            "subscription created"
        );
        self.log(&subscription, action::SUBSCRIPTION_CREATED, actor, |s| {
            serde_json::json!({
                "plan": s.plan,
                "billing_cycle": s.billing_cycle,
                "status": s.status,
                "amount_cents": s.amount_cents,
                "trial_ends_at": s.trial_ends_at,
            })
        })
        .await;

        Ok(subscription)
    }

    /// Change plan and/or billing cycle of an active or trialing subscription.
    pub async fn update(
        &self,
        tenant_id: TenantId,
        params: UpdateSubscriptionParams,
        actor: Actor,
    ) -> BillingResult<Subscription> {
        let current = self.require_latest(tenant_id).await?;
        if !matches!(
            current.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            return Err(BillingError::InvalidTransition(format!(
                "cannot change a {} subscription",
                current.status
            )));
        }

        let previous_plan = current.plan;
        let mut updated = current.clone();
        updated.plan = params.plan.unwrap_or(current.plan);
        updated.billing_cycle = params.billing_cycle.unwrap_or(current.billing_cycle);
        updated.amount_cents = updated.plan.price_cents(updated.billing_cycle);
        updated.updated_at = OffsetDateTime::now_utc();
        if updated.plan.is_free() {
            // Nothing to trial on the free plan
            updated.status = SubscriptionStatus::Active;
            updated.trial_ends_at = None;
        }

        self.store
            .update_subscription(&updated, &current)
            .await?;

        if updated.plan != previous_plan {
            self.quota.update_plan(tenant_id, updated.plan).await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            from_plan = %previous_plan,
            to_plan = %updated.plan,
            "subscription updated"
        );
        self.log(&updated, action::SUBSCRIPTION_UPDATED, actor, |s| {
            serde_json::json!({
                "from_plan": previous_plan,
                "to_plan": s.plan,
                "billing_cycle": s.billing_cycle,
                "amount_cents": s.amount_cents,
            })
        })
        .await;

        Ok(updated)
    }

    /// Cancel now, or flag for cancellation at period end.
    ///
    /// Immediate cancellation downgrades the tenant to the free plan before
    /// returning. The period-end flag is advisory; acting on it belongs to a
    /// period-boundary job outside this crate.
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        immediately: bool,
        actor: Actor,
    ) -> BillingResult<Subscription> {
        let current = self.require_latest(tenant_id).await?;
        if current.status == SubscriptionStatus::Canceled {
            return Err(BillingError::AlreadyInState("canceled".into()));
        }

        let now = OffsetDateTime::now_utc();
        let mut updated = current.clone();
        updated.updated_at = now;

        if !immediately {
            updated.cancel_at_period_end = true;
            self.store
                .update_subscription(&updated, &current)
                .await?;

            tracing::info!(tenant_id = %tenant_id, period_end = %updated.current_period_end, "subscription cancellation scheduled");
            self.log(&updated, action::SUBSCRIPTION_CANCEL_SCHEDULED, actor, |s| {
                serde_json::json!({ "current_period_end": s.current_period_end })
            })
            .await;
            return Ok(updated);
        }

        updated.status = SubscriptionStatus::Canceled;
        updated.canceled_at = Some(now);
        updated.cancel_at_period_end = false;
        self.store
            .update_subscription(&updated, &current)
            .await?;

        self.quota.update_plan(tenant_id, Plan::Free).await?;

        tracing::info!(tenant_id = %tenant_id, plan = %updated.plan, "subscription canceled");
        self.log(&updated, action::SUBSCRIPTION_CANCELED, actor, |s| {
            serde_json::json!({
                "plan": s.plan,
                "previous_status": current.status,
                "immediately": true,
            })
        })
        .await;

        Ok(updated)
    }

    /// Clear a scheduled cancellation or bring a non-active subscription back
    /// to `active`.
    pub async fn reactivate(&self, tenant_id: TenantId, actor: Actor) -> BillingResult<Subscription> {
        let current = self.require_latest(tenant_id).await?;
        if current.status == SubscriptionStatus::Active && !current.cancel_at_period_end {
            return Err(BillingError::InvalidTransition(
                "subscription is already active".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let mut updated = current.clone();
        updated.status = SubscriptionStatus::Active;
        updated.cancel_at_period_end = false;
        updated.canceled_at = None;
        updated.updated_at = now;
        if current.status == SubscriptionStatus::Canceled {
            updated.current_period_start = now;
            updated.current_period_end = period_end(now, updated.billing_cycle);
            updated.trial_ends_at = None;
        }

        self.store
            .update_subscription(&updated, &current)
            .await
            .map_err(|e| match BillingError::from(e) {
                BillingError::AlreadyExists(_) => BillingError::AlreadyExists(format!(
                    "tenant {} already has another live subscription",
                    tenant_id
                )),
                other => other,
            })?;

        if current.status == SubscriptionStatus::Canceled {
            self.quota.update_plan(tenant_id, updated.plan).await?;
        }

        tracing::info!(tenant_id = %tenant_id, previous_status = %current.status, "subscription reactivated");
        self.log(&updated, action::SUBSCRIPTION_REACTIVATED, actor, |_| {
            serde_json::json!({
                "previous_status": current.status,
                "was_cancel_scheduled": current.cancel_at_period_end,
            })
        })
        .await;

        Ok(updated)
    }

    /// Push the trial end out by `days`, counted from the current trial end.
    pub async fn extend_trial(
        &self,
        tenant_id: TenantId,
        days: i64,
        actor: Actor,
    ) -> BillingResult<Subscription> {
        if !(1..=MAX_TRIAL_EXTENSION_DAYS).contains(&days) {
            return Err(BillingError::InvalidInput(format!(
                "trial extension must be between 1 and {MAX_TRIAL_EXTENSION_DAYS} days"
            )));
        }

        let current = self.require_latest(tenant_id).await?;
        if current.status != SubscriptionStatus::Trialing {
            return Err(BillingError::InvalidTransition(format!(
                "cannot extend the trial of a {} subscription",
                current.status
            )));
        }

        let now = OffsetDateTime::now_utc();
        let base = current.trial_ends_at.unwrap_or(now);
        let mut updated = current.clone();
        let trial_ends_at = base.checked_add(Duration::days(days)).ok_or_else(|| {
            BillingError::InvalidInput("trial extension is out of range".into())
        })?;
        updated.trial_ends_at = Some(trial_ends_at);
        updated.updated_at = now;

        self.store
            .update_subscription(&updated, &current)
            .await?;

        tracing::info!(tenant_id = %tenant_id, days, "trial extended");
        self.log(&updated, action::SUBSCRIPTION_TRIAL_EXTENDED, actor, |s| {
            serde_json::json!({
                "days": days,
                "previous_trial_ends_at": current.trial_ends_at,
                "trial_ends_at": s.trial_ends_at,
            })
        })
        .await;

        Ok(updated)
    }

    /// Payment failed on an active or trialing subscription.
    pub async fn mark_past_due(
        &self,
        tenant_id: TenantId,
        actor: Actor,
    ) -> BillingResult<Subscription> {
        self.transition(
            tenant_id,
            &[SubscriptionStatus::Active, SubscriptionStatus::Trialing],
            SubscriptionStatus::PastDue,
            action::SUBSCRIPTION_PAST_DUE,
            actor,
        )
        .await
    }

    pub async fn pause(&self, tenant_id: TenantId, actor: Actor) -> BillingResult<Subscription> {
        self.transition(
            tenant_id,
            &[SubscriptionStatus::Active, SubscriptionStatus::Trialing],
            SubscriptionStatus::Paused,
            action::SUBSCRIPTION_PAUSED,
            actor,
        )
        .await
    }

    pub async fn resume(&self, tenant_id: TenantId, actor: Actor) -> BillingResult<Subscription> {
        self.transition(
            tenant_id,
            &[SubscriptionStatus::Paused],
            SubscriptionStatus::Active,
            action::SUBSCRIPTION_RESUMED,
            actor,
        )
        .await
    }

    async fn transition(
        &self,
        tenant_id: TenantId,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
        audit_action: &'static str,
        actor: Actor,
    ) -> BillingResult<Subscription> {
        let current = self.require_latest(tenant_id).await?;
        if current.status == to {
            return Err(BillingError::AlreadyInState(to.to_string()));
        }
        if !from.contains(&current.status) {
            return Err(BillingError::InvalidTransition(format!(
                "cannot move a {} subscription to {}",
                current.status, to
            )));
        }

        let mut updated = current.clone();
        updated.status = to;
        updated.updated_at = OffsetDateTime::now_utc();
        self.store
            .update_subscription(&updated, &current)
            .await?;

        tracing::info!(tenant_id = %tenant_id, from = %current.status, to = %to, "subscription status changed");
        self.log(&updated, audit_action, actor, |_| {
            serde_json::json!({ "from": current.status, "to": to })
        })
        .await;

        Ok(updated)
    }

    async fn require_latest(&self, tenant_id: TenantId) -> BillingResult<Subscription> {
        self.store
            .latest_subscription(tenant_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(tenant_id.to_string()))
    }

    async fn log(
        &self,
        subscription: &Subscription,
        audit_action: &'static str,
        actor: Actor,
        details: impl FnOnce(&Subscription) -> serde_json::Value,
    ) {
        self.audit
            .record(
                AuditEntryBuilder::new(subscription.tenant_id, audit_action)
                    .actor(actor)
                    .resource(resource::SUBSCRIPTION, subscription.id)
                    .details(details(subscription)),
            )
            .await;
    }
}
