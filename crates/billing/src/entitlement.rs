//! Entitlement Module
//!
//! Answers "what plan and limits does this tenant have right now?" from the
//! most recent subscription. `compute_entitlement` is a pure function of the
//! subscription and the clock, so it can be tested without a store.

use lnk_shared::{Plan, ResourceLimits, Subscription, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Unified entitlement state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    /// No subscription, or the free plan
    Free,
    /// Trial period active (trial_ends_at > now)
    Trialing,
    /// Subscription active and in good standing
    Active,
    /// Cancellation scheduled, still inside the paid period
    CanceledGrace,
    /// Payment past due; access kept while payment is retried
    PastDue,
    /// Voluntarily paused
    Paused,
    /// Fully canceled; the tenant falls back to free limits
    Canceled,
}

impl std::fmt::Display for EntitlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitlementState::Free => write!(f, "free"),
            EntitlementState::Trialing => write!(f, "trialing"),
            EntitlementState::Active => write!(f, "active"),
            EntitlementState::CanceledGrace => write!(f, "canceled_grace"),
            EntitlementState::PastDue => write!(f, "past_due"),
            EntitlementState::Paused => write!(f, "paused"),
            EntitlementState::Canceled => write!(f, "canceled"),
        }
    }
}

/// Complete entitlement information for a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub state: EntitlementState,
    /// Plan whose limits apply
    pub plan: Plan,
    pub limits: ResourceLimits,
    pub computed_at: OffsetDateTime,
    /// When this entitlement lapses (trial end, scheduled cancellation)
    pub expires_at: Option<OffsetDateTime>,
    /// Whether API-key traffic is currently allowed
    pub api_allowed: bool,
    /// Human-readable reason if the API is blocked
    pub api_blocked_reason: Option<String>,
}

impl Entitlement {
    pub fn can_use_api(&self) -> bool {
        self.api_allowed
    }
}

/// Pure function: compute entitlement from the latest subscription
pub fn compute_entitlement(subscription: Option<&Subscription>, now: OffsetDateTime) -> Entitlement {
    let (state, plan, expires_at, api_allowed, api_blocked_reason) = determine_state(subscription, now);

    Entitlement {
        state,
        plan,
        limits: plan.limits(),
        computed_at: now,
        expires_at,
        api_allowed,
        api_blocked_reason,
    }
}

fn determine_state(
    subscription: Option<&Subscription>,
    now: OffsetDateTime,
) -> (
    EntitlementState,
    Plan,
    Option<OffsetDateTime>,
    bool,
    Option<String>,
) {
    let Some(sub) = subscription else {
        return (EntitlementState::Free, Plan::Free, None, true, None);
    };

    match sub.status {
        SubscriptionStatus::Canceled => (
            EntitlementState::Canceled,
            Plan::Free,
            None,
            true,
            None,
        ),
        SubscriptionStatus::Paused => (
            EntitlementState::Paused,
            sub.plan,
            None,
            false,
            Some("Subscription paused".to_string()),
        ),
        SubscriptionStatus::PastDue => (
            EntitlementState::PastDue,
            sub.plan,
            None,
            // Still allow API while payment is retried
            true,
            Some("Payment past due - please update payment method".to_string()),
        ),
        SubscriptionStatus::Trialing => match sub.trial_ends_at {
            Some(trial_end) if trial_end <= now => (
                // Trial lapsed without conversion
                EntitlementState::Free,
                Plan::Free,
                Some(trial_end),
                true,
                None,
            ),
            trial_end => (EntitlementState::Trialing, sub.plan, trial_end, true, None),
        },
        SubscriptionStatus::Active if sub.plan.is_free() => {
            (EntitlementState::Free, Plan::Free, None, true, None)
        }
        SubscriptionStatus::Active if sub.cancel_at_period_end => (
            EntitlementState::CanceledGrace,
            sub.plan,
            Some(sub.current_period_end),
            true,
            None,
        ),
        SubscriptionStatus::Active => (EntitlementState::Active, sub.plan, None, true, None),
    }
}
