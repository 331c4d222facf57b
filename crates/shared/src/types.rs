//! Common types used across the lnk tenancy core

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::capability::PermissionSet;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_wrapper!(
    /// Tenant ID wrapper
    TenantId
);
id_wrapper!(
    /// User ID wrapper (issued by the identity collaborator)
    UserId
);
id_wrapper!(
    /// Membership ID wrapper
    MemberId
);
id_wrapper!(InvitationId);
id_wrapper!(ApiKeyId);
id_wrapper!(SubscriptionId);
id_wrapper!(InvoiceId);
id_wrapper!(PaymentMethodId);
id_wrapper!(AuditEntryId);

// =============================================================================
// Enums
// =============================================================================

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Pending,
    Trial,
}

impl Default for TenantStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Kind of account a tenant represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantType {
    Personal,
    Team,
    Organization,
    Enterprise,
    Reseller,
}

impl Default for TenantType {
    fn default() -> Self {
        Self::Team
    }
}

/// Member role within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl Default for MemberRole {
    fn default() -> Self {
        Self::Member
    }
}

impl MemberRole {
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(format!("Invalid member role: {}", s)),
        }
    }
}

/// Membership status. Members are never physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Removed,
}

impl Default for MemberStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// API key status. Revoked keys keep their history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

impl Default for ApiKeyStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// What an API key may do with the resources in its scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPermission {
    Read,
    Write,
    Delete,
    Admin,
}

/// Resource families an API key can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyScope {
    Links,
    Analytics,
    Campaigns,
    QrCodes,
    Webhooks,
    Domains,
}

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Free
    }
}

impl Plan {
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// Monthly list price in cents
    pub fn monthly_price_cents(&self) -> i64 {
        match self {
            Self::Free => 0,
            Self::Starter => 1_900,
            Self::Pro => 4_900,
            Self::Enterprise => 19_900,
        }
    }

    /// Yearly list price in cents (two months free)
    pub fn yearly_price_cents(&self) -> i64 {
        match self {
            Self::Free => 0,
            Self::Starter => 19_000,
            Self::Pro => 49_000,
            Self::Enterprise => 199_000,
        }
    }

    pub fn price_cents(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price_cents(),
            BillingCycle::Yearly => self.yearly_price_cents(),
        }
    }

    /// Resource limits enforced for tenants on this plan.
    /// Free (50 links) → Starter (1K) → Pro (10K) → Enterprise (unlimited)
    pub fn limits(&self) -> ResourceLimits {
        match self {
            Self::Free => ResourceLimits {
                max_links: Some(50),
                max_clicks_per_month: Some(1_000),
                max_users: Some(1),
                max_custom_domains: Some(0),
                max_api_keys: Some(1),
            },
            Self::Starter => ResourceLimits {
                max_links: Some(1_000),
                max_clicks_per_month: Some(25_000),
                max_users: Some(3),
                max_custom_domains: Some(1),
                max_api_keys: Some(5),
            },
            Self::Pro => ResourceLimits {
                max_links: Some(10_000),
                max_clicks_per_month: Some(250_000),
                max_users: Some(10),
                max_custom_domains: Some(5),
                max_api_keys: Some(20),
            },
            Self::Enterprise => ResourceLimits::unlimited(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
    Paused,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl SubscriptionStatus {
    /// Every state except `canceled` still occupies the tenant's single live slot.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Trialing => "trialing",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl Default for BillingCycle {
    fn default() -> Self {
        Self::Monthly
    }
}

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Void,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        Self::Pending
    }
}

// =============================================================================
// Tenant Attributes
// =============================================================================

/// Visual identity of a tenant's public surfaces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_css: Option<String>,
    /// Unstructured keys preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Branding {
    /// Shallow merge: fields present in `patch` replace the current ones.
    pub fn merge(&mut self, patch: Branding) {
        merge_opt(&mut self.logo_url, patch.logo_url);
        merge_opt(&mut self.favicon_url, patch.favicon_url);
        merge_opt(&mut self.primary_color, patch.primary_color);
        merge_opt(&mut self.secondary_color, patch.secondary_color);
        merge_opt(&mut self.custom_css, patch.custom_css);
        self.extra.extend(patch.extra);
    }
}

/// Domain configuration for short links
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_short_domain: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DomainConfig {
    pub fn merge(&mut self, patch: DomainConfig) {
        merge_opt(&mut self.custom_domain, patch.custom_domain);
        merge_opt(&mut self.domain_verified, patch.domain_verified);
        merge_opt(&mut self.default_short_domain, patch.default_short_domain);
        self.extra.extend(patch.extra);
    }
}

/// Regional and security settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_two_factor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_email_domains: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TenantSettings {
    pub fn merge(&mut self, patch: TenantSettings) {
        merge_opt(&mut self.timezone, patch.timezone);
        merge_opt(&mut self.locale, patch.locale);
        merge_opt(&mut self.require_two_factor, patch.require_two_factor);
        merge_opt(&mut self.session_timeout_minutes, patch.session_timeout_minutes);
        merge_opt(&mut self.allowed_email_domains, patch.allowed_email_domains);
        self.extra.extend(patch.extra);
    }
}

/// Feature toggles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantFeatures {
    /// Reseller sub-accounts may be created under this tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_accounts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_domains: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhooks: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_label: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_analytics: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TenantFeatures {
    pub fn merge(&mut self, patch: TenantFeatures) {
        merge_opt(&mut self.sub_accounts, patch.sub_accounts);
        merge_opt(&mut self.custom_domains, patch.custom_domains);
        merge_opt(&mut self.api_access, patch.api_access);
        merge_opt(&mut self.webhooks, patch.webhooks);
        merge_opt(&mut self.sso, patch.sso);
        merge_opt(&mut self.white_label, patch.white_label);
        merge_opt(&mut self.advanced_analytics, patch.advanced_analytics);
        self.extra.extend(patch.extra);
    }

    pub fn sub_accounts_enabled(&self) -> bool {
        self.sub_accounts.unwrap_or(false)
    }
}

/// Enforced resource limits. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_links: Option<u64>,
    pub max_clicks_per_month: Option<u64>,
    pub max_users: Option<u32>,
    pub max_custom_domains: Option<u32>,
    pub max_api_keys: Option<u32>,
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Billing snapshot kept on the tenant, written by the quota collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingSummary {
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<String>,
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Tenant model: an isolated account boundary
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub status: TenantStatus,
    pub tenant_type: TenantType,
    pub owner_id: UserId,
    pub parent_tenant_id: Option<TenantId>,
    #[sqlx(json)]
    pub branding: Branding,
    #[sqlx(json)]
    pub domain: DomainConfig,
    #[sqlx(json)]
    pub settings: TenantSettings,
    #[sqlx(json)]
    pub features: TenantFeatures,
    #[sqlx(json)]
    pub limits: ResourceLimits,
    #[sqlx(json)]
    pub billing: BillingSummary,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Binding of one user to one tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: MemberId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Known when the member joined through an invitation
    pub email: Option<String>,
    pub role: MemberRole,
    #[sqlx(json)]
    pub permissions: PermissionSet,
    pub status: MemberStatus,
    pub invited_by: Option<UserId>,
    pub invited_at: Option<OffsetDateTime>,
    pub joined_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

/// Pending offer to join a tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invitation {
    pub id: InvitationId,
    pub tenant_id: TenantId,
    pub email: String,
    pub role: MemberRole,
    #[sqlx(json)]
    pub permissions: PermissionSet,
    #[serde(skip_serializing)]
    pub token: String,
    pub invited_by: UserId,
    pub expires_at: OffsetDateTime,
    pub accepted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl Invitation {
    pub fn is_pending(&self) -> bool {
        self.accepted_at.is_none()
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// Tenant-scoped API credential. Only the hash of the secret is stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    #[sqlx(json)]
    pub permissions: Vec<ApiKeyPermission>,
    #[sqlx(json)]
    pub scopes: Vec<ApiKeyScope>,
    /// Requests per hour
    pub rate_limit: i32,
    pub ip_allowlist: Option<Vec<String>>,
    pub expires_at: Option<OffsetDateTime>,
    pub last_used_at: Option<OffsetDateTime>,
    pub status: ApiKeyStatus,
    pub created_by: UserId,
    pub created_at: OffsetDateTime,
}

impl ApiKey {
    pub fn is_active(&self) -> bool {
        self.status == ApiKeyStatus::Active
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Immutable record of an administrative action
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub tenant_id: TenantId,
    /// `None` for system actions
    pub actor_id: Option<UserId>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Subscription model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub canceled_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One line on an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_amount_cents: i64,
}

impl LineItem {
    /// `None` on overflow
    pub fn amount_cents(&self) -> Option<i64> {
        self.quantity.checked_mul(self.unit_amount_cents)
    }
}

/// Invoice model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub subscription_id: SubscriptionId,
    pub number: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
    #[sqlx(json)]
    pub line_items: Vec<LineItem>,
    pub refund_amount_cents: Option<i64>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Stored payment instrument reference; card details are display-only
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub tenant_id: TenantId,
    pub provider_ref: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
    pub is_default: bool,
    pub created_at: OffsetDateTime,
}
