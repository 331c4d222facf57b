//! Persistence collaborator
//!
//! Each trait method is one atomic logical operation. Uniqueness and
//! ownership invariants are enforced here, inside the store, so that two
//! concurrent requests cannot both pass a read-then-write check in the
//! managers. Managers still do the read first as a fast path for a clearer
//! error message, but a constraint hit always surfaces as
//! [`StoreError::UniqueViolation`] or [`StoreError::Precondition`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::capability::PermissionSet;
use crate::types::{
    ApiKey, ApiKeyId, AuditLogEntry, Invitation, InvitationId, Invoice, InvoiceId, InvoiceStatus,
    MemberId, MemberRole, Membership, PaymentMethod, PaymentMethodId, Plan, ResourceLimits,
    Subscription, Tenant, TenantId, UserId,
};

/// Postgres SQLSTATE for `unique_violation`
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Carries the constraint or field name.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A guarded mutation found the row in a state that forbids it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
                    let constraint = db_err.constraint().unwrap_or("unique").to_string();
                    StoreError::UniqueViolation(constraint)
                } else {
                    StoreError::Backend(db_err.to_string())
                }
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Tenants
// =============================================================================

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Insert a tenant together with its owner membership.
    /// Fails with `UniqueViolation("tenants_slug_key")` when the slug is taken.
    async fn insert_tenant(&self, tenant: &Tenant, owner: &Membership) -> StoreResult<()>;

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>>;

    async fn get_tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>>;

    /// Write the profile columns of a tenant (name, slug, status, type and the
    /// JSON attributes). Owner, plan and limits are owned by other operations
    /// and left untouched.
    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant>;

    /// Remove a tenant with its memberships, invitations, API keys, billing rows.
    async fn delete_tenant(&self, id: TenantId) -> StoreResult<()>;

    /// Tenants where `user_id` holds an active membership.
    async fn list_tenants_for_user(&self, user_id: UserId) -> StoreResult<Vec<Tenant>>;

    async fn list_sub_tenants(&self, parent_id: TenantId) -> StoreResult<Vec<Tenant>>;

    /// Move ownership from `from` to `to` in one step: `owner_id` changes, the
    /// target becomes `owner` with every capability and the previous owner
    /// becomes `admin`. Fails with `Precondition` when `from` is no longer the
    /// owner or `to` is not an active member.
    async fn transfer_ownership(
        &self,
        tenant_id: TenantId,
        from: UserId,
        to: UserId,
        now: OffsetDateTime,
    ) -> StoreResult<Tenant>;

    /// Record the enforced plan and its limits on the tenant.
    async fn update_plan(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        limits: ResourceLimits,
    ) -> StoreResult<()>;
}

// =============================================================================
// Memberships
// =============================================================================

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn get_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
    ) -> StoreResult<Option<Membership>>;

    /// Membership for (tenant, user) regardless of status.
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>>;

    /// Active memberships, oldest first.
    async fn list_members(&self, tenant_id: TenantId) -> StoreResult<Vec<Membership>>;

    async fn has_active_member_with_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> StoreResult<bool>;

    /// Change role and permissions. Re-reads the tenant owner inside the same
    /// operation and fails with `Precondition` if the target is the owner.
    async fn update_member_role(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        role: MemberRole,
        permissions: PermissionSet,
        now: OffsetDateTime,
    ) -> StoreResult<Membership>;

    /// Soft-delete an active member. Same owner guard as `update_member_role`.
    async fn deactivate_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        now: OffsetDateTime,
    ) -> StoreResult<Membership>;
}

// =============================================================================
// Invitations
// =============================================================================

#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Fails with `UniqueViolation` when a pending invitation for the same
    /// (tenant, email) exists or the token is already in use.
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()>;

    async fn get_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> StoreResult<Option<Invitation>>;

    async fn find_pending_invitation_by_token(&self, token: &str)
        -> StoreResult<Option<Invitation>>;

    async fn find_pending_invitation_by_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> StoreResult<Option<Invitation>>;

    async fn list_pending_invitations(&self, tenant_id: TenantId) -> StoreResult<Vec<Invitation>>;

    async fn delete_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> StoreResult<()>;

    /// Replace the token and expiry of a pending invitation.
    async fn refresh_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<Invitation>;

    /// Mark the invitation accepted and create the membership in one step.
    /// A removed membership for the same user is reactivated with the
    /// invitation's role and permissions. An active one fails with
    /// `UniqueViolation`; an invitation that is no longer pending fails with
    /// `NotFound`.
    async fn accept_invitation(
        &self,
        invitation_id: InvitationId,
        membership: &Membership,
        now: OffsetDateTime,
    ) -> StoreResult<Membership>;
}

// =============================================================================
// API Keys
// =============================================================================

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()>;

    /// Lookup by hash regardless of status.
    async fn find_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;

    async fn get_api_key(&self, tenant_id: TenantId, key_id: ApiKeyId)
        -> StoreResult<Option<ApiKey>>;

    async fn list_api_keys(&self, tenant_id: TenantId) -> StoreResult<Vec<ApiKey>>;

    async fn revoke_api_key(&self, tenant_id: TenantId, key_id: ApiKeyId) -> StoreResult<ApiKey>;

    /// Swap the stored hash and prefix of an active key.
    async fn rotate_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
        key_hash: &str,
        key_prefix: &str,
    ) -> StoreResult<ApiKey>;

    async fn touch_api_key(&self, key_id: ApiKeyId, now: OffsetDateTime) -> StoreResult<()>;
}

// =============================================================================
// Audit Log
// =============================================================================

/// Append-only audit log sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> StoreResult<()>;

    /// Most recent entries first.
    async fn list_audit_entries(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> StoreResult<Vec<AuditLogEntry>>;
}

// =============================================================================
// Billing
// =============================================================================

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Fails with `UniqueViolation` when the tenant already has a live
    /// (non-canceled) subscription.
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()>;

    /// The most recently created subscription of any status.
    async fn latest_subscription(&self, tenant_id: TenantId) -> StoreResult<Option<Subscription>>;

    /// Compare-and-swap write: succeeds only while the stored row still has
    /// the `status` and `updated_at` of `expected`, the version the change
    /// was computed from. Fails with `Precondition` otherwise, and with
    /// `UniqueViolation` if the write would create a second live subscription.
    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected: &Subscription,
    ) -> StoreResult<()>;

    /// Fails with `UniqueViolation` on a duplicate invoice number.
    async fn insert_invoice(&self, invoice: &Invoice) -> StoreResult<()>;

    async fn get_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> StoreResult<Option<Invoice>>;

    /// Compare-and-swap on invoice status, as for subscriptions.
    async fn update_invoice(&self, invoice: &Invoice, expected: InvoiceStatus) -> StoreResult<()>;

    /// Newest first.
    async fn list_invoices(&self, tenant_id: TenantId) -> StoreResult<Vec<Invoice>>;

    /// Insert a payment method. When it is flagged default, every other
    /// method of the tenant is cleared in the same step.
    async fn insert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()>;

    async fn list_payment_methods(&self, tenant_id: TenantId) -> StoreResult<Vec<PaymentMethod>>;

    async fn delete_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
    ) -> StoreResult<PaymentMethod>;

    /// Clear `is_default` on every other method and set it on the target,
    /// atomically.
    async fn set_default_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
    ) -> StoreResult<PaymentMethod>;
}

/// Everything the tenancy managers need from persistence.
pub trait TenancyStore: TenantStore + MembershipStore + InvitationStore + ApiKeyStore {}

impl<T> TenancyStore for T where T: TenantStore + MembershipStore + InvitationStore + ApiKeyStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_other_sqlx_errors_are_backend() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
