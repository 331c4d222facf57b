//! Postgres store
//!
//! Uniqueness invariants are backed by the indexes in `migrations/`; a
//! violated index surfaces as `StoreError::UniqueViolation` through the
//! `From<sqlx::Error>` conversion. Multi-row operations run in one
//! transaction and lock the rows they guard with `SELECT ... FOR UPDATE`.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{
    ApiKeyStore, AuditSink, BillingStore, InvitationStore, MembershipStore, StoreError,
    StoreResult, TenantStore,
};
use crate::capability::PermissionSet;
use crate::types::{
    ApiKey, ApiKeyId, AuditLogEntry, Invitation, InvitationId, Invoice, InvoiceId, InvoiceStatus,
    MemberId, MemberRole, MemberStatus, Membership, PaymentMethod, PaymentMethodId, Plan,
    ResourceLimits, Subscription, Tenant, TenantId, UserId,
};

/// Postgres implementation of every store trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Tenants
// =============================================================================

#[async_trait]
impl TenantStore for PgStore {
    async fn insert_tenant(&self, tenant: &Tenant, owner: &Membership) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tenants (
                id, name, slug, status, tenant_type, owner_id, parent_tenant_id,
                branding, domain, settings, features, limits, billing,
                trial_ends_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.status)
        .bind(tenant.tenant_type)
        .bind(tenant.owner_id)
        .bind(tenant.parent_tenant_id)
        .bind(Json(&tenant.branding))
        .bind(Json(&tenant.domain))
        .bind(Json(&tenant.settings))
        .bind(Json(&tenant.features))
        .bind(Json(&tenant.limits))
        .bind(Json(&tenant.billing))
        .bind(tenant.trial_ends_at)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_membership(&mut tx, owner).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant> {
        let updated = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET name = $2, slug = $3, status = $4, tenant_type = $5,
                branding = $6, domain = $7, settings = $8, features = $9,
                trial_ends_at = $10, updated_at = $11
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.status)
        .bind(tenant.tenant_type)
        .bind(Json(&tenant.branding))
        .bind(Json(&tenant.domain))
        .bind(Json(&tenant.settings))
        .bind(Json(&tenant.features))
        .bind(tenant.trial_ends_at)
        .bind(tenant.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| StoreError::NotFound("tenant".into()))
    }

    async fn delete_tenant(&self, id: TenantId) -> StoreResult<()> {
        // Child rows go with ON DELETE CASCADE; audit_logs has no foreign key.
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("tenant".into()));
        }
        Ok(())
    }

    async fn list_tenants_for_user(&self, user_id: UserId) -> StoreResult<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT t.*
            FROM tenants t
            INNER JOIN memberships m ON m.tenant_id = t.id
            WHERE m.user_id = $1 AND m.status = 'active'
            ORDER BY t.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    async fn list_sub_tenants(&self, parent_id: TenantId) -> StoreResult<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE parent_tenant_id = $1 ORDER BY created_at",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    async fn transfer_ownership(
        &self,
        tenant_id: TenantId,
        from: UserId,
        to: UserId,
        now: OffsetDateTime,
    ) -> StoreResult<Tenant> {
        let mut tx = self.pool.begin().await?;

        let owner_id = lock_tenant_owner(&mut tx, tenant_id).await?;
        if owner_id != from {
            return Err(StoreError::Precondition("actor is no longer the owner".into()));
        }
        if from == to {
            return Err(StoreError::Precondition("already the owner".into()));
        }

        let target: Option<(MemberStatus,)> = sqlx::query_as(
            "SELECT status FROM memberships WHERE tenant_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(to)
        .fetch_optional(&mut *tx)
        .await?;
        if !matches!(target, Some((MemberStatus::Active,))) {
            return Err(StoreError::Precondition("new owner must be an active member".into()));
        }

        // Demote first: the one-owner index is checked per statement.
        sqlx::query(
            r#"
            UPDATE memberships SET role = $3, updated_at = $4
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(MemberRole::Admin)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE memberships SET role = $3, permissions = $4, updated_at = $5
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(to)
        .bind(MemberRole::Owner)
        .bind(Json(PermissionSet::All))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let tenant = sqlx::query_as::<_, Tenant>(
            "UPDATE tenants SET owner_id = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(tenant_id)
        .bind(to)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(tenant)
    }

    async fn update_plan(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        limits: ResourceLimits,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET billing = jsonb_set(billing, '{plan}', to_jsonb($2::text)),
                limits = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .bind(plan.as_str())
        .bind(Json(limits))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("tenant".into()));
        }
        Ok(())
    }
}

async fn insert_membership(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    member: &Membership,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO memberships (
            id, tenant_id, user_id, email, role, permissions, status,
            invited_by, invited_at, joined_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(member.id)
    .bind(member.tenant_id)
    .bind(member.user_id)
    .bind(&member.email)
    .bind(member.role)
    .bind(Json(&member.permissions))
    .bind(member.status)
    .bind(member.invited_by)
    .bind(member.invited_at)
    .bind(member.joined_at)
    .bind(member.created_at)
    .bind(member.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Lock the tenant row and read its owner inside the caller's transaction.
async fn lock_tenant_owner(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: TenantId,
) -> StoreResult<UserId> {
    let row: Option<(UserId,)> =
        sqlx::query_as("SELECT owner_id FROM tenants WHERE id = $1 FOR UPDATE")
            .bind(tenant_id)
            .fetch_optional(&mut **tx)
            .await?;
    row.map(|(owner_id,)| owner_id)
        .ok_or_else(|| StoreError::NotFound("tenant".into()))
}

/// Lock a membership row and check it is not the tenant owner.
async fn lock_non_owner_member(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: TenantId,
    member_id: MemberId,
    owner_message: &str,
) -> StoreResult<Membership> {
    let owner_id = lock_tenant_owner(tx, tenant_id).await?;

    let member = sqlx::query_as::<_, Membership>(
        "SELECT * FROM memberships WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
    )
    .bind(member_id)
    .bind(tenant_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| StoreError::NotFound("member".into()))?;

    if member.user_id == owner_id {
        return Err(StoreError::Precondition(owner_message.to_string()));
    }
    Ok(member)
}

// =============================================================================
// Memberships
// =============================================================================

#[async_trait]
impl MembershipStore for PgStore {
    async fn get_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
    ) -> StoreResult<Option<Membership>> {
        let member = sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE id = $1 AND tenant_id = $2",
        )
        .bind(member_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        let member = sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    async fn list_members(&self, tenant_id: TenantId) -> StoreResult<Vec<Membership>> {
        let members = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM memberships
            WHERE tenant_id = $1 AND status = 'active'
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn has_active_member_with_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> StoreResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM memberships
                WHERE tenant_id = $1 AND LOWER(email) = LOWER($2) AND status = 'active'
            )
            "#,
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn update_member_role(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        role: MemberRole,
        permissions: PermissionSet,
        now: OffsetDateTime,
    ) -> StoreResult<Membership> {
        let mut tx = self.pool.begin().await?;
        lock_non_owner_member(&mut tx, tenant_id, member_id, "the owner's role cannot be changed")
            .await?;

        let member = sqlx::query_as::<_, Membership>(
            r#"
            UPDATE memberships SET role = $2, permissions = $3, updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(member_id)
        .bind(role)
        .bind(Json(&permissions))
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(member)
    }

    async fn deactivate_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        now: OffsetDateTime,
    ) -> StoreResult<Membership> {
        let mut tx = self.pool.begin().await?;
        let member =
            lock_non_owner_member(&mut tx, tenant_id, member_id, "the owner cannot be removed")
                .await?;
        if !member.is_active() {
            return Err(StoreError::NotFound("member".into()));
        }

        let member = sqlx::query_as::<_, Membership>(
            "UPDATE memberships SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(member_id)
        .bind(MemberStatus::Removed)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(member)
    }
}

// =============================================================================
// Invitations
// =============================================================================

#[async_trait]
impl InvitationStore for PgStore {
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (
                id, tenant_id, email, role, permissions, token, invited_by,
                expires_at, accepted_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(invitation.id)
        .bind(invitation.tenant_id)
        .bind(&invitation.email)
        .bind(invitation.role)
        .bind(Json(&invitation.permissions))
        .bind(&invitation.token)
        .bind(invitation.invited_by)
        .bind(invitation.expires_at)
        .bind(invitation.accepted_at)
        .bind(invitation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> StoreResult<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE id = $1 AND tenant_id = $2",
        )
        .bind(invitation_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn find_pending_invitation_by_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations WHERE token = $1 AND accepted_at IS NULL",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn find_pending_invitation_by_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> StoreResult<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(
            r#"
            SELECT * FROM invitations
            WHERE tenant_id = $1 AND email = $2 AND accepted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn list_pending_invitations(&self, tenant_id: TenantId) -> StoreResult<Vec<Invitation>> {
        let invitations = sqlx::query_as::<_, Invitation>(
            r#"
            SELECT * FROM invitations
            WHERE tenant_id = $1 AND accepted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invitations)
    }

    async fn delete_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1 AND tenant_id = $2")
            .bind(invitation_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("invitation".into()));
        }
        Ok(())
    }

    async fn refresh_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<Invitation> {
        let invitation = sqlx::query_as::<_, Invitation>(
            r#"
            UPDATE invitations SET token = $3, expires_at = $4
            WHERE id = $1 AND tenant_id = $2 AND accepted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(invitation_id)
        .bind(tenant_id)
        .bind(token)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        invitation.ok_or_else(|| StoreError::NotFound("invitation".into()))
    }

    async fn accept_invitation(
        &self,
        invitation_id: InvitationId,
        membership: &Membership,
        now: OffsetDateTime,
    ) -> StoreResult<Membership> {
        let mut tx = self.pool.begin().await?;

        let pending: Option<(InvitationId,)> = sqlx::query_as(
            "SELECT id FROM invitations WHERE id = $1 AND accepted_at IS NULL FOR UPDATE",
        )
        .bind(invitation_id)
        .fetch_optional(&mut *tx)
        .await?;
        if pending.is_none() {
            return Err(StoreError::NotFound("invitation".into()));
        }

        let existing = sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE tenant_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(membership.tenant_id)
        .bind(membership.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let accepted = match existing {
            Some(current) if current.is_active() => {
                return Err(StoreError::UniqueViolation("memberships_tenant_user_key".into()));
            }
            Some(current) => {
                sqlx::query_as::<_, Membership>(
                    r#"
                    UPDATE memberships
                    SET role = $2, permissions = $3, email = $4, status = $5,
                        invited_by = $6, invited_at = $7, joined_at = $8, updated_at = $9
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(current.id)
                .bind(membership.role)
                .bind(Json(&membership.permissions))
                .bind(&membership.email)
                .bind(MemberStatus::Active)
                .bind(membership.invited_by)
                .bind(membership.invited_at)
                .bind(membership.joined_at)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                insert_membership(&mut tx, membership).await?;
                membership.clone()
            }
        };

        sqlx::query("UPDATE invitations SET accepted_at = $2 WHERE id = $1")
            .bind(invitation_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(accepted)
    }
}

// =============================================================================
// API Keys
// =============================================================================

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                id, tenant_id, name, key_prefix, key_hash, permissions, scopes,
                rate_limit, ip_allowlist, expires_at, last_used_at, status,
                created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(key.id)
        .bind(key.tenant_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(Json(&key.permissions))
        .bind(Json(&key.scopes))
        .bind(key.rate_limit)
        .bind(&key.ip_allowlist)
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.status)
        .bind(key.created_by)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    async fn get_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
    ) -> StoreResult<Option<ApiKey>> {
        let key =
            sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = $1 AND tenant_id = $2")
                .bind(key_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(key)
    }

    async fn list_api_keys(&self, tenant_id: TenantId) -> StoreResult<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn revoke_api_key(&self, tenant_id: TenantId, key_id: ApiKeyId) -> StoreResult<ApiKey> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE api_keys SET status = 'revoked'
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(key_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        key.ok_or_else(|| StoreError::NotFound("api key".into()))
    }

    async fn rotate_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
        key_hash: &str,
        key_prefix: &str,
    ) -> StoreResult<ApiKey> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(crate::types::ApiKeyStatus,)> = sqlx::query_as(
            "SELECT status FROM api_keys WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(key_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;
        match current {
            None => return Err(StoreError::NotFound("api key".into())),
            Some((crate::types::ApiKeyStatus::Revoked,)) => {
                return Err(StoreError::Precondition("revoked keys cannot be rotated".into()));
            }
            Some(_) => {}
        }

        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE api_keys SET key_hash = $2, key_prefix = $3, last_used_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(key_id)
        .bind(key_hash)
        .bind(key_prefix)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(key)
    }

    async fn touch_api_key(&self, key_id: ApiKeyId, now: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(key_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Audit Log
// =============================================================================

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, tenant_id, actor_id, action, resource_type, resource_id,
                details, ip_address, user_agent, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT * FROM audit_logs
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

// =============================================================================
// Billing
// =============================================================================

#[async_trait]
impl BillingStore for PgStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, plan, status, billing_cycle,
                provider_customer_id, provider_subscription_id, amount_cents, currency,
                current_period_start, current_period_end, trial_ends_at, canceled_at,
                cancel_at_period_end, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tenant_id)
        .bind(subscription.plan)
        .bind(subscription.status)
        .bind(subscription.billing_cycle)
        .bind(&subscription.provider_customer_id)
        .bind(&subscription.provider_subscription_id)
        .bind(subscription.amount_cents)
        .bind(&subscription.currency)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.trial_ends_at)
        .bind(subscription.canceled_at)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_subscription(&self, tenant_id: TenantId) -> StoreResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE tenant_id = $1
            ORDER BY created_at DESC, (status = 'canceled') ASC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected: &Subscription,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan = $4, status = $5, billing_cycle = $6, amount_cents = $7,
                current_period_start = $8, current_period_end = $9,
                trial_ends_at = $10, canceled_at = $11, cancel_at_period_end = $12,
                updated_at = $13
            WHERE id = $1 AND status = $2 AND updated_at = $3
            "#,
        )
        .bind(subscription.id)
        .bind(expected.status)
        .bind(expected.updated_at)
        .bind(subscription.plan)
        .bind(subscription.status)
        .bind(subscription.billing_cycle)
        .bind(subscription.amount_cents)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.trial_ends_at)
        .bind(subscription.canceled_at)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .missing_or_changed("subscriptions", subscription.id.0, "subscription")
                .await);
        }
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, tenant_id, subscription_id, number, subtotal_cents, tax_cents,
                total_cents, currency, status, due_date, paid_at, line_items,
                refund_amount_cents, refund_reason, refunded_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.tenant_id)
        .bind(invoice.subscription_id)
        .bind(&invoice.number)
        .bind(invoice.subtotal_cents)
        .bind(invoice.tax_cents)
        .bind(invoice.total_cents)
        .bind(&invoice.currency)
        .bind(invoice.status)
        .bind(invoice.due_date)
        .bind(invoice.paid_at)
        .bind(Json(&invoice.line_items))
        .bind(invoice.refund_amount_cents)
        .bind(&invoice.refund_reason)
        .bind(invoice.refunded_at)
        .bind(invoice.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> StoreResult<Option<Invoice>> {
        let invoice =
            sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 AND tenant_id = $2")
                .bind(invoice_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(invoice)
    }

    async fn update_invoice(&self, invoice: &Invoice, expected: InvoiceStatus) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $3, paid_at = $4, refund_amount_cents = $5,
                refund_reason = $6, refunded_at = $7
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(invoice.id)
        .bind(expected)
        .bind(invoice.status)
        .bind(invoice.paid_at)
        .bind(invoice.refund_amount_cents)
        .bind(&invoice.refund_reason)
        .bind(invoice.refunded_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .missing_or_changed("invoices", invoice.id.0, "invoice")
                .await);
        }
        Ok(())
    }

    async fn list_invoices(&self, tenant_id: TenantId) -> StoreResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        if method.is_default {
            sqlx::query(
                "UPDATE payment_methods SET is_default = FALSE WHERE tenant_id = $1 AND is_default",
            )
            .bind(method.tenant_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO payment_methods (
                id, tenant_id, provider_ref, brand, last4, exp_month, exp_year,
                is_default, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(method.id)
        .bind(method.tenant_id)
        .bind(&method.provider_ref)
        .bind(&method.brand)
        .bind(&method.last4)
        .bind(method.exp_month)
        .bind(method.exp_year)
        .bind(method.is_default)
        .bind(method.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_payment_methods(&self, tenant_id: TenantId) -> StoreResult<Vec<PaymentMethod>> {
        let methods = sqlx::query_as::<_, PaymentMethod>(
            "SELECT * FROM payment_methods WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(methods)
    }

    async fn delete_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
    ) -> StoreResult<PaymentMethod> {
        let method = sqlx::query_as::<_, PaymentMethod>(
            "DELETE FROM payment_methods WHERE id = $1 AND tenant_id = $2 RETURNING *",
        )
        .bind(method_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        method.ok_or_else(|| StoreError::NotFound("payment method".into()))
    }

    async fn set_default_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
    ) -> StoreResult<PaymentMethod> {
        let mut tx = self.pool.begin().await?;

        // Lock every method of the tenant so concurrent swaps serialize.
        let ids: Vec<(PaymentMethodId,)> =
            sqlx::query_as("SELECT id FROM payment_methods WHERE tenant_id = $1 FOR UPDATE")
                .bind(tenant_id)
                .fetch_all(&mut *tx)
                .await?;
        if !ids.iter().any(|(id,)| *id == method_id) {
            return Err(StoreError::NotFound("payment method".into()));
        }

        sqlx::query(
            r#"
            UPDATE payment_methods SET is_default = FALSE
            WHERE tenant_id = $1 AND is_default AND id <> $2
            "#,
        )
        .bind(tenant_id)
        .bind(method_id)
        .execute(&mut *tx)
        .await?;

        let method = sqlx::query_as::<_, PaymentMethod>(
            "UPDATE payment_methods SET is_default = TRUE WHERE id = $1 RETURNING *",
        )
        .bind(method_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(method)
    }
}

impl PgStore {
    /// Tell a missing row apart from one whose status moved under a CAS write.
    async fn missing_or_changed(&self, table: &str, id: uuid::Uuid, what: &str) -> StoreError {
        let query = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
        match sqlx::query_as::<_, (bool,)>(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await
        {
            Ok((true,)) => StoreError::Precondition(format!("{} changed concurrently", what)),
            Ok((false,)) => StoreError::NotFound(what.to_string()),
            Err(e) => e.into(),
        }
    }
}
