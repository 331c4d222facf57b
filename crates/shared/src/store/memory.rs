//! In-memory store
//!
//! All state sits behind one `RwLock`, so every trait method observes and
//! mutates a consistent snapshot. Used by the test suites and by embedders
//! that do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{
    ApiKeyStore, AuditSink, BillingStore, InvitationStore, MembershipStore, StoreError,
    StoreResult, TenantStore,
};
use crate::capability::PermissionSet;
use crate::types::{
    ApiKey, ApiKeyId, ApiKeyStatus, AuditLogEntry, Invitation, InvitationId, Invoice, InvoiceId,
    InvoiceStatus, MemberId, MemberRole, MemberStatus, Membership, PaymentMethod, PaymentMethodId,
    Plan, ResourceLimits, Subscription, SubscriptionId, Tenant, TenantId,
    UserId,
};

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<TenantId, Tenant>,
    members: HashMap<MemberId, Membership>,
    invitations: HashMap<InvitationId, Invitation>,
    api_keys: HashMap<ApiKeyId, ApiKey>,
    audit: Vec<AuditLogEntry>,
    subscriptions: Vec<Subscription>,
    invoices: HashMap<InvoiceId, Invoice>,
    payment_methods: HashMap<PaymentMethodId, PaymentMethod>,
}

impl MemoryState {
    fn slug_taken(&self, slug: &str, except: Option<TenantId>) -> bool {
        self.tenants
            .values()
            .any(|t| t.slug == slug && Some(t.id) != except)
    }

    fn owner_of(&self, tenant_id: TenantId) -> StoreResult<UserId> {
        self.tenants
            .get(&tenant_id)
            .map(|t| t.owner_id)
            .ok_or_else(|| StoreError::NotFound("tenant".into()))
    }

    fn member_mut(
        &mut self,
        tenant_id: TenantId,
        member_id: MemberId,
    ) -> StoreResult<&mut Membership> {
        self.members
            .get_mut(&member_id)
            .filter(|m| m.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::NotFound("member".into()))
    }

    fn membership_id_for(&self, tenant_id: TenantId, user_id: UserId) -> Option<MemberId> {
        self.members
            .values()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .map(|m| m.id)
    }

    fn live_subscription_exists(
        &self,
        tenant_id: TenantId,
        except: Option<SubscriptionId>,
    ) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.tenant_id == tenant_id && s.status.is_live() && Some(s.id) != except)
    }
}

/// In-memory implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant, owner: &Membership) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.slug_taken(&tenant.slug, None) {
            return Err(StoreError::UniqueViolation("tenants_slug_key".into()));
        }
        state.tenants.insert(tenant.id, tenant.clone());
        state.members.insert(owner.id, owner.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        Ok(self.state.read().await.tenants.get(&id).cloned())
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let state = self.state.read().await;
        Ok(state.tenants.values().find(|t| t.slug == slug).cloned())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<Tenant> {
        let mut state = self.state.write().await;
        if state.slug_taken(&tenant.slug, Some(tenant.id)) {
            return Err(StoreError::UniqueViolation("tenants_slug_key".into()));
        }
        let stored = state
            .tenants
            .get_mut(&tenant.id)
            .ok_or_else(|| StoreError::NotFound("tenant".into()))?;

        stored.name = tenant.name.clone();
        stored.slug = tenant.slug.clone();
        stored.status = tenant.status;
        stored.tenant_type = tenant.tenant_type;
        stored.branding = tenant.branding.clone();
        stored.domain = tenant.domain.clone();
        stored.settings = tenant.settings.clone();
        stored.features = tenant.features.clone();
        stored.trial_ends_at = tenant.trial_ends_at;
        stored.updated_at = tenant.updated_at;
        Ok(stored.clone())
    }

    async fn delete_tenant(&self, id: TenantId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.tenants.remove(&id).is_none() {
            return Err(StoreError::NotFound("tenant".into()));
        }
        state.members.retain(|_, m| m.tenant_id != id);
        state.invitations.retain(|_, i| i.tenant_id != id);
        state.api_keys.retain(|_, k| k.tenant_id != id);
        state.subscriptions.retain(|s| s.tenant_id != id);
        state.invoices.retain(|_, i| i.tenant_id != id);
        state.payment_methods.retain(|_, p| p.tenant_id != id);
        // Sub-tenants outlive their parent; the link is dropped.
        for tenant in state.tenants.values_mut() {
            if tenant.parent_tenant_id == Some(id) {
                tenant.parent_tenant_id = None;
            }
        }
        Ok(())
    }

    async fn list_tenants_for_user(&self, user_id: UserId) -> StoreResult<Vec<Tenant>> {
        let state = self.state.read().await;
        let mut tenants: Vec<Tenant> = state
            .members
            .values()
            .filter(|m| m.user_id == user_id && m.is_active())
            .filter_map(|m| state.tenants.get(&m.tenant_id).cloned())
            .collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn list_sub_tenants(&self, parent_id: TenantId) -> StoreResult<Vec<Tenant>> {
        let state = self.state.read().await;
        let mut tenants: Vec<Tenant> = state
            .tenants
            .values()
            .filter(|t| t.parent_tenant_id == Some(parent_id))
            .cloned()
            .collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn transfer_ownership(
        &self,
        tenant_id: TenantId,
        from: UserId,
        to: UserId,
        now: OffsetDateTime,
    ) -> StoreResult<Tenant> {
        let mut state = self.state.write().await;
        if state.owner_of(tenant_id)? != from {
            return Err(StoreError::Precondition("actor is no longer the owner".into()));
        }
        if from == to {
            return Err(StoreError::Precondition("already the owner".into()));
        }

        let target_id = state
            .membership_id_for(tenant_id, to)
            .filter(|id| state.members.get(id).map(Membership::is_active).unwrap_or(false))
            .ok_or_else(|| StoreError::Precondition("new owner must be an active member".into()))?;
        let previous_id = state
            .membership_id_for(tenant_id, from)
            .ok_or_else(|| StoreError::NotFound("owner membership".into()))?;

        let target = state.member_mut(tenant_id, target_id)?;
        target.role = MemberRole::Owner;
        target.permissions = PermissionSet::All;
        target.updated_at = now;

        let previous = state.member_mut(tenant_id, previous_id)?;
        previous.role = MemberRole::Admin;
        previous.updated_at = now;

        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound("tenant".into()))?;
        tenant.owner_id = to;
        tenant.updated_at = now;
        Ok(tenant.clone())
    }

    async fn update_plan(
        &self,
        tenant_id: TenantId,
        plan: Plan,
        limits: ResourceLimits,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::NotFound("tenant".into()))?;
        tenant.billing.plan = plan;
        tenant.limits = limits;
        tenant.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn get_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
    ) -> StoreResult<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(&member_id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, tenant_id: TenantId) -> StoreResult<Vec<Membership>> {
        let state = self.state.read().await;
        let mut members: Vec<Membership> = state
            .members
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.is_active())
            .cloned()
            .collect();
        members.sort_by_key(|m| m.created_at);
        Ok(members)
    }

    async fn has_active_member_with_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.members.values().any(|m| {
            m.tenant_id == tenant_id
                && m.is_active()
                && m.email.as_deref().map(|e| e.eq_ignore_ascii_case(email)) == Some(true)
        }))
    }

    async fn update_member_role(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        role: MemberRole,
        permissions: PermissionSet,
        now: OffsetDateTime,
    ) -> StoreResult<Membership> {
        let mut state = self.state.write().await;
        let owner_id = state.owner_of(tenant_id)?;
        let member = state.member_mut(tenant_id, member_id)?;
        if member.user_id == owner_id {
            return Err(StoreError::Precondition("the owner's role cannot be changed".into()));
        }
        member.role = role;
        member.permissions = permissions;
        member.updated_at = now;
        Ok(member.clone())
    }

    async fn deactivate_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        now: OffsetDateTime,
    ) -> StoreResult<Membership> {
        let mut state = self.state.write().await;
        let owner_id = state.owner_of(tenant_id)?;
        let member = state.member_mut(tenant_id, member_id)?;
        if member.user_id == owner_id {
            return Err(StoreError::Precondition("the owner cannot be removed".into()));
        }
        if !member.is_active() {
            return Err(StoreError::NotFound("member".into()));
        }
        member.status = MemberStatus::Removed;
        member.updated_at = now;
        Ok(member.clone())
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let duplicate = state.invitations.values().any(|i| {
            i.is_pending() && i.tenant_id == invitation.tenant_id && i.email == invitation.email
        });
        if duplicate {
            return Err(StoreError::UniqueViolation("invitations_pending_email_key".into()));
        }
        if state.invitations.values().any(|i| i.token == invitation.token) {
            return Err(StoreError::UniqueViolation("invitations_token_key".into()));
        }
        state.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn get_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> StoreResult<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .get(&invitation_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_pending_invitation_by_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .values()
            .find(|i| i.is_pending() && i.token == token)
            .cloned())
    }

    async fn find_pending_invitation_by_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> StoreResult<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .values()
            .find(|i| i.is_pending() && i.tenant_id == tenant_id && i.email == email)
            .cloned())
    }

    async fn list_pending_invitations(&self, tenant_id: TenantId) -> StoreResult<Vec<Invitation>> {
        let state = self.state.read().await;
        let mut invitations: Vec<Invitation> = state
            .invitations
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.is_pending())
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    async fn delete_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let owned = state
            .invitations
            .get(&invitation_id)
            .map(|i| i.tenant_id == tenant_id)
            .unwrap_or(false);
        if !owned {
            return Err(StoreError::NotFound("invitation".into()));
        }
        state.invitations.remove(&invitation_id);
        Ok(())
    }

    async fn refresh_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<Invitation> {
        let mut state = self.state.write().await;
        if state
            .invitations
            .values()
            .any(|i| i.token == token && i.id != invitation_id)
        {
            return Err(StoreError::UniqueViolation("invitations_token_key".into()));
        }
        let invitation = state
            .invitations
            .get_mut(&invitation_id)
            .filter(|i| i.tenant_id == tenant_id && i.is_pending())
            .ok_or_else(|| StoreError::NotFound("invitation".into()))?;
        invitation.token = token.to_string();
        invitation.expires_at = expires_at;
        Ok(invitation.clone())
    }

    async fn accept_invitation(
        &self,
        invitation_id: InvitationId,
        membership: &Membership,
        now: OffsetDateTime,
    ) -> StoreResult<Membership> {
        let mut state = self.state.write().await;
        let pending = state
            .invitations
            .get(&invitation_id)
            .map(Invitation::is_pending)
            .unwrap_or(false);
        if !pending {
            return Err(StoreError::NotFound("invitation".into()));
        }

        let existing = state.membership_id_for(membership.tenant_id, membership.user_id);
        let accepted = match existing {
            Some(id) => {
                let member = state.member_mut(membership.tenant_id, id)?;
                if member.is_active() {
                    return Err(StoreError::UniqueViolation("memberships_tenant_user_key".into()));
                }
                member.role = membership.role;
                member.permissions = membership.permissions.clone();
                member.email = membership.email.clone();
                member.status = MemberStatus::Active;
                member.invited_by = membership.invited_by;
                member.invited_at = membership.invited_at;
                member.joined_at = membership.joined_at;
                member.updated_at = now;
                member.clone()
            }
            None => {
                state.members.insert(membership.id, membership.clone());
                membership.clone()
            }
        };

        if let Some(invitation) = state.invitations.get_mut(&invitation_id) {
            invitation.accepted_at = Some(now);
        }
        Ok(accepted)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::UniqueViolation("api_keys_key_hash_key".into()));
        }
        state.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn get_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
    ) -> StoreResult<Option<ApiKey>> {
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .get(&key_id)
            .filter(|k| k.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_api_keys(&self, tenant_id: TenantId) -> StoreResult<Vec<ApiKey>> {
        let state = self.state.read().await;
        let mut keys: Vec<ApiKey> = state
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn revoke_api_key(&self, tenant_id: TenantId, key_id: ApiKeyId) -> StoreResult<ApiKey> {
        let mut state = self.state.write().await;
        let key = state
            .api_keys
            .get_mut(&key_id)
            .filter(|k| k.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::NotFound("api key".into()))?;
        key.status = ApiKeyStatus::Revoked;
        Ok(key.clone())
    }

    async fn rotate_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
        key_hash: &str,
        key_prefix: &str,
    ) -> StoreResult<ApiKey> {
        let mut state = self.state.write().await;
        if state.api_keys.values().any(|k| k.key_hash == key_hash) {
            return Err(StoreError::UniqueViolation("api_keys_key_hash_key".into()));
        }
        let key = state
            .api_keys
            .get_mut(&key_id)
            .filter(|k| k.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::NotFound("api key".into()))?;
        if !key.is_active() {
            return Err(StoreError::Precondition("revoked keys cannot be rotated".into()));
        }
        key.key_hash = key_hash.to_string();
        key.key_prefix = key_prefix.to_string();
        key.last_used_at = None;
        Ok(key.clone())
    }

    async fn touch_api_key(&self, key_id: ApiKeyId, now: OffsetDateTime) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(key) = state.api_keys.get_mut(&key_id) {
            key.last_used_at = Some(now);
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if subscription.status.is_live()
            && state.live_subscription_exists(subscription.tenant_id, None)
        {
            return Err(StoreError::UniqueViolation("subscriptions_one_live_per_tenant".into()));
        }
        state.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn latest_subscription(&self, tenant_id: TenantId) -> StoreResult<Option<Subscription>> {
        let state = self.state.read().await;
        // max_by_key keeps the last maximum, so later inserts win ties.
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected: &Subscription,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if subscription.status.is_live()
            && state.live_subscription_exists(subscription.tenant_id, Some(subscription.id))
        {
            return Err(StoreError::UniqueViolation("subscriptions_one_live_per_tenant".into()));
        }
        let stored = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| StoreError::NotFound("subscription".into()))?;
        if stored.status != expected.status || stored.updated_at != expected.updated_at {
            return Err(StoreError::Precondition("subscription changed concurrently".into()));
        }
        *stored = subscription.clone();
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.invoices.values().any(|i| i.number == invoice.number) {
            return Err(StoreError::UniqueViolation("invoices_number_key".into()));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> StoreResult<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .get(&invoice_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_invoice(&self, invoice: &Invoice, expected: InvoiceStatus) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| StoreError::NotFound("invoice".into()))?;
        if stored.status != expected {
            return Err(StoreError::Precondition("invoice changed concurrently".into()));
        }
        *stored = invoice.clone();
        Ok(())
    }

    async fn list_invoices(&self, tenant_id: TenantId) -> StoreResult<Vec<Invoice>> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if method.is_default {
            for other in state.payment_methods.values_mut() {
                if other.tenant_id == method.tenant_id {
                    other.is_default = false;
                }
            }
        }
        state.payment_methods.insert(method.id, method.clone());
        Ok(())
    }

    async fn list_payment_methods(&self, tenant_id: TenantId) -> StoreResult<Vec<PaymentMethod>> {
        let state = self.state.read().await;
        let mut methods: Vec<PaymentMethod> = state
            .payment_methods
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        methods.sort_by_key(|p| p.created_at);
        Ok(methods)
    }

    async fn delete_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
    ) -> StoreResult<PaymentMethod> {
        let mut state = self.state.write().await;
        let owned = state
            .payment_methods
            .get(&method_id)
            .map(|p| p.tenant_id == tenant_id)
            .unwrap_or(false);
        if !owned {
            return Err(StoreError::NotFound("payment method".into()));
        }
        state
            .payment_methods
            .remove(&method_id)
            .ok_or_else(|| StoreError::NotFound("payment method".into()))
    }

    async fn set_default_payment_method(
        &self,
        tenant_id: TenantId,
        method_id: PaymentMethodId,
    ) -> StoreResult<PaymentMethod> {
        let mut state = self.state.write().await;
        let owned = state
            .payment_methods
            .get(&method_id)
            .map(|p| p.tenant_id == tenant_id)
            .unwrap_or(false);
        if !owned {
            return Err(StoreError::NotFound("payment method".into()));
        }
        for method in state.payment_methods.values_mut() {
            if method.tenant_id == tenant_id {
                method.is_default = method.id == method_id;
            }
        }
        state
            .payment_methods
            .get(&method_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("payment method".into()))
    }
}
