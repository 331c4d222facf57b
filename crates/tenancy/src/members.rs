//! Tenant members
//!
//! The owner's membership is immutable here. Both the role change and the
//! removal go through guarded store operations that re-read `owner_id`
//! under the same lock as the write, so a concurrent ownership transfer
//! cannot slip between the check and the mutation.

use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, AuditEntryBuilder, AuditLogger, Capability, LnkError, LnkResult, MemberId, MemberRole,
    Membership, PermissionSet, TenancyStore, TenantId, UserId,
};
use time::OffsetDateTime;

use crate::permissions::PermissionEvaluator;

#[derive(Clone)]
pub struct MemberManager {
    store: Arc<dyn TenancyStore>,
    permissions: PermissionEvaluator,
    audit: AuditLogger,
}

impl MemberManager {
    pub fn new(
        store: Arc<dyn TenancyStore>,
        permissions: PermissionEvaluator,
        audit: AuditLogger,
    ) -> Self {
        Self {
            store,
            permissions,
            audit,
        }
    }

    /// Active members, oldest first.
    pub async fn list_members(&self, tenant_id: TenantId, actor: Actor) -> LnkResult<Vec<Membership>> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersRead)
            .await?;
        Ok(self.store.list_members(tenant_id).await?)
    }

    pub async fn get_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        actor: Actor,
    ) -> LnkResult<Membership> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersRead)
            .await?;
        self.require_member(tenant_id, member_id).await
    }

    /// Change a member's role and permission overrides.
    ///
    /// Promoting to `owner` is rejected; ownership moves only through
    /// `TenantManager::transfer_ownership`. Asking for `owner` on the current
    /// owner changes nothing and returns the membership as it is.
    pub async fn update_member_role(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        role: MemberRole,
        permissions: PermissionSet,
        actor: Actor,
    ) -> LnkResult<Membership> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersUpdate)
            .await?;

        let member = self.require_member(tenant_id, member_id).await?;
        if role.is_owner() && member.role.is_owner() {
            return Ok(member);
        }
        if role.is_owner() {
            return Err(LnkError::BadRequest(
                "the owner role can only be assigned by transferring ownership".into(),
            ));
        }

        let previous_role = member.role;
        let updated = self
            .store
            .update_member_role(
                tenant_id,
                member_id,
                role,
                permissions,
                OffsetDateTime::now_utc(),
            )
            .await?;

        tracing::info!(tenant_id = %tenant_id, member_id = %member_id, role = %role, "member role updated");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::MEMBER_ROLE_UPDATED)
                    .actor(actor)
                    .resource(resource::MEMBER, member_id)
                    .details(serde_json::json!({
                        "user_id": updated.user_id,
                        "previous_role": previous_role,
                        "role": updated.role,
                        "permissions": updated.permissions,
                    })),
            )
            .await;

        Ok(updated)
    }

    /// Soft-delete a member. The owner cannot be removed.
    pub async fn remove_member(
        &self,
        tenant_id: TenantId,
        member_id: MemberId,
        actor: Actor,
    ) -> LnkResult<()> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersRemove)
            .await?;

        self.require_member(tenant_id, member_id).await?;
        let removed = self
            .store
            .deactivate_member(tenant_id, member_id, OffsetDateTime::now_utc())
            .await?;

        tracing::info!(tenant_id = %tenant_id, member_id = %member_id, "member removed");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::MEMBER_REMOVED)
                    .actor(actor)
                    .resource(resource::MEMBER, member_id)
                    .details(serde_json::json!({ "user_id": removed.user_id })),
            )
            .await;

        Ok(())
    }

    /// The calling user leaves the tenant.
    pub async fn leave(&self, tenant_id: TenantId, user_id: UserId) -> LnkResult<()> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| LnkError::not_found(format!("tenant {}", tenant_id)))?;
        if tenant.owner_id == user_id {
            return Err(LnkError::BadRequest(
                "the owner cannot leave; transfer ownership first".into(),
            ));
        }

        let membership = match self.store.find_membership(tenant_id, user_id).await? {
            Some(m) if m.is_active() => m,
            _ => {
                return Err(LnkError::Forbidden(
                    "you are not a member of this tenant".into(),
                ))
            }
        };

        self.store
            .deactivate_member(tenant_id, membership.id, OffsetDateTime::now_utc())
            .await?;

        tracing::info!(tenant_id = %tenant_id, user_id = %user_id, "member left tenant");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::MEMBER_LEFT)
                    .actor(user_id)
                    .resource(resource::MEMBER, membership.id),
            )
            .await;

        Ok(())
    }

    async fn require_member(&self, tenant_id: TenantId, member_id: MemberId) -> LnkResult<Membership> {
        match self.store.get_member(tenant_id, member_id).await? {
            Some(m) if m.is_active() => Ok(m),
            _ => Err(LnkError::not_found(format!("member {}", member_id))),
        }
    }
}
