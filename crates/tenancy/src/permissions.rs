//! Permission evaluator
//!
//! Answers "may this actor exercise this capability in this tenant?". Every
//! mutating manager operation consults it before touching state. Evaluation
//! is read-only and can be repeated freely.
//!
//! Rules, in order:
//! 1. `Actor::System` is allowed everything.
//! 2. No active membership: deny with `NotAMember`.
//! 3. `owner`: allow.
//! 4. `admin`: allow unless the capability is owner-only.
//! 5. Otherwise allow iff the member's permission set contains `*` or the
//!    capability itself.

use std::sync::Arc;

use lnk_shared::{
    Actor, Capability, LnkError, LnkResult, MemberRole, Membership, MembershipStore,
    PermissionSet, TenantId,
};

/// Why a check was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotAMember,
    PermissionDenied,
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Pure role/permission rule, independent of storage.
pub fn role_allows(role: MemberRole, permissions: &PermissionSet, capability: Capability) -> bool {
    match role {
        MemberRole::Owner => true,
        MemberRole::Admin => !capability.is_owner_only(),
        MemberRole::Member => permissions.contains(capability),
    }
}

#[derive(Clone)]
pub struct PermissionEvaluator {
    members: Arc<dyn MembershipStore>,
}

impl PermissionEvaluator {
    pub fn new(members: Arc<dyn MembershipStore>) -> Self {
        Self { members }
    }

    /// Evaluate without converting a deny into an error.
    pub async fn check(
        &self,
        tenant_id: TenantId,
        actor: Actor,
        capability: Capability,
    ) -> LnkResult<Decision> {
        let user_id = match actor {
            Actor::System => return Ok(Decision::Allow),
            Actor::User(id) => id,
        };

        let membership = self.members.find_membership(tenant_id, user_id).await?;
        Ok(decide(membership.as_ref(), capability))
    }

    /// Evaluate and turn a deny into `Forbidden` (not a member) or
    /// `PermissionDenied` (member without the capability).
    pub async fn require(
        &self,
        tenant_id: TenantId,
        actor: Actor,
        capability: Capability,
    ) -> LnkResult<()> {
        match self.check(tenant_id, actor, capability).await? {
            Decision::Allow => Ok(()),
            Decision::Deny(DenyReason::NotAMember) => {
                tracing::warn!(tenant_id = %tenant_id, actor = %actor, capability = %capability, "denied: not a member");
                Err(LnkError::Forbidden(
                    "you are not a member of this tenant".into(),
                ))
            }
            Decision::Deny(DenyReason::PermissionDenied) => {
                tracing::warn!(tenant_id = %tenant_id, actor = %actor, capability = %capability, "denied: missing capability");
                Err(LnkError::PermissionDenied { capability })
            }
        }
    }

    /// Any active membership is enough; used for read-only views.
    pub async fn require_member(&self, tenant_id: TenantId, actor: Actor) -> LnkResult<()> {
        let Actor::User(user_id) = actor else {
            return Ok(());
        };

        match self.members.find_membership(tenant_id, user_id).await? {
            Some(m) if m.is_active() => Ok(()),
            _ => {
                tracing::warn!(tenant_id = %tenant_id, actor = %actor, "denied: not a member");
                Err(LnkError::Forbidden(
                    "you are not a member of this tenant".into(),
                ))
            }
        }
    }
}

fn decide(membership: Option<&Membership>, capability: Capability) -> Decision {
    match membership {
        Some(m) if m.is_active() => {
            if role_allows(m.role, &m.permissions, capability) {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::PermissionDenied)
            }
        }
        _ => Decision::Deny(DenyReason::NotAMember),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lnk_shared::{MemberId, MemberStatus, UserId};
    use time::OffsetDateTime;

    fn membership(role: MemberRole, permissions: PermissionSet) -> Membership {
        let now = OffsetDateTime::now_utc();
        Membership {
            id: MemberId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            email: None,
            role,
            permissions,
            status: MemberStatus::Active,
            invited_by: None,
            invited_at: None,
            joined_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_owner_allowed_everything() {
        for cap in Capability::ALL {
            assert!(role_allows(MemberRole::Owner, &PermissionSet::none(), cap));
        }
    }

    #[test]
    fn test_admin_denied_owner_only() {
        let perms = PermissionSet::none();
        assert!(role_allows(MemberRole::Admin, &perms, Capability::TenantUpdate));
        assert!(role_allows(MemberRole::Admin, &perms, Capability::MembersInvite));
        assert!(!role_allows(MemberRole::Admin, &perms, Capability::TenantDelete));
        assert!(!role_allows(MemberRole::Admin, &perms, Capability::OwnershipTransfer));
    }

    #[test]
    fn test_member_needs_explicit_or_wildcard() {
        let read_only = PermissionSet::of([Capability::LinksRead]);
        assert!(role_allows(MemberRole::Member, &read_only, Capability::LinksRead));
        assert!(!role_allows(MemberRole::Member, &read_only, Capability::LinksWrite));
        assert!(role_allows(MemberRole::Member, &PermissionSet::All, Capability::ApiKeysCreate));
    }

    #[test]
    fn test_removed_member_is_not_a_member() {
        let mut m = membership(MemberRole::Admin, PermissionSet::All);
        m.status = MemberStatus::Removed;
        assert_eq!(
            decide(Some(&m), Capability::LinksRead),
            Decision::Deny(DenyReason::NotAMember)
        );
        assert_eq!(
            decide(None, Capability::LinksRead),
            Decision::Deny(DenyReason::NotAMember)
        );
    }

    #[test]
    fn test_member_without_capability_is_permission_denied() {
        let m = membership(MemberRole::Member, PermissionSet::none());
        assert_eq!(
            decide(Some(&m), Capability::MembersInvite),
            Decision::Deny(DenyReason::PermissionDenied)
        );
    }
}
