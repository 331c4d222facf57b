//! Invitations
//!
//! An invitation is a signed, time-boxed, single-use offer to join a tenant.
//! Sending the email is left to the caller; this module only produces the
//! token and expiry a notifier needs.

use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, AuditEntryBuilder, AuditLogger, Capability, Invitation, InvitationId, LnkError,
    LnkResult, MemberId, MemberRole, MemberStatus, Membership, PermissionSet, StoreError,
    TenancyStore, TenantId, UserId,
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::permissions::PermissionEvaluator;
use crate::secrets::SecretSigner;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvitationParams {
    pub email: String,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(default = "PermissionSet::none")]
    pub permissions: PermissionSet,
}

/// Upper bound on one `bulk_invite` batch
pub const MAX_BULK_INVITES: usize = 100;

/// Result for one address of a bulk invite, as submitted
#[derive(Debug)]
pub struct BulkInviteOutcome {
    pub email: String,
    pub result: LnkResult<Invitation>,
}

#[derive(Clone)]
pub struct InvitationManager {
    store: Arc<dyn TenancyStore>,
    permissions: PermissionEvaluator,
    audit: AuditLogger,
    signer: SecretSigner,
    expiry: Duration,
}

impl InvitationManager {
    pub fn new(
        store: Arc<dyn TenancyStore>,
        permissions: PermissionEvaluator,
        audit: AuditLogger,
        signer: SecretSigner,
        expiry_days: i64,
    ) -> Self {
        Self {
            store,
            permissions,
            audit,
            signer,
            expiry: Duration::days(expiry_days),
        }
    }

    /// Invite `params.email` to the tenant on behalf of `inviter_id`.
    ///
    /// The returned invitation carries the token; it is not serialised, so
    /// hand it to the notifier directly.
    pub async fn create_invitation(
        &self,
        tenant_id: TenantId,
        params: CreateInvitationParams,
        inviter_id: UserId,
    ) -> LnkResult<Invitation> {
        self.permissions
            .require(tenant_id, Actor::User(inviter_id), Capability::MembersInvite)
            .await?;
        self.invite(tenant_id, params, inviter_id).await
    }

    /// Invite several addresses at once.
    ///
    /// The capability check covers the whole batch. After that each address
    /// is handled on its own, so one duplicate or malformed email does not
    /// stop the rest; the outcomes come back in input order.
    pub async fn bulk_invite(
        &self,
        tenant_id: TenantId,
        invites: Vec<CreateInvitationParams>,
        inviter_id: UserId,
    ) -> LnkResult<Vec<BulkInviteOutcome>> {
        self.permissions
            .require(tenant_id, Actor::User(inviter_id), Capability::MembersInvite)
            .await?;
        if invites.is_empty() {
            return Err(LnkError::BadRequest("no invitations given".into()));
        }
        if invites.len() > MAX_BULK_INVITES {
            return Err(LnkError::BadRequest(format!(
                "at most {} invitations per request",
                MAX_BULK_INVITES
            )));
        }

        let mut outcomes = Vec::with_capacity(invites.len());
        for params in invites {
            let email = params.email.clone();
            let result = self.invite(tenant_id, params, inviter_id).await;
            if let Err(e) = &result {
                tracing::debug!(tenant_id = %tenant_id, error = %e, "bulk invitation skipped");
            }
            outcomes.push(BulkInviteOutcome { email, result });
        }

        let created = outcomes.iter().filter(|o| o.result.is_ok()).count();
        tracing::info!(tenant_id = %tenant_id, requested = outcomes.len(), created, "bulk invitations processed");
        Ok(outcomes)
    }

    async fn invite(
        &self,
        tenant_id: TenantId,
        params: CreateInvitationParams,
        inviter_id: UserId,
    ) -> LnkResult<Invitation> {
        let email = normalize_email(&params.email)?;
        if params.role.is_owner() {
            return Err(LnkError::BadRequest(
                "invitations cannot grant the owner role".into(),
            ));
        }

        if self
            .store
            .has_active_member_with_email(tenant_id, &email)
            .await?
        {
            return Err(LnkError::Conflict(format!(
                "{} is already a member of this tenant",
                email
            )));
        }
        if self
            .store
            .find_pending_invitation_by_email(tenant_id, &email)
            .await?
            .is_some()
        {
            return Err(LnkError::Conflict(format!(
                "an invitation for {} is already pending",
                email
            )));
        }

        let now = OffsetDateTime::now_utc();
        let invitation = Invitation {
            id: InvitationId::new(),
            tenant_id,
            email: email.clone(),
            role: params.role,
            permissions: params.permissions,
            token: self.signer.generate_invitation_token()?,
            invited_by: inviter_id,
            expires_at: now + self.expiry,
            accepted_at: None,
            created_at: now,
        };

        // The pending (tenant, email) constraint settles concurrent invites
        self.store
            .insert_invitation(&invitation)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => LnkError::Conflict(format!(
                    "an invitation for {} is already pending",
                    email
                )),
                other => other.into(),
            })?;

        tracing::info!(tenant_id = %tenant_id, invitation_id = %invitation.id, role = %invitation.role, "invitation created");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::INVITATION_CREATED)
                    .actor(inviter_id)
                    .resource(resource::INVITATION, invitation.id)
                    .details(serde_json::json!({
                        "email": invitation.email,
                        "role": invitation.role,
                        "permissions": invitation.permissions,
                        "expires_at": invitation.expires_at.unix_timestamp(),
                    })),
            )
            .await;

        Ok(invitation)
    }

    /// Redeem a token. Not permission-gated: holding the token is the grant.
    pub async fn accept_invitation(&self, token: &str, user_id: UserId) -> LnkResult<Membership> {
        if !self.signer.verify_invitation_token(token) {
            return Err(LnkError::not_found("invitation"));
        }
        let invitation = self
            .store
            .find_pending_invitation_by_token(token)
            .await?
            .ok_or_else(|| LnkError::not_found("invitation"))?;

        let now = OffsetDateTime::now_utc();
        if invitation.is_expired_at(now) {
            return Err(LnkError::BadRequest("invitation has expired".into()));
        }

        let membership = Membership {
            id: MemberId::new(),
            tenant_id: invitation.tenant_id,
            user_id,
            email: Some(invitation.email.clone()),
            role: invitation.role,
            permissions: invitation.permissions.clone(),
            status: MemberStatus::Active,
            invited_by: Some(invitation.invited_by),
            invited_at: Some(invitation.created_at),
            joined_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let membership = self
            .store
            .accept_invitation(invitation.id, &membership, now)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => {
                    LnkError::Conflict("you are already a member of this tenant".into())
                }
                other => other.into(),
            })?;

        tracing::info!(tenant_id = %invitation.tenant_id, invitation_id = %invitation.id, user_id = %user_id, "invitation accepted");
        self.audit
            .record(
                AuditEntryBuilder::new(invitation.tenant_id, action::INVITATION_ACCEPTED)
                    .actor(user_id)
                    .resource(resource::INVITATION, invitation.id)
                    .details(serde_json::json!({
                        "member_id": membership.id,
                        "email": invitation.email,
                        "role": membership.role,
                    })),
            )
            .await;

        Ok(membership)
    }

    /// Withdraw a pending invitation.
    pub async fn cancel_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
        actor: Actor,
    ) -> LnkResult<()> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersInvite)
            .await?;

        let invitation = self.require_pending(tenant_id, invitation_id).await?;
        self.store.delete_invitation(tenant_id, invitation_id).await?;

        tracing::info!(tenant_id = %tenant_id, invitation_id = %invitation_id, "invitation cancelled");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::INVITATION_CANCELLED)
                    .actor(actor)
                    .resource(resource::INVITATION, invitation_id)
                    .details(serde_json::json!({ "email": invitation.email })),
            )
            .await;

        Ok(())
    }

    /// Pending invitations of the tenant.
    pub async fn list_invitations(&self, tenant_id: TenantId, actor: Actor) -> LnkResult<Vec<Invitation>> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersRead)
            .await?;
        Ok(self.store.list_pending_invitations(tenant_id).await?)
    }

    /// Re-send a pending invitation. An expired one gets a new token and a
    /// fresh expiry; a live one is returned unchanged for the notifier.
    pub async fn resend_invitation(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
        actor: Actor,
    ) -> LnkResult<Invitation> {
        self.permissions
            .require(tenant_id, actor, Capability::MembersInvite)
            .await?;

        let invitation = self
            .store
            .get_invitation(tenant_id, invitation_id)
            .await?
            .ok_or_else(|| LnkError::not_found(format!("invitation {}", invitation_id)))?;
        if !invitation.is_pending() {
            return Err(LnkError::BadRequest(
                "invitation has already been accepted".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let refreshed = invitation.is_expired_at(now);
        let invitation = if refreshed {
            self.store
                .refresh_invitation(
                    tenant_id,
                    invitation_id,
                    &self.signer.generate_invitation_token()?,
                    now + self.expiry,
                )
                .await?
        } else {
            invitation
        };

        tracing::info!(tenant_id = %tenant_id, invitation_id = %invitation_id, refreshed, "invitation resent");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::INVITATION_RESENT)
                    .actor(actor)
                    .resource(resource::INVITATION, invitation_id)
                    .details(serde_json::json!({
                        "email": invitation.email,
                        "refreshed": refreshed,
                        "expires_at": invitation.expires_at.unix_timestamp(),
                    })),
            )
            .await;

        Ok(invitation)
    }

    async fn require_pending(
        &self,
        tenant_id: TenantId,
        invitation_id: InvitationId,
    ) -> LnkResult<Invitation> {
        match self.store.get_invitation(tenant_id, invitation_id).await? {
            Some(i) if i.is_pending() => Ok(i),
            _ => Err(LnkError::not_found(format!("invitation {}", invitation_id))),
        }
    }
}

/// Trim, lower-case and sanity-check an address.
pub fn normalize_email(email: &str) -> LnkResult<String> {
    let email = email.trim().to_lowercase();
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(LnkError::BadRequest(format!(
            "'{}' is not a valid email address",
            email
        )))
    }
}

fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 {
        return false;
    }
    if domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }

    !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Bob@X.com ").ok().as_deref(), Some("bob@x.com"));
        assert!(normalize_email("bob").is_err());
        assert!(normalize_email("@x.com").is_err());
        assert!(normalize_email("bob@x").is_err());
        assert!(normalize_email("bob@@x.com").is_err());
        assert!(normalize_email("bob@.com").is_err());
        assert!(normalize_email("b ob@x.com").is_err());
        assert!(normalize_email(&format!("{}@x.com", "a".repeat(65))).is_err());
    }
}
