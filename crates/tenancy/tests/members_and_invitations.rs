//! Integration tests for memberships and invitations

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{harness, params};
use lnk_shared::{
    Actor, Capability, InvitationStore, LnkError, MemberRole, MemberStatus, MembershipStore,
    PermissionSet, UserId,
};
use lnk_tenancy::{CreateInvitationParams, CreateTenantParams, MAX_BULK_INVITES};
use time::{Duration, OffsetDateTime};

fn invite(email: &str, role: MemberRole, permissions: PermissionSet) -> CreateInvitationParams {
    CreateInvitationParams {
        email: email.to_string(),
        role,
        permissions,
    }
}

// ============================================================================
// Invitations
// ============================================================================

#[tokio::test]
async fn test_invite_and_accept() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let bob = UserId::new();

    let invitation = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite(
                "bob@x.com",
                MemberRole::Member,
                PermissionSet::of([Capability::LinksRead]),
            ),
            owner,
        )
        .await
        .unwrap();

    let ttl = invitation.expires_at - invitation.created_at;
    assert_eq!(ttl, Duration::days(7));
    assert!(!invitation.token.is_empty());

    let membership = h
        .state
        .invitations
        .accept_invitation(&invitation.token, bob)
        .await
        .unwrap();
    assert_eq!(membership.user_id, bob);
    assert_eq!(membership.role, MemberRole::Member);
    assert_eq!(
        membership.permissions.to_strings(),
        vec!["links:read".to_string()]
    );
    assert_eq!(membership.status, MemberStatus::Active);
    assert_eq!(membership.email.as_deref(), Some("bob@x.com"));
    assert!(membership.joined_at.is_some());

    let stored = h
        .store
        .get_invitation(tenant.id, invitation.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.accepted_at.is_some());

    // Single use
    let err = h
        .state
        .invitations
        .accept_invitation(&invitation.token, UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));

    let actions: Vec<String> = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(owner), None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec!["invitation.accepted", "invitation.created", "tenant.created"]
    );
}

#[tokio::test]
async fn test_expired_invitation_cannot_be_accepted() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let invitation = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("late@x.com", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap();
    h.store
        .refresh_invitation(
            tenant.id,
            invitation.id,
            &invitation.token,
            OffsetDateTime::now_utc() - Duration::seconds(1),
        )
        .await
        .unwrap();

    let latecomer = UserId::new();
    let err = h
        .state
        .invitations
        .accept_invitation(&invitation.token, latecomer)
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    assert!(h
        .store
        .find_membership(tenant.id, latecomer)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.store.list_members(tenant.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resend_refreshes_expired_invitation() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let invitation = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("late@x.com", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap();

    // A live invitation is resent as-is
    let same = h
        .state
        .invitations
        .resend_invitation(tenant.id, invitation.id, Actor::User(owner))
        .await
        .unwrap();
    assert_eq!(same.token, invitation.token);

    h.store
        .refresh_invitation(
            tenant.id,
            invitation.id,
            &invitation.token,
            OffsetDateTime::now_utc() - Duration::hours(1),
        )
        .await
        .unwrap();

    let refreshed = h
        .state
        .invitations
        .resend_invitation(tenant.id, invitation.id, Actor::User(owner))
        .await
        .unwrap();
    assert_ne!(refreshed.token, invitation.token);
    assert!(refreshed.expires_at > OffsetDateTime::now_utc() + Duration::days(6));

    let err = h
        .state
        .invitations
        .accept_invitation(&invitation.token, UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));

    let user = UserId::new();
    h.state
        .invitations
        .accept_invitation(&refreshed.token, user)
        .await
        .unwrap();

    let err = h
        .state
        .invitations
        .resend_invitation(tenant.id, invitation.id, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));
}

#[tokio::test]
async fn test_duplicate_invitations_conflict() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let invitation = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("Bob@X.com ", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap();
    assert_eq!(invitation.email, "bob@x.com");

    let err = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("bob@x.com", MemberRole::Admin, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Conflict(_)));

    // Once bob is a member, inviting the same address again still conflicts
    h.state
        .invitations
        .accept_invitation(&invitation.token, UserId::new())
        .await
        .unwrap();
    let err = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("bob@x.com", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Conflict(_)));
}

#[tokio::test]
async fn test_owner_email_cannot_be_invited() {
    let h = harness();
    let owner = UserId::new();
    let tenant = h
        .state
        .tenants
        .create(
            CreateTenantParams {
                owner_email: Some(" Owner@Acme.io".into()),
                ..params("Acme")
            },
            owner,
        )
        .await
        .unwrap();

    let membership = h
        .store
        .find_membership(tenant.id, owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.email.as_deref(), Some("owner@acme.io"));

    let err = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("OWNER@acme.io", MemberRole::Admin, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Conflict(_)));

    let err = h
        .state
        .tenants
        .create(
            CreateTenantParams {
                owner_email: Some("not-an-email".into()),
                ..params("Globex")
            },
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invitations_for_same_email() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let invitations = h.state.invitations.clone();
            let tenant_id = tenant.id;
            tokio::spawn(async move {
                invitations
                    .create_invitation(
                        tenant_id,
                        invite("race@x.com", MemberRole::Member, PermissionSet::none()),
                        owner,
                    )
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, LnkError::Conflict(_)), "{e}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn test_invitation_validation() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let err = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("boss@x.com", MemberRole::Owner, PermissionSet::All),
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let err = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("not-an-email", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let err = h
        .state
        .invitations
        .accept_invitation("garbage", UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));
}

#[tokio::test]
async fn test_invite_requires_capability() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let member = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;
    let inviter = h
        .join(
            &tenant,
            owner,
            MemberRole::Member,
            PermissionSet::of([Capability::MembersInvite]),
        )
        .await;

    let err = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("x@x.com", MemberRole::Member, PermissionSet::none()),
            member,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::MembersInvite
        }
    ));

    let invitation = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("x@x.com", MemberRole::Member, PermissionSet::none()),
            inviter,
        )
        .await
        .unwrap();
    assert_eq!(invitation.invited_by, inviter);
}

#[tokio::test]
async fn test_cancel_invitation() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let invitation = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("gone@x.com", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap();
    assert_eq!(
        h.state
            .invitations
            .list_invitations(tenant.id, Actor::User(owner))
            .await
            .unwrap()
            .len(),
        1
    );

    h.state
        .invitations
        .cancel_invitation(tenant.id, invitation.id, Actor::User(owner))
        .await
        .unwrap();

    assert!(h
        .state
        .invitations
        .list_invitations(tenant.id, Actor::User(owner))
        .await
        .unwrap()
        .is_empty());

    let err = h
        .state
        .invitations
        .accept_invitation(&invitation.token, UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));

    let err = h
        .state
        .invitations
        .cancel_invitation(tenant.id, invitation.id, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));
}

#[tokio::test]
async fn test_bulk_invite_reports_each_address() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    let outcomes = h
        .state
        .invitations
        .bulk_invite(
            tenant.id,
            vec![
                invite("ann@example.com", MemberRole::Member, PermissionSet::none()),
                invite("not-an-email", MemberRole::Member, PermissionSet::none()),
                invite("ANN@example.com", MemberRole::Admin, PermissionSet::none()),
                invite("bob@example.com", MemberRole::Admin, PermissionSet::none()),
                invite("cat@example.com", MemberRole::Owner, PermissionSet::none()),
            ],
            owner,
        )
        .await
        .unwrap();

    let emails: Vec<_> = outcomes.iter().map(|o| o.email.as_str()).collect();
    assert_eq!(
        emails,
        [
            "ann@example.com",
            "not-an-email",
            "ANN@example.com",
            "bob@example.com",
            "cat@example.com"
        ]
    );
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(LnkError::BadRequest(_))));
    assert!(matches!(outcomes[2].result, Err(LnkError::Conflict(_))));
    assert_eq!(
        outcomes[3].result.as_ref().unwrap().role,
        MemberRole::Admin
    );
    assert!(matches!(outcomes[4].result, Err(LnkError::BadRequest(_))));

    let pending = h
        .state
        .invitations
        .list_invitations(tenant.id, Actor::User(owner))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let logs = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(owner), None)
        .await
        .unwrap();
    let created = logs
        .iter()
        .filter(|e| e.action == "invitation.created")
        .count();
    assert_eq!(created, 2);

    // Accepting one of the batch works like a single invitation
    let token = &outcomes[3].result.as_ref().unwrap().token;
    let membership = h
        .state
        .invitations
        .accept_invitation(token, UserId::new())
        .await
        .unwrap();
    assert_eq!(membership.role, MemberRole::Admin);
}

#[tokio::test]
async fn test_bulk_invite_checks_capability_and_batch_size() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let member = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;

    let err = h
        .state
        .invitations
        .bulk_invite(
            tenant.id,
            vec![invite("x@example.com", MemberRole::Member, PermissionSet::none())],
            member,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::MembersInvite
        }
    ));

    let err = h
        .state
        .invitations
        .bulk_invite(tenant.id, vec![], owner)
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let oversized = (0..=MAX_BULK_INVITES)
        .map(|i| invite(&format!("user{i}@example.com"), MemberRole::Member, PermissionSet::none()))
        .collect();
    let err = h
        .state
        .invitations
        .bulk_invite(tenant.id, oversized, owner)
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    // Nothing was created by the rejected batches
    let pending = h
        .state
        .invitations
        .list_invitations(tenant.id, Actor::User(owner))
        .await
        .unwrap();
    assert!(pending.is_empty());
}

// ============================================================================
// Members
// ============================================================================

#[tokio::test]
async fn test_get_member() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let user = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;
    let reader = h
        .join(
            &tenant,
            owner,
            MemberRole::Member,
            PermissionSet::of([Capability::MembersRead]),
        )
        .await;
    let member = h
        .store
        .find_membership(tenant.id, user)
        .await
        .unwrap()
        .unwrap();

    let found = h
        .state
        .members
        .get_member(tenant.id, member.id, Actor::User(reader))
        .await
        .unwrap();
    assert_eq!(found.user_id, user);
    assert_eq!(found.role, MemberRole::Member);

    let err = h
        .state
        .members
        .get_member(tenant.id, member.id, Actor::User(user))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::MembersRead
        }
    ));

    // Another tenant's member id does not resolve here
    let (other, other_owner) = h.tenant("Globex").await;
    let err = h
        .state
        .members
        .get_member(other.id, member.id, Actor::User(other_owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));

    // Removed members are gone
    h.state
        .members
        .remove_member(tenant.id, member.id, Actor::User(owner))
        .await
        .unwrap();
    let err = h
        .state
        .members
        .get_member(tenant.id, member.id, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));
}

#[tokio::test]
async fn test_owner_membership_is_immutable() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let admin = h
        .join(&tenant, owner, MemberRole::Admin, PermissionSet::none())
        .await;
    let owner_member = h
        .store
        .find_membership(tenant.id, owner)
        .await
        .unwrap()
        .unwrap();

    for actor in [Actor::User(admin), Actor::User(owner), Actor::System] {
        let err = h
            .state
            .members
            .update_member_role(
                tenant.id,
                owner_member.id,
                MemberRole::Member,
                PermissionSet::none(),
                actor,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LnkError::BadRequest(_)));

        let err = h
            .state
            .members
            .remove_member(tenant.id, owner_member.id, actor)
            .await
            .unwrap_err();
        assert!(matches!(err, LnkError::BadRequest(_)));
    }

    // Re-asserting the owner role is a no-op
    let same = h
        .state
        .members
        .update_member_role(
            tenant.id,
            owner_member.id,
            MemberRole::Owner,
            PermissionSet::none(),
            Actor::User(owner),
        )
        .await
        .unwrap();
    assert_eq!(same.role, MemberRole::Owner);
    assert_eq!(same.updated_at, owner_member.updated_at);

    let err = h.state.members.leave(tenant.id, owner).await.unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let members = h.store.list_members(tenant.id).await.unwrap();
    let owners: Vec<_> = members
        .iter()
        .filter(|m| m.role == MemberRole::Owner)
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].user_id, owner);
    assert!(owners[0].is_active());
}

#[tokio::test]
async fn test_update_role_and_remove() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let user = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;
    let member = h
        .store
        .find_membership(tenant.id, user)
        .await
        .unwrap()
        .unwrap();

    let err = h
        .state
        .members
        .update_member_role(
            tenant.id,
            member.id,
            MemberRole::Owner,
            PermissionSet::All,
            Actor::User(owner),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let updated = h
        .state
        .members
        .update_member_role(
            tenant.id,
            member.id,
            MemberRole::Admin,
            PermissionSet::none(),
            Actor::User(owner),
        )
        .await
        .unwrap();
    assert_eq!(updated.role, MemberRole::Admin);

    // Now an admin, the user can manage members
    assert_eq!(
        h.state
            .members
            .list_members(tenant.id, Actor::User(user))
            .await
            .unwrap()
            .len(),
        2
    );

    h.state
        .members
        .remove_member(tenant.id, member.id, Actor::User(owner))
        .await
        .unwrap();
    let removed = h
        .store
        .find_membership(tenant.id, user)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.status, MemberStatus::Removed);

    let err = h
        .state
        .members
        .list_members(tenant.id, Actor::User(user))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));

    let err = h
        .state
        .members
        .remove_member(tenant.id, member.id, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));
}

#[tokio::test]
async fn test_member_actions_require_capabilities() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let plain = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;
    let owner_member = h
        .store
        .find_membership(tenant.id, owner)
        .await
        .unwrap()
        .unwrap();

    let err = h
        .state
        .members
        .list_members(tenant.id, Actor::User(plain))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::MembersRead
        }
    ));

    let err = h
        .state
        .members
        .remove_member(tenant.id, owner_member.id, Actor::User(plain))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::MembersRemove
        }
    ));
}

#[tokio::test]
async fn test_leave_and_rejoin() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let user = UserId::new();

    let first = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite("carol@x.com", MemberRole::Member, PermissionSet::none()),
            owner,
        )
        .await
        .unwrap();
    h.state
        .invitations
        .accept_invitation(&first.token, user)
        .await
        .unwrap();

    h.state.members.leave(tenant.id, user).await.unwrap();
    let err = h.state.members.leave(tenant.id, user).await.unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));

    // A removed member can be invited back and is reactivated
    let second = h
        .state
        .invitations
        .create_invitation(
            tenant.id,
            invite(
                "carol@x.com",
                MemberRole::Admin,
                PermissionSet::none(),
            ),
            owner,
        )
        .await
        .unwrap();
    let rejoined = h
        .state
        .invitations
        .accept_invitation(&second.token, user)
        .await
        .unwrap();
    assert_eq!(rejoined.role, MemberRole::Admin);
    assert!(rejoined.is_active());

    let logs = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(owner), Some(100))
        .await
        .unwrap();
    let left = logs.iter().find(|e| e.action == "member.left").unwrap();
    assert_eq!(left.actor_id, Some(user));
}

#[tokio::test]
async fn test_audit_log_requires_capability() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let auditor = h
        .join(
            &tenant,
            owner,
            MemberRole::Member,
            PermissionSet::of([Capability::AuditRead]),
        )
        .await;
    let plain = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;

    let logs = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(auditor), Some(2))
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].created_at >= logs[1].created_at);

    let err = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(plain), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::AuditRead
        }
    ));
}
