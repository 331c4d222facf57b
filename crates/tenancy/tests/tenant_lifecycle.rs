//! Integration tests for tenant creation, updates, ownership and deletion

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::{harness, params};
use lnk_shared::{
    Actor, AuditLogEntry, AuditLogger, AuditSink, Branding, Capability, LnkError, MemberRole,
    MembershipStore, MemoryStore, PermissionSet, StoreError, StoreResult, TenantFeatures,
    TenantId, TenantStatus, TenantStore, UserId,
};
use lnk_tenancy::{CreateTenantParams, PermissionEvaluator, TenantManager, UpdateTenantParams};

// ============================================================================
// Slugs
// ============================================================================

#[tokio::test]
async fn test_duplicate_names_get_numbered_slugs() {
    let h = harness();

    let (first, _) = h.tenant("Acme").await;
    let (second, _) = h.tenant("Acme").await;
    let (third, _) = h.tenant("ACME").await;

    assert_eq!(first.slug, "acme");
    assert_eq!(second.slug, "acme-1");
    assert_eq!(third.slug, "acme-2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation_never_shares_a_slug() {
    let h = harness();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let tenants = h.state.tenants.clone();
            tokio::spawn(async move { tenants.create(params("Acme Corp"), UserId::new()).await })
        })
        .collect();

    let mut slugs = HashSet::new();
    for handle in handles {
        let tenant = handle.await.unwrap().unwrap();
        assert!(slugs.insert(tenant.slug), "slug handed out twice");
    }

    let expected: HashSet<String> = std::iter::once("acme-corp".to_string())
        .chain((1..12).map(|i| format!("acme-corp-{}", i)))
        .collect();
    assert_eq!(slugs, expected);
}

#[tokio::test]
async fn test_explicit_slug() {
    let h = harness();
    let owner = UserId::new();

    let tenant = h
        .state
        .tenants
        .create(
            CreateTenantParams {
                name: "Whatever".into(),
                slug: Some("go".into()),
                ..Default::default()
            },
            owner,
        )
        .await
        .unwrap();
    assert_eq!(tenant.slug, "go");

    let taken = h
        .state
        .tenants
        .create(
            CreateTenantParams {
                name: "Other".into(),
                slug: Some("go".into()),
                ..Default::default()
            },
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(taken, LnkError::Conflict(_)));

    for bad in ["Go", "www", "-go", ""] {
        let err = h
            .state
            .tenants
            .create(
                CreateTenantParams {
                    name: "Other".into(),
                    slug: Some(bad.into()),
                    ..Default::default()
                },
                owner,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LnkError::BadRequest(_)), "{bad}");
    }
}

#[tokio::test]
async fn test_reserved_and_unsluggable_names() {
    let h = harness();
    assert_eq!(h.tenant("API").await.0.slug, "api-tenant");
    assert_eq!(h.tenant("!!!").await.0.slug, "tenant");

    let err = h
        .state
        .tenants
        .create(params("   "), UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));
}

// ============================================================================
// Creation defaults
// ============================================================================

#[tokio::test]
async fn test_create_makes_owner_membership() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    assert_eq!(tenant.status, TenantStatus::Active);
    assert_eq!(tenant.tenant_type, lnk_shared::TenantType::Team);
    assert_eq!(tenant.owner_id, owner);
    assert!(tenant.parent_tenant_id.is_none());

    let membership = h
        .store
        .find_membership(tenant.id, owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.role, MemberRole::Owner);
    assert_eq!(membership.permissions, PermissionSet::All);
    assert!(membership.is_active());

    let mine = h.state.tenants.list_for_user(owner).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, tenant.id);

    let logs = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(owner), None)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "tenant.created");
    assert_eq!(logs[0].actor_id, Some(owner));
}

#[tokio::test]
async fn test_get_requires_membership() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    assert!(h.state.tenants.get(tenant.id, Actor::User(owner)).await.is_ok());
    assert!(h.state.tenants.get(tenant.id, Actor::System).await.is_ok());

    let err = h
        .state
        .tenants
        .get(tenant.id, Actor::User(UserId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));

    let err = h
        .state
        .tenants
        .get(TenantId::new(), Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn test_update_profile_and_slug_conflict() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    h.tenant("Globex").await;

    let updated = h
        .state
        .tenants
        .update(
            tenant.id,
            UpdateTenantParams {
                name: Some("Acme Inc".into()),
                slug: Some("acme-inc".into()),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Acme Inc");
    assert_eq!(updated.slug, "acme-inc");

    let err = h
        .state
        .tenants
        .update(
            tenant.id,
            UpdateTenantParams {
                slug: Some("globex".into()),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Conflict(_)));

    // Setting the current slug again is not a collision
    h.state
        .tenants
        .update(
            tenant.id,
            UpdateTenantParams {
                slug: Some("acme-inc".into()),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();

    let logs = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(owner), None)
        .await
        .unwrap();
    // Newest first: the slug change, then the profile update
    let updates: Vec<_> = logs
        .iter()
        .filter(|e| e.action == "tenant.updated")
        .collect();
    assert_eq!(updates.len(), 2);
    let latest = updates[0].details.as_ref().unwrap();
    assert_eq!(latest["slug"], "acme-inc");
    let first = updates[1].details.as_ref().unwrap();
    assert_eq!(first["name"], "Acme Inc");
}

#[tokio::test]
async fn test_update_permissions() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let admin = h
        .join(&tenant, owner, MemberRole::Admin, PermissionSet::none())
        .await;
    let member = h
        .join(&tenant, owner, MemberRole::Member, PermissionSet::none())
        .await;
    let patch = UpdateTenantParams {
        name: Some("Renamed".into()),
        ..Default::default()
    };

    h.state
        .tenants
        .update(tenant.id, patch.clone(), Actor::User(admin))
        .await
        .unwrap();

    let err = h
        .state
        .tenants
        .update(tenant.id, patch.clone(), Actor::User(member))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::TenantUpdate
        }
    ));

    let err = h
        .state
        .tenants
        .update(tenant.id, patch, Actor::User(UserId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));
}

#[tokio::test]
async fn test_branding_is_merged_not_replaced() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    h.state
        .tenants
        .update_branding(
            tenant.id,
            Branding {
                logo_url: Some("https://cdn.example.com/logo.png".into()),
                primary_color: Some("#112233".into()),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();

    let updated = h
        .state
        .tenants
        .update_branding(
            tenant.id,
            Branding {
                primary_color: Some("#445566".into()),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();

    assert_eq!(
        updated.branding.logo_url.as_deref(),
        Some("https://cdn.example.com/logo.png")
    );
    assert_eq!(updated.branding.primary_color.as_deref(), Some("#445566"));

    let logs = h
        .state
        .audit_logs
        .list_audit_logs(tenant.id, Actor::User(owner), None)
        .await
        .unwrap();
    assert_eq!(
        logs.iter()
            .filter(|e| e.action == "tenant.branding_updated")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_member_with_explicit_capability_may_update_settings() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let member = h
        .join(
            &tenant,
            owner,
            MemberRole::Member,
            PermissionSet::of([Capability::SettingsUpdate]),
        )
        .await;

    let updated = h
        .state
        .tenants
        .update_settings(
            tenant.id,
            lnk_shared::TenantSettings {
                timezone: Some("Europe/Berlin".into()),
                ..Default::default()
            },
            Actor::User(member),
        )
        .await
        .unwrap();
    assert_eq!(updated.settings.timezone.as_deref(), Some("Europe/Berlin"));

    let err = h
        .state
        .tenants
        .update_features(tenant.id, TenantFeatures::default(), Actor::User(member))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::PermissionDenied { .. }));
}

// ============================================================================
// Sub-tenants
// ============================================================================

#[tokio::test]
async fn test_sub_tenants_require_feature() {
    let h = harness();
    let (parent, owner) = h.tenant("Reseller").await;
    let client_owner = UserId::new();

    let err = h
        .state
        .tenants
        .create_sub_tenant(parent.id, params("Client"), client_owner, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));

    h.state
        .tenants
        .update_features(
            parent.id,
            TenantFeatures {
                sub_accounts: Some(true),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();

    let child = h
        .state
        .tenants
        .create_sub_tenant(parent.id, params("Client"), client_owner, Actor::User(owner))
        .await
        .unwrap();
    assert_eq!(child.parent_tenant_id, Some(parent.id));
    assert_eq!(child.owner_id, client_owner);

    let children = h
        .state
        .tenants
        .list_sub_tenants(parent.id, Actor::User(owner))
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, child.id);

    let parent_log = h
        .state
        .audit_logs
        .list_audit_logs(parent.id, Actor::User(owner), None)
        .await
        .unwrap();
    let entry = parent_log
        .iter()
        .find(|e| e.action == "sub_tenant.created")
        .unwrap();
    assert_eq!(entry.resource_id.as_deref(), Some(child.id.to_string().as_str()));
}

#[tokio::test]
async fn test_sub_tenant_requires_capability() {
    let h = harness();
    let (parent, owner) = h.tenant("Reseller").await;
    h.state
        .tenants
        .update_features(
            parent.id,
            TenantFeatures {
                sub_accounts: Some(true),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();
    let member = h
        .join(&parent, owner, MemberRole::Member, PermissionSet::none())
        .await;

    let err = h
        .state
        .tenants
        .create_sub_tenant(parent.id, params("Client"), member, Actor::User(member))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::SubTenantsCreate
        }
    ));
}

// ============================================================================
// Ownership and deletion
// ============================================================================

#[tokio::test]
async fn test_admin_cannot_delete_tenant() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let admin = h
        .join(&tenant, owner, MemberRole::Admin, PermissionSet::All)
        .await;

    let err = h
        .state
        .tenants
        .delete(tenant.id, Actor::User(admin))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));

    let err = h
        .state
        .tenants
        .delete(tenant.id, Actor::System)
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));

    assert!(h.store.get_tenant(tenant.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_owner_deletes_tenant() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;

    h.state
        .tenants
        .delete(tenant.id, Actor::User(owner))
        .await
        .unwrap();

    assert!(h.store.get_tenant(tenant.id).await.unwrap().is_none());
    assert!(h.store.get_tenant_by_slug("acme").await.unwrap().is_none());
    assert!(h.state.tenants.list_for_user(owner).await.unwrap().is_empty());

    // The slug is free again
    assert_eq!(h.tenant("Acme").await.0.slug, "acme");

    let err = h
        .state
        .tenants
        .delete(tenant.id, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::NotFound(_)));
}

#[tokio::test]
async fn test_transfer_ownership() {
    let h = harness();
    let (tenant, owner) = h.tenant("Acme").await;
    let admin = h
        .join(&tenant, owner, MemberRole::Admin, PermissionSet::none())
        .await;

    // Admins do not get owner-only capabilities
    let err = h
        .state
        .tenants
        .transfer_ownership(tenant.id, admin, Actor::User(admin))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LnkError::PermissionDenied {
            capability: Capability::OwnershipTransfer
        }
    ));

    let err = h
        .state
        .tenants
        .transfer_ownership(tenant.id, UserId::new(), Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let err = h
        .state
        .tenants
        .transfer_ownership(tenant.id, owner, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::BadRequest(_)));

    let updated = h
        .state
        .tenants
        .transfer_ownership(tenant.id, admin, Actor::User(owner))
        .await
        .unwrap();
    assert_eq!(updated.owner_id, admin);

    let new_owner = h.store.find_membership(tenant.id, admin).await.unwrap().unwrap();
    let old_owner = h.store.find_membership(tenant.id, owner).await.unwrap().unwrap();
    assert_eq!(new_owner.role, MemberRole::Owner);
    assert_eq!(new_owner.permissions, PermissionSet::All);
    assert_eq!(old_owner.role, MemberRole::Admin);

    let err = h
        .state
        .tenants
        .delete(tenant.id, Actor::User(owner))
        .await
        .unwrap_err();
    assert!(matches!(err, LnkError::Forbidden(_)));
    h.state
        .tenants
        .delete(tenant.id, Actor::User(admin))
        .await
        .unwrap();
}

// ============================================================================
// Audit log durability
// ============================================================================

struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn append(&self, _entry: &AuditLogEntry) -> StoreResult<()> {
        Err(StoreError::Backend("audit table unavailable".into()))
    }

    async fn list_audit_entries(
        &self,
        _tenant_id: TenantId,
        _limit: i64,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_the_operation() {
    let store = Arc::new(MemoryStore::new());
    let tenants = TenantManager::new(
        store.clone(),
        PermissionEvaluator::new(store.clone()),
        AuditLogger::new(Arc::new(FailingSink)),
    );
    let owner = UserId::new();

    let tenant = tenants.create(params("Acme"), owner).await.unwrap();
    let updated = tenants
        .update(
            tenant.id,
            UpdateTenantParams {
                name: Some("Acme 2".into()),
                ..Default::default()
            },
            Actor::User(owner),
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Acme 2");

    tenants.delete(tenant.id, Actor::User(owner)).await.unwrap();
    assert!(store.get_tenant(tenant.id).await.unwrap().is_none());
}
