//! Tenant lifecycle
//!
//! Creation, profile updates, attribute merges, sub-tenants, ownership
//! transfer and deletion. Slug uniqueness is enforced by the store; the
//! lookup before each insert only avoids a round of failed inserts in the
//! common case.

use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, AuditEntryBuilder, AuditLogger, BillingSummary, Branding, Capability, DomainConfig,
    LnkError, LnkResult, MemberId, MemberRole, MemberStatus, Membership, PermissionSet, Plan,
    StoreError, TenancyStore, Tenant, TenantFeatures, TenantId, TenantSettings, TenantStatus,
    TenantType, UserId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::invitations::normalize_email;
use crate::permissions::PermissionEvaluator;
use crate::slug::{slugify, validate_slug, with_suffix};

const MAX_NAME_LEN: usize = 100;
/// Upper bound on numeric suffixes tried for one base slug
const MAX_SLUG_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTenantParams {
    pub name: String,
    /// Exact slug to claim; derived from `name` when absent
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub tenant_type: Option<TenantType>,
    #[serde(default)]
    pub branding: Option<Branding>,
    #[serde(default)]
    pub settings: Option<TenantSettings>,
    #[serde(default)]
    pub features: Option<TenantFeatures>,
    /// Recorded on the owner's membership so invitations to this address
    /// are refused as already a member
    #[serde(default)]
    pub owner_email: Option<String>,
}

/// Profile patch. Ownership is not part of it; see
/// [`TenantManager::transfer_ownership`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTenantParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TenantStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_type: Option<TenantType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainConfig>,
}

#[derive(Clone)]
pub struct TenantManager {
    store: Arc<dyn TenancyStore>,
    permissions: PermissionEvaluator,
    audit: AuditLogger,
}

impl TenantManager {
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

    /// Create a tenant owned by `owner_id`.
    ///
    /// A derived slug gets `-1`, `-2`, ... appended until one is free. An
    /// explicit slug that is taken fails with `Conflict`.
    pub async fn create(&self, params: CreateTenantParams, owner_id: UserId) -> LnkResult<Tenant> {
        let tenant = self.insert_with_unique_slug(params, owner_id, None).await?;

        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, owner_id = %owner_id, "tenant created");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant.id, action::TENANT_CREATED)
                    .actor(owner_id)
                    .resource(resource::TENANT, tenant.id)
                    .details(serde_json::json!({
                        "name": tenant.name,
                        "slug": tenant.slug,
                        "parent_tenant_id": tenant.parent_tenant_id,
                    })),
            )
            .await;

        Ok(tenant)
    }

    /// Create a reseller sub-account under `parent_id`.
    pub async fn create_sub_tenant(
        &self,
        parent_id: TenantId,
        params: CreateTenantParams,
        owner_id: UserId,
        actor: Actor,
    ) -> LnkResult<Tenant> {
        let parent = self.require_tenant(parent_id).await?;
        self.permissions
            .require(parent_id, actor, Capability::SubTenantsCreate)
            .await?;
        if !parent.features.sub_accounts_enabled() {
            return Err(LnkError::Forbidden(
                "sub-accounts are not enabled for this tenant".into(),
            ));
        }

        let child = self
            .insert_with_unique_slug(params, owner_id, Some(parent_id))
            .await?;

        tracing::info!(parent_id = %parent_id, tenant_id = %child.id, slug = %child.slug, "sub-tenant created");
        self.audit
            .record(
                AuditEntryBuilder::new(child.id, action::TENANT_CREATED)
                    .actor(owner_id)
                    .resource(resource::TENANT, child.id)
                    .details(serde_json::json!({
                        "name": child.name,
                        "slug": child.slug,
                        "parent_tenant_id": parent_id,
                    })),
            )
            .await;
        self.audit
            .record(
                AuditEntryBuilder::new(parent_id, action::SUB_TENANT_CREATED)
                    .actor(actor)
                    .resource(resource::TENANT, child.id)
                    .details(serde_json::json!({
                        "slug": child.slug,
                        "owner_id": owner_id,
                    })),
            )
            .await;

        Ok(child)
    }

    /// Read a tenant; any active member may.
    pub async fn get(&self, tenant_id: TenantId, actor: Actor) -> LnkResult<Tenant> {
        let tenant = self.require_tenant(tenant_id).await?;
        self.permissions.require_member(tenant_id, actor).await?;
        Ok(tenant)
    }

    /// Tenants where the user holds an active membership.
    pub async fn list_for_user(&self, user_id: UserId) -> LnkResult<Vec<Tenant>> {
        Ok(self.store.list_tenants_for_user(user_id).await?)
    }

    pub async fn list_sub_tenants(&self, parent_id: TenantId, actor: Actor) -> LnkResult<Vec<Tenant>> {
        self.require_tenant(parent_id).await?;
        self.permissions.require_member(parent_id, actor).await?;
        Ok(self.store.list_sub_tenants(parent_id).await?)
    }

    pub async fn update(
        &self,
        tenant_id: TenantId,
        patch: UpdateTenantParams,
        actor: Actor,
    ) -> LnkResult<Tenant> {
        let mut tenant = self.require_tenant(tenant_id).await?;
        self.permissions
            .require(tenant_id, actor, Capability::TenantUpdate)
            .await?;

        if let Some(name) = &patch.name {
            tenant.name = validate_name(name)?;
        }
        if let Some(slug) = &patch.slug {
            if *slug != tenant.slug {
                validate_slug(slug)?;
                if self.store.get_tenant_by_slug(slug).await?.is_some() {
                    return Err(slug_conflict(slug));
                }
                tenant.slug = slug.clone();
            }
        }
        if let Some(status) = patch.status {
            tenant.status = status;
        }
        if let Some(tenant_type) = patch.tenant_type {
            tenant.tenant_type = tenant_type;
        }
        if let Some(domain) = patch.domain.clone() {
            tenant.domain.merge(domain);
        }
        tenant.updated_at = OffsetDateTime::now_utc();

        let updated = self
            .store
            .update_tenant(&tenant)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(ref c) if c.contains("slug") => {
                    slug_conflict(&tenant.slug)
                }
                other => other.into(),
            })?;

        tracing::info!(tenant_id = %tenant_id, "tenant updated");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::TENANT_UPDATED)
                    .actor(actor)
                    .resource(resource::TENANT, tenant_id)
                    .details(serde_json::to_value(&patch).unwrap_or_default()),
            )
            .await;

        Ok(updated)
    }

    /// Delete a tenant and everything scoped to it.
    ///
    /// Only the user recorded as `owner_id` may do this. Holding the owner
    /// role through some other path, or being the system actor, is not enough.
    pub async fn delete(&self, tenant_id: TenantId, actor: Actor) -> LnkResult<()> {
        let tenant = self.require_tenant(tenant_id).await?;
        if !actor.is_user(tenant.owner_id) {
            tracing::warn!(tenant_id = %tenant_id, actor = %actor, "tenant delete denied: not the owner");
            return Err(LnkError::Forbidden(
                "only the tenant owner can delete the tenant".into(),
            ));
        }

        self.store.delete_tenant(tenant_id).await?;

        tracing::info!(tenant_id = %tenant_id, slug = %tenant.slug, "tenant deleted");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::TENANT_DELETED)
                    .actor(actor)
                    .resource(resource::TENANT, tenant_id)
                    .details(serde_json::json!({
                        "name": tenant.name,
                        "slug": tenant.slug,
                    })),
            )
            .await;

        Ok(())
    }

    pub async fn update_branding(
        &self,
        tenant_id: TenantId,
        patch: Branding,
        actor: Actor,
    ) -> LnkResult<Tenant> {
        let details = serde_json::to_value(&patch).unwrap_or_default();
        self.merge_attribute(
            tenant_id,
            actor,
            Capability::BrandingUpdate,
            action::BRANDING_UPDATED,
            details,
            |t| t.branding.merge(patch),
        )
        .await
    }

    pub async fn update_settings(
        &self,
        tenant_id: TenantId,
        patch: TenantSettings,
        actor: Actor,
    ) -> LnkResult<Tenant> {
        let details = serde_json::to_value(&patch).unwrap_or_default();
        self.merge_attribute(
            tenant_id,
            actor,
            Capability::SettingsUpdate,
            action::SETTINGS_UPDATED,
            details,
            |t| t.settings.merge(patch),
        )
        .await
    }

    pub async fn update_features(
        &self,
        tenant_id: TenantId,
        patch: TenantFeatures,
        actor: Actor,
    ) -> LnkResult<Tenant> {
        let details = serde_json::to_value(&patch).unwrap_or_default();
        self.merge_attribute(
            tenant_id,
            actor,
            Capability::FeaturesUpdate,
            action::FEATURES_UPDATED,
            details,
            |t| t.features.merge(patch),
        )
        .await
    }

    /// Hand ownership to another active member. The previous owner stays on
    /// as `admin`.
    pub async fn transfer_ownership(
        &self,
        tenant_id: TenantId,
        new_owner_id: UserId,
        actor: Actor,
    ) -> LnkResult<Tenant> {
        let tenant = self.require_tenant(tenant_id).await?;
        self.permissions
            .require(tenant_id, actor, Capability::OwnershipTransfer)
            .await?;

        if tenant.owner_id == new_owner_id {
            return Err(LnkError::BadRequest(
                "user already owns this tenant".into(),
            ));
        }
        match self.store.find_membership(tenant_id, new_owner_id).await? {
            Some(m) if m.is_active() => {}
            _ => {
                return Err(LnkError::BadRequest(
                    "new owner must be an active member".into(),
                ))
            }
        }

        // The store re-checks the owner, so a concurrent transfer surfaces
        // as BadRequest instead of two owners.
        let updated = self
            .store
            .transfer_ownership(
                tenant_id,
                tenant.owner_id,
                new_owner_id,
                OffsetDateTime::now_utc(),
            )
            .await?;

        tracing::info!(tenant_id = %tenant_id, from = %tenant.owner_id, to = %new_owner_id, "tenant ownership transferred");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::TENANT_OWNERSHIP_TRANSFERRED)
                    .actor(actor)
                    .resource(resource::TENANT, tenant_id)
                    .details(serde_json::json!({
                        "previous_owner_id": tenant.owner_id,
                        "new_owner_id": new_owner_id,
                    })),
            )
            .await;

        Ok(updated)
    }

    async fn merge_attribute(
        &self,
        tenant_id: TenantId,
        actor: Actor,
        capability: Capability,
        audit_action: &'static str,
        details: serde_json::Value,
        apply: impl FnOnce(&mut Tenant),
    ) -> LnkResult<Tenant> {
        let mut tenant = self.require_tenant(tenant_id).await?;
        self.permissions.require(tenant_id, actor, capability).await?;

        apply(&mut tenant);
        tenant.updated_at = OffsetDateTime::now_utc();
        let updated = self.store.update_tenant(&tenant).await?;

        tracing::info!(tenant_id = %tenant_id, action = audit_action, "tenant attributes merged");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, audit_action)
                    .actor(actor)
                    .resource(resource::TENANT, tenant_id)
                    .details(details),
            )
            .await;

        Ok(updated)
    }

    async fn insert_with_unique_slug(
        &self,
        params: CreateTenantParams,
        owner_id: UserId,
        parent_tenant_id: Option<TenantId>,
    ) -> LnkResult<Tenant> {
        let name = validate_name(&params.name)?;
        let owner_email = params.owner_email.as_deref().map(normalize_email).transpose()?;
        let (base, explicit) = match params.slug {
            Some(slug) => {
                validate_slug(&slug)?;
                (slug, true)
            }
            None => (slugify(&name), false),
        };

        let now = OffsetDateTime::now_utc();
        let mut tenant = Tenant {
            id: TenantId::new(),
            name,
            slug: base.clone(),
            status: TenantStatus::Active,
            tenant_type: params.tenant_type.unwrap_or_default(),
            owner_id,
            parent_tenant_id,
            branding: params.branding.unwrap_or_default(),
            domain: DomainConfig::default(),
            settings: params.settings.unwrap_or_default(),
            features: params.features.unwrap_or_default(),
            limits: Plan::Free.limits(),
            billing: BillingSummary::default(),
            trial_ends_at: None,
            created_at: now,
            updated_at: now,
        };
        let owner = Membership {
            id: MemberId::new(),
            tenant_id: tenant.id,
            user_id: owner_id,
            email: owner_email,
            role: MemberRole::Owner,
            permissions: PermissionSet::All,
            status: MemberStatus::Active,
            invited_by: None,
            invited_at: None,
            joined_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        for attempt in 0..MAX_SLUG_ATTEMPTS {
            tenant.slug = with_suffix(&base, attempt);

            if self.store.get_tenant_by_slug(&tenant.slug).await?.is_none() {
                match self.store.insert_tenant(&tenant, &owner).await {
                    Ok(()) => return Ok(tenant),
                    // Lost a race for this slug; try the next suffix
                    Err(StoreError::UniqueViolation(ref c)) if c.contains("slug") => {
                        tracing::debug!(slug = %tenant.slug, "slug claimed concurrently");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if explicit {
                return Err(slug_conflict(&base));
            }
        }

        Err(LnkError::Conflict(format!(
            "no free slug found for '{}'",
            base
        )))
    }

    async fn require_tenant(&self, tenant_id: TenantId) -> LnkResult<Tenant> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| LnkError::not_found(format!("tenant {}", tenant_id)))
    }
}

fn validate_name(name: &str) -> LnkResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LnkError::BadRequest("tenant name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(LnkError::BadRequest(format!(
            "tenant name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn slug_conflict(slug: &str) -> LnkError {
    LnkError::Conflict(format!("slug '{}' is already taken", slug))
}
