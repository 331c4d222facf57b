//! Tenant API keys
//!
//! Only the SHA-256 of a key is persisted. The raw key is returned once, by
//! `create_api_key` or `rotate_api_key`, and cannot be recovered.

use std::net::IpAddr;
use std::sync::Arc;

use lnk_shared::audit::{action, resource};
use lnk_shared::{
    Actor, ApiKey, ApiKeyId, ApiKeyPermission, ApiKeyScope, ApiKeyStatus, AuditEntryBuilder,
    AuditLogger, Capability, LnkError, LnkResult, TenancyStore, Tenant, TenantId, UserId,
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::permissions::PermissionEvaluator;
use crate::secrets::{constant_time_compare, hash_key, SecretSigner};

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateApiKeyParams {
    pub name: String,
    #[serde(default)]
    pub permissions: Option<Vec<ApiKeyPermission>>,
    #[serde(default)]
    pub scopes: Option<Vec<ApiKeyScope>>,
    /// Requests per hour
    #[serde(default)]
    pub rate_limit: Option<i32>,
    #[serde(default)]
    pub ip_allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub expires_at: Option<OffsetDateTime>,
}

/// A stored key together with its one-time raw secret
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub api_key: ApiKey,
    pub raw_key: String,
}

#[derive(Clone)]
pub struct ApiKeyManager {
    store: Arc<dyn TenancyStore>,
    permissions: PermissionEvaluator,
    audit: AuditLogger,
    signer: SecretSigner,
    default_rate_limit: i32,
}

impl ApiKeyManager {
    pub fn new(
        store: Arc<dyn TenancyStore>,
        permissions: PermissionEvaluator,
        audit: AuditLogger,
        signer: SecretSigner,
        default_rate_limit: i32,
    ) -> Self {
        Self {
            store,
            permissions,
            audit,
            signer,
            default_rate_limit,
        }
    }

    pub async fn create_api_key(
        &self,
        tenant_id: TenantId,
        params: CreateApiKeyParams,
        created_by: UserId,
    ) -> LnkResult<IssuedApiKey> {
        self.permissions
            .require(tenant_id, Actor::User(created_by), Capability::ApiKeysCreate)
            .await?;

        let now = OffsetDateTime::now_utc();
        let name = params.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(LnkError::BadRequest(format!(
                "API key name must be 1-{} characters",
                MAX_NAME_LEN
            )));
        }
        let permissions = non_empty(params.permissions, "permissions")?
            .unwrap_or_else(|| vec![ApiKeyPermission::Read]);
        let scopes = non_empty(params.scopes, "scopes")?
            .unwrap_or_else(|| vec![ApiKeyScope::Links, ApiKeyScope::Analytics]);
        let rate_limit = params.rate_limit.unwrap_or(self.default_rate_limit);
        if rate_limit <= 0 {
            return Err(LnkError::BadRequest("rate limit must be positive".into()));
        }
        if let Some(list) = &params.ip_allowlist {
            if let Some(bad) = list.iter().find(|ip| ip.parse::<IpAddr>().is_err()) {
                return Err(LnkError::BadRequest(format!(
                    "'{}' is not an IP address",
                    bad
                )));
            }
        }
        if params.expires_at.is_some_and(|at| at <= now) {
            return Err(LnkError::BadRequest(
                "expiry must be in the future".into(),
            ));
        }

        let generated = self.signer.generate_api_key()?;
        let api_key = ApiKey {
            id: ApiKeyId::new(),
            tenant_id,
            name,
            key_prefix: generated.key_prefix,
            key_hash: generated.key_hash,
            permissions,
            scopes,
            rate_limit,
            ip_allowlist: params.ip_allowlist,
            expires_at: params.expires_at,
            last_used_at: None,
            status: ApiKeyStatus::Active,
            created_by,
            created_at: now,
        };
        self.store.insert_api_key(&api_key).await?;

        tracing::info!(tenant_id = %tenant_id, key_id = %api_key.id, prefix = %api_key.key_prefix, "API key created");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::API_KEY_CREATED)
                    .actor(created_by)
                    .resource(resource::API_KEY, api_key.id)
                    .details(serde_json::json!({
                        "name": api_key.name,
                        "key_prefix": api_key.key_prefix,
                        "permissions": api_key.permissions,
                        "scopes": api_key.scopes,
                    })),
            )
            .await;

        Ok(IssuedApiKey {
            api_key,
            raw_key: generated.full_key,
        })
    }

    pub async fn list_api_keys(&self, tenant_id: TenantId, actor: Actor) -> LnkResult<Vec<ApiKey>> {
        self.permissions
            .require(tenant_id, actor, Capability::ApiKeysRead)
            .await?;
        Ok(self.store.list_api_keys(tenant_id).await?)
    }

    /// Revoke a key. Revoking an already revoked key is a no-op.
    pub async fn revoke_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
        actor: Actor,
    ) -> LnkResult<ApiKey> {
        self.permissions
            .require(tenant_id, actor, Capability::ApiKeysRevoke)
            .await?;

        let existing = self.require_key(tenant_id, key_id).await?;
        if !existing.is_active() {
            return Ok(existing);
        }
        let revoked = self.store.revoke_api_key(tenant_id, key_id).await?;

        tracing::info!(tenant_id = %tenant_id, key_id = %key_id, "API key revoked");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::API_KEY_REVOKED)
                    .actor(actor)
                    .resource(resource::API_KEY, key_id)
                    .details(serde_json::json!({ "key_prefix": revoked.key_prefix })),
            )
            .await;

        Ok(revoked)
    }

    /// Issue a new secret for an existing key. The old secret stops working
    /// immediately.
    pub async fn rotate_api_key(
        &self,
        tenant_id: TenantId,
        key_id: ApiKeyId,
        actor: Actor,
    ) -> LnkResult<IssuedApiKey> {
        self.permissions
            .require(tenant_id, actor, Capability::ApiKeysCreate)
            .await?;

        let previous = self.require_key(tenant_id, key_id).await?;
        if !previous.is_active() {
            return Err(LnkError::BadRequest("revoked keys cannot be rotated".into()));
        }

        let generated = self.signer.generate_api_key()?;
        let api_key = self
            .store
            .rotate_api_key(tenant_id, key_id, &generated.key_hash, &generated.key_prefix)
            .await?;

        tracing::info!(tenant_id = %tenant_id, key_id = %key_id, "API key rotated");
        self.audit
            .record(
                AuditEntryBuilder::new(tenant_id, action::API_KEY_ROTATED)
                    .actor(actor)
                    .resource(resource::API_KEY, key_id)
                    .details(serde_json::json!({
                        "previous_prefix": previous.key_prefix,
                        "key_prefix": api_key.key_prefix,
                    })),
            )
            .await;

        Ok(IssuedApiKey {
            api_key,
            raw_key: generated.full_key,
        })
    }

    /// Authenticate a presented key.
    ///
    /// `Ok(None)` covers every rejection: bad format or signature, unknown
    /// hash, revoked, expired, or a tenant that is not active. Only storage
    /// failures are errors.
    pub async fn validate_api_key(&self, raw_key: &str) -> LnkResult<Option<(Tenant, ApiKey)>> {
        self.validate_api_key_from(raw_key, None).await
    }

    /// Like [`Self::validate_api_key`], also enforcing the key's IP allowlist
    /// against `client_ip` when both are present.
    pub async fn validate_api_key_from(
        &self,
        raw_key: &str,
        client_ip: Option<IpAddr>,
    ) -> LnkResult<Option<(Tenant, ApiKey)>> {
        if !self.signer.verify_api_key(raw_key) {
            tracing::debug!("API key rejected: bad format or signature");
            return Ok(None);
        }

        let presented_hash = hash_key(raw_key);
        let Some(api_key) = self.store.find_api_key_by_hash(&presented_hash).await? else {
            return Ok(None);
        };
        if !constant_time_compare(&api_key.key_hash, &presented_hash) {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        if !api_key.is_active() || api_key.is_expired_at(now) {
            tracing::debug!(key_id = %api_key.id, "API key rejected: revoked or expired");
            return Ok(None);
        }
        if let (Some(allowlist), Some(ip)) = (&api_key.ip_allowlist, client_ip) {
            if !ip_allowed(allowlist, ip) {
                tracing::warn!(key_id = %api_key.id, ip = %ip, "API key rejected: IP not allowlisted");
                return Ok(None);
            }
        }

        let tenant = match self.store.get_tenant(api_key.tenant_id).await? {
            Some(t) if t.is_active() => t,
            _ => {
                tracing::debug!(key_id = %api_key.id, "API key rejected: tenant not active");
                return Ok(None);
            }
        };

        if let Err(e) = self.store.touch_api_key(api_key.id, now).await {
            tracing::warn!(key_id = %api_key.id, error = %e, "failed to record API key use");
        }
        let api_key = ApiKey {
            last_used_at: Some(now),
            ..api_key
        };

        Ok(Some((tenant, api_key)))
    }

    async fn require_key(&self, tenant_id: TenantId, key_id: ApiKeyId) -> LnkResult<ApiKey> {
        self.store
            .get_api_key(tenant_id, key_id)
            .await?
            .ok_or_else(|| LnkError::not_found(format!("API key {}", key_id)))
    }
}

fn non_empty<T>(values: Option<Vec<T>>, field: &str) -> LnkResult<Option<Vec<T>>> {
    match values {
        Some(v) if v.is_empty() => Err(LnkError::BadRequest(format!(
            "{} may not be empty",
            field
        ))),
        other => Ok(other),
    }
}

fn ip_allowed(allowlist: &[String], ip: IpAddr) -> bool {
    allowlist
        .iter()
        .filter_map(|entry| entry.parse::<IpAddr>().ok())
        .any(|allowed| allowed == ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_allowed() {
        let list = vec!["10.0.0.1".to_string(), "::1".to_string(), "junk".to_string()];
        assert!(ip_allowed(&list, "10.0.0.1".parse().unwrap_or(IpAddr::from([0, 0, 0, 0]))));
        assert!(ip_allowed(&list, IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1])));
        assert!(!ip_allowed(&list, IpAddr::from([10, 0, 0, 2])));
    }

    #[test]
    fn test_non_empty() {
        assert!(non_empty::<u8>(Some(vec![]), "scopes").is_err());
        assert!(matches!(non_empty::<u8>(None, "scopes"), Ok(None)));
        assert!(matches!(non_empty(Some(vec![1]), "scopes"), Ok(Some(_))));
    }
}
