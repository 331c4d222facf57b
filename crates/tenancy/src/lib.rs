//! lnk Tenancy
//!
//! Tenant lifecycle, membership, invitations, API keys and the permission
//! evaluator that gates them. Every mutating operation takes the acting
//! [`Actor`](lnk_shared::Actor), checks it against the tenant's memberships
//! and writes an audit entry once the change is stored.

pub mod api_keys;
pub mod audit_logs;
pub mod config;
pub mod invitations;
pub mod members;
pub mod permissions;
pub mod secrets;
pub mod slug;
pub mod state;
pub mod tenants;

pub use api_keys::{ApiKeyManager, CreateApiKeyParams, IssuedApiKey};
pub use audit_logs::AuditLogReader;
pub use config::{Config, ConfigError, LogFormat};
pub use invitations::{
    BulkInviteOutcome, CreateInvitationParams, InvitationManager, MAX_BULK_INVITES,
};
pub use members::MemberManager;
pub use permissions::{role_allows, Decision, DenyReason, PermissionEvaluator};
pub use secrets::{SecretError, SecretSigner};
pub use state::AppState;
pub use tenants::{CreateTenantParams, TenantManager, UpdateTenantParams};
