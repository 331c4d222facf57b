//! Application state
//!
//! Wires every manager to one store. The store must implement all the
//! persistence traits; `MemoryStore` and `PgStore` both do.

use std::sync::Arc;

use lnk_billing::{BillingConfig, BillingService, TenantQuotaPlanner};
use lnk_shared::{
    create_pool, run_migrations, AuditLogger, AuditSink, BillingStore, MemoryStore, PgStore,
    TenancyStore,
};

use crate::api_keys::ApiKeyManager;
use crate::audit_logs::AuditLogReader;
use crate::config::Config;
use crate::invitations::InvitationManager;
use crate::members::MemberManager;
use crate::permissions::PermissionEvaluator;
use crate::secrets::SecretSigner;
use crate::tenants::TenantManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub permissions: PermissionEvaluator,
    pub tenants: TenantManager,
    pub members: MemberManager,
    pub invitations: InvitationManager,
    pub api_keys: ApiKeyManager,
    pub audit_logs: AuditLogReader,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, config: Config, billing_config: BillingConfig) -> Self
    where
        S: TenancyStore + BillingStore + AuditSink + 'static,
    {
        let audit = AuditLogger::new(store.clone());
        let permissions = PermissionEvaluator::new(store.clone());
        let signer = SecretSigner::new(&config.api_key_hmac_secret);
        let tenancy: Arc<dyn TenancyStore> = store.clone();

        let quota = Arc::new(TenantQuotaPlanner::new(store.clone()));
        let billing = BillingService::new(store, quota, audit.clone(), billing_config);

        Self {
            tenants: TenantManager::new(tenancy.clone(), permissions.clone(), audit.clone()),
            members: MemberManager::new(tenancy.clone(), permissions.clone(), audit.clone()),
            invitations: InvitationManager::new(
                tenancy.clone(),
                permissions.clone(),
                audit.clone(),
                signer.clone(),
                config.invitation_expiry_days,
            ),
            api_keys: ApiKeyManager::new(
                tenancy,
                permissions.clone(),
                audit.clone(),
                signer,
                config.api_key_default_rate_limit,
            ),
            audit_logs: AuditLogReader::new(permissions.clone(), audit),
            billing: Arc::new(billing),
            permissions,
            config,
        }
    }

    /// State backed by a fresh in-memory store. Returns the store as well so
    /// tests can inspect or seed it.
    pub fn in_memory(config: Config, billing_config: BillingConfig) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Self::new(store.clone(), config, billing_config), store)
    }

    /// Connect to Postgres, apply migrations and build the state.
    pub async fn connect(config: Config, billing_config: BillingConfig) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database_url, config.database_max_connections).await?;
        run_migrations(&pool).await?;
        tracing::info!("database migrations applied");

        let store = Arc::new(PgStore::new(pool));
        Ok(Self::new(store, config, billing_config))
    }
}
