//! Shared fixtures for the tenancy integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use lnk_billing::BillingConfig;
use lnk_shared::{MemberRole, MemoryStore, PermissionSet, Tenant, UserId};
use lnk_tenancy::{AppState, Config, CreateInvitationParams, CreateTenantParams};

pub const TEST_SECRET: &str = "integration-test-hmac-secret-0123456789";

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
    let (state, store) = AppState::in_memory(Config::for_secret(TEST_SECRET), BillingConfig::default());
    Harness { state, store }
}

pub fn params(name: &str) -> CreateTenantParams {
    CreateTenantParams {
        name: name.to_string(),
        ..Default::default()
    }
}

impl Harness {
    /// Create a tenant with a fresh owner
    pub async fn tenant(&self, name: &str) -> (Tenant, UserId) {
        let owner = UserId::new();
        let tenant = self
            .state
            .tenants
            .create(params(name), owner)
            .await
            .expect("create tenant");
        (tenant, owner)
    }

    /// Invite a fresh user and accept on their behalf
    pub async fn join(
        &self,
        tenant: &Tenant,
        inviter: UserId,
        role: MemberRole,
        permissions: PermissionSet,
    ) -> UserId {
        let user = UserId::new();
        let invitation = self
            .state
            .invitations
            .create_invitation(
                tenant.id,
                CreateInvitationParams {
                    email: format!("{}@example.com", user.0.simple()),
                    role,
                    permissions,
                },
                inviter,
            )
            .await
            .expect("create invitation");
        self.state
            .invitations
            .accept_invitation(&invitation.token, user)
            .await
            .expect("accept invitation");
        user
    }
}
