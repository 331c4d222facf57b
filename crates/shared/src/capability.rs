//! Tenant capabilities, permission sets and actors
//!
//! Capabilities are a closed set. Permission overrides stored on a membership
//! are parsed into [`Capability`] values up front, so a typo in a permission
//! string is rejected when it is written rather than silently never matching.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::UserId;

/// Wire form of the "every capability" sentinel.
pub const WILDCARD: &str = "*";

/// A named right to perform one category of action within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    // Tenant administration
    TenantUpdate,
    TenantDelete,
    OwnershipTransfer,
    BrandingUpdate,
    SettingsUpdate,
    FeaturesUpdate,
    SubTenantsCreate,

    // Members and invitations
    MembersRead,
    MembersUpdate,
    MembersRemove,
    MembersInvite,

    // Credentials
    ApiKeysRead,
    ApiKeysCreate,
    ApiKeysRevoke,

    // Audit and billing
    AuditRead,
    BillingManage,

    // Link workload
    LinksRead,
    LinksWrite,
    LinksDelete,
    AnalyticsRead,
    CampaignsWrite,
    DomainsManage,
}

impl Capability {
    pub const ALL: [Capability; 22] = [
        Self::TenantUpdate,
        Self::TenantDelete,
        Self::OwnershipTransfer,
        Self::BrandingUpdate,
        Self::SettingsUpdate,
        Self::FeaturesUpdate,
        Self::SubTenantsCreate,
        Self::MembersRead,
        Self::MembersUpdate,
        Self::MembersRemove,
        Self::MembersInvite,
        Self::ApiKeysRead,
        Self::ApiKeysCreate,
        Self::ApiKeysRevoke,
        Self::AuditRead,
        Self::BillingManage,
        Self::LinksRead,
        Self::LinksWrite,
        Self::LinksDelete,
        Self::AnalyticsRead,
        Self::CampaignsWrite,
        Self::DomainsManage,
    ];

    /// Capabilities an `admin` does not get from its role; they stay owner-only.
    pub const OWNER_ONLY: [Capability; 2] = [Self::TenantDelete, Self::OwnershipTransfer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantUpdate => "tenant.update",
            Self::TenantDelete => "tenant.delete",
            Self::OwnershipTransfer => "ownership.transfer",
            Self::BrandingUpdate => "branding.update",
            Self::SettingsUpdate => "settings.update",
            Self::FeaturesUpdate => "features.update",
            Self::SubTenantsCreate => "sub_tenants.create",
            Self::MembersRead => "members.read",
            Self::MembersUpdate => "members.update",
            Self::MembersRemove => "members.remove",
            Self::MembersInvite => "members.invite",
            Self::ApiKeysRead => "api_keys.read",
            Self::ApiKeysCreate => "api_keys.create",
            Self::ApiKeysRevoke => "api_keys.revoke",
            Self::AuditRead => "audit.read",
            Self::BillingManage => "billing.manage",
            Self::LinksRead => "links:read",
            Self::LinksWrite => "links:write",
            Self::LinksDelete => "links:delete",
            Self::AnalyticsRead => "analytics:read",
            Self::CampaignsWrite => "campaigns:write",
            Self::DomainsManage => "domains:manage",
        }
    }

    pub fn is_owner_only(&self) -> bool {
        Self::OWNER_ONLY.contains(self)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The permission overrides carried by a membership or invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSet {
    /// The `*` sentinel: every capability.
    All,
    Only(BTreeSet<Capability>),
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::Only(BTreeSet::new())
    }
}

impl PermissionSet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self::Only(capabilities.into_iter().collect())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&capability),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Parse the string-list wire form (`["*"]`, `["links:read", ...]`).
    ///
    /// A list that contains `*` anywhere collapses to [`PermissionSet::All`].
    pub fn parse<I, S>(items: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for item in items {
            let item = item.as_ref().trim();
            if item == WILDCARD {
                return Ok(Self::All);
            }
            set.insert(item.parse::<Capability>()?);
        }
        Ok(Self::Only(set))
    }

    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Self::All => vec![WILDCARD.to_string()],
            Self::Only(set) => set.iter().map(|c| c.as_str().to_string()).collect(),
        }
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_strings().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<String>::deserialize(deserializer)?;
        Self::parse(items).map_err(serde::de::Error::custom)
    }
}

/// Who is performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Actor {
    User(UserId),
    /// Internal automation. Passes capability checks but is never an owner.
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::System => None,
        }
    }

    pub fn is_user(&self, user_id: UserId) -> bool {
        matches!(self, Self::User(id) if *id == user_id)
    }
}

impl From<UserId> for Actor {
    fn from(id: UserId) -> Self {
        Self::User(id)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::System => f.write_str("system"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_wire_names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert!("links:reed".parse::<Capability>().is_err());
    }

    #[test]
    fn test_wildcard_collapses_to_all() {
        let set = PermissionSet::parse(["links:read", "*"]).unwrap();
        assert!(set.is_all());
        assert!(set.contains(Capability::TenantDelete));
        assert_eq!(set.to_strings(), vec!["*".to_string()]);
    }

    #[test]
    fn test_explicit_set_only_contains_listed() {
        let set = PermissionSet::parse(["links:read"]).unwrap();
        assert!(set.contains(Capability::LinksRead));
        assert!(!set.contains(Capability::LinksWrite));
    }

    #[test]
    fn test_permission_set_serde_uses_string_list() {
        let set = PermissionSet::of([Capability::LinksRead, Capability::AnalyticsRead]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, serde_json::json!(["links:read", "analytics:read"]));

        let back: PermissionSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);

        let bad: Result<PermissionSet, _> = serde_json::from_value(serde_json::json!(["nope"]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_owner_only_capabilities() {
        assert!(Capability::TenantDelete.is_owner_only());
        assert!(Capability::OwnershipTransfer.is_owner_only());
        assert!(!Capability::TenantUpdate.is_owner_only());
    }

    #[test]
    fn test_system_actor_has_no_user() {
        let user = UserId::new();
        assert_eq!(Actor::User(user).user_id(), Some(user));
        assert!(Actor::User(user).is_user(user));
        assert_eq!(Actor::System.user_id(), None);
        assert!(!Actor::System.is_user(user));
    }
}
