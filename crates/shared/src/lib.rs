//! lnk Shared Types and Utilities
//!
//! This crate contains the data model, capability model, error taxonomy,
//! persistence collaborators and audit logging shared by the lnk tenancy
//! and billing crates.

pub mod audit;
pub mod capability;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use audit::{AuditEntryBuilder, AuditLogger};
pub use capability::{Actor, Capability, PermissionSet};
pub use db::*;
pub use error::*;
pub use store::{
    ApiKeyStore, AuditSink, BillingStore, InvitationStore, MemoryStore, MembershipStore, PgStore,
    StoreError, StoreResult, TenancyStore, TenantStore,
};
pub use types::*;
