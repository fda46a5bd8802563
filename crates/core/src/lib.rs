//! `genflow-core`: shared identifiers and the domain error model.
//!
//! Everything here is pure: no IO, no async, no storage assumptions.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{ApiKeyId, ApiUserId, AuditLogId, JobId, TenantId, UsageId};
