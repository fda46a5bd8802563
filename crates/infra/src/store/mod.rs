//! Storage collaborators: repository contracts and in-memory implementations.
//!
//! Reads are tenant-scoped: a record owned by another tenant is reported as
//! not found, never as forbidden. Updates that move a job between states are
//! compare-and-set on the stored status.

mod adapters;
mod repositories;
mod table;

pub use adapters::{RepositoryCredentials, RepositoryUsageSource};
pub use repositories::{
    ApiKeyRepository, ApiUserRepository, AuditLogRepository, InMemoryApiKeyRepository,
    InMemoryApiUserRepository, InMemoryAuditLogRepository, InMemoryJobRepository,
    InMemoryTenantRepository, InMemoryUsageRepository, JobRepository, TenantRepository,
    UsageRepository,
};
pub use table::InMemoryTable;

use serde::{Deserialize, Serialize};

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 200;

/// Offset pagination, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }.clamped()
    }

    /// Limit forced into `1..=MAX_PAGE_LIMIT`.
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> PageResult<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(Page::new(0, 3), Page { limit: 1, offset: 3 });
        assert_eq!(Page::new(10_000, 0).limit, MAX_PAGE_LIMIT);
        assert_eq!(Page::default().limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = StoreError::not_found("job", "abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "job not found: abc");
    }
}
