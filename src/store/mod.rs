/// Persistence seams
///
/// Each entity is reached through an async trait so the session and management
/// logic runs unchanged against Postgres or against the in-memory backend.

pub mod designations;
pub mod memory;
pub mod units;
pub mod users;

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

use crate::audit::{AuditSink, PgAuditSink};
use crate::auth::{PgRefreshTokenStore, RefreshTokenStore};

pub use designations::{
    Designation, DesignationChanges, DesignationFilter, DesignationStore, NewDesignation,
    PgDesignationStore,
};
pub use units::{NewUnit, PgUnitStore, Unit, UnitChanges, UnitFilter, UnitStore};
pub use users::{NewUser, PgUserStore, User, UserChanges, UserFilter, UserProfile, UserStore};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;
// Keeps `offset()` inside i64 for any page size.
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(request: PageRequest, total: i64) -> Self {
        Self {
            page: request.page,
            limit: request.limit,
            total,
            total_pages: (total + request.limit - 1) / request.limit,
        }
    }
}

/// One page of results
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Case-insensitive substring match used by the in-memory search filters.
pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// All backends the application needs, behind trait objects
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub units: Arc<dyn UnitStore>,
    pub designations: Arc<dyn DesignationStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            refresh_tokens: Arc::new(PgRefreshTokenStore::new(pool.clone())),
            units: Arc::new(PgUnitStore::new(pool.clone())),
            designations: Arc::new(PgDesignationStore::new(pool.clone())),
            audit: Arc::new(PgAuditSink::new(pool)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_defaults_and_clamps() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, limit: 10 });
        assert_eq!(PageRequest::new(Some(0), Some(1000)), PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn test_huge_page_number_does_not_overflow_offset() {
        let request = PageRequest::new(Some(i64::MAX), Some(MAX_PAGE_SIZE));
        assert_eq!(request.page, MAX_PAGE);
        assert!(request.offset() > 0);

        let small = PageRequest::new(Some(i64::MAX), Some(10));
        assert!(small.offset() > 0);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let request = PageRequest::new(Some(1), Some(10));
        assert_eq!(Pagination::new(request, 0).total_pages, 0);
        assert_eq!(Pagination::new(request, 10).total_pages, 1);
        assert_eq!(Pagination::new(request, 11).total_pages, 2);
    }
}
