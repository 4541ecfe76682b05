//! Offset pagination for admin list endpoints.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

/// Default number of items to return per page.
pub const DEFAULT_LIMIT: i64 = 50;

/// Maximum number of items that can be requested per page.
pub const MAX_LIMIT: i64 = 500;

/// `skip` and `limit` query parameters.
///
/// The `limit` is clamped between 1 and [`MAX_LIMIT`].
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Number of items to skip (default: 0)
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub skip: Option<i64>,

    /// Maximum number of items to return (default: 50, max: 500)
    #[param(default = 50, minimum = 1, maximum = 500)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    #[inline]
    pub fn params(&self) -> (i64, i64) {
        (self.skip(), self.limit())
    }
}

/// A page of items plus the total count before pagination.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T: ToSchema> {
    pub data: Vec<T>,
    pub total_count: i64,
    pub skip: i64,
    pub limit: i64,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total_count: i64, skip: i64, limit: i64) -> Self {
        Self {
            data,
            total_count,
            skip,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_clamped() {
        let pagination = Pagination {
            skip: Some(-5),
            limit: Some(10_000),
        };
        assert_eq!(pagination.params(), (0, MAX_LIMIT));

        let pagination = Pagination {
            skip: None,
            limit: Some(0),
        };
        assert_eq!(pagination.params(), (0, 1));

        assert_eq!(Pagination::default().limit(), DEFAULT_LIMIT);
    }
}
