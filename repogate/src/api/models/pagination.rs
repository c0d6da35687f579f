//! Offset-based pagination for list endpoints.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::api::validation::{FieldErrors, Schema};

/// Default number of items to return per page.
pub const DEFAULT_LIMIT: u64 = 10;

/// Maximum number of items that can be requested per page.
pub const MAX_LIMIT: u64 = 100;

/// `skip` (default 0) and `limit` (default 10, at most 100) query parameters
#[serde_as]
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub skip: Option<u64>,

    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<u64>,
}

impl Pagination {
    #[inline]
    pub fn skip(&self) -> u64 {
        self.skip.unwrap_or(0)
    }

    /// The limit, clamped to `1..=MAX_LIMIT`
    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

impl Schema for Pagination {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        errors.check(self.limit != Some(0), "limit", "must be at least 1");
        errors.into_result()
    }
}

/// One page of a list plus the number of items matching before paging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::validation::from_urlencoded;

    #[test]
    fn test_defaults_and_clamping() {
        let page: Pagination = from_urlencoded("").unwrap();
        assert_eq!((page.skip(), page.limit()), (0, DEFAULT_LIMIT));

        let page: Pagination = from_urlencoded("skip=20&limit=500").unwrap();
        assert_eq!((page.skip(), page.limit()), (20, MAX_LIMIT));
    }

    #[test]
    fn test_zero_and_negative_limits_are_rejected() {
        assert!(from_urlencoded::<Pagination>("limit=0").is_err());
        assert!(from_urlencoded::<Pagination>("limit=-1").is_err());
    }
}
