use crate::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE, MAX_PAGE_LIMIT};
use serde::{Deserialize, Serialize};

/// Raw `?page&limit` query. Kept as text so that garbage falls back to the defaults
/// instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct Pagination {
    pub page: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn from_query(query: &PageQuery) -> Self {
        let page = query
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p.min(MAX_PAGE))
            .unwrap_or(1);
        let limit = query
            .limit
            .as_deref()
            .and_then(|l| l.trim().parse::<usize>().ok())
            .filter(|l| *l >= 1)
            .map(|l| l.min(MAX_PAGE_LIMIT))
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        Pagination { page, limit }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, limit: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(str::to_string),
            limit: limit.map(str::to_string),
        }
    }

    #[test]
    fn defaults_apply_without_parameters() {
        let p = Pagination::from_query(&PageQuery::default());
        assert_eq!(p, Pagination { page: 1, limit: 50 });
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn limit_is_clamped_to_the_maximum() {
        let p = Pagination::from_query(&query(Some("3"), Some("1000")));
        assert_eq!(p, Pagination { page: 3, limit: 200 });
        assert_eq!(p.offset(), 400);
    }

    #[test]
    fn huge_page_is_clamped() {
        let p = Pagination::from_query(&query(Some("18446744073709551615"), Some("200")));
        assert_eq!(p, Pagination { page: 1000, limit: 200 });
        assert_eq!(p.offset(), 199_800);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        assert_eq!(
            Pagination::from_query(&query(Some("0"), Some("0"))),
            Pagination { page: 1, limit: 50 }
        );
        assert_eq!(
            Pagination::from_query(&query(Some("-2"), Some("abc"))),
            Pagination { page: 1, limit: 50 }
        );
    }
}
