//! Read projection for listing drafts.

use chrono::{DateTime, Utc};

use crate::draft::{Draft, DraftStatus, TimeStamp};
use crate::error::ValidationError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftFilter {
    pub status: Option<DraftStatus>,
    /// Case-insensitive match against the draft number or customer name.
    pub search: Option<String>,
    /// 1-based. Defaults to 1.
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl DraftFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_status(mut self, status: DraftStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
    pub fn set_page(mut self, page: usize, limit: usize) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }
    pub fn set_date_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    fn matches(&self, draft: &Draft, needle: Option<&str>) -> bool {
        if self.status.is_some_and(|status| status != draft.status) {
            return false;
        }
        let created = draft.created_at.to_datetime_utc();
        if self.date_from.is_some_and(|from| created < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| created > to) {
            return false;
        }
        match needle {
            Some(needle) => {
                draft.draft_number.to_lowercase().contains(needle)
                    || draft
                        .customer_name()
                        .is_some_and(|name| name.to_lowercase().contains(needle))
            }
            None => true,
        }
    }
}

/// Listing row for a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSummary {
    pub id: String,
    pub draft_number: String,
    pub version: u64,
    pub status: DraftStatus,
    pub customer_name: Option<String>,
    pub total_amount: Option<i64>,
    pub created_at: TimeStamp<Utc>,
    pub updated_at: TimeStamp<Utc>,
}

impl From<&Draft> for DraftSummary {
    fn from(draft: &Draft) -> Self {
        Self {
            id: draft.id.clone(),
            draft_number: draft.draft_number.clone(),
            version: draft.version,
            status: draft.status,
            customer_name: draft.customer_name().map(str::to_string),
            total_amount: draft.payload.totals.as_ref().map(|t| t.total_amount),
            created_at: draft.created_at.clone(),
            updated_at: draft.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages at query time.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Filter, order (newest first, then draft number) and slice one page.
pub fn paginate(
    drafts: Vec<Draft>,
    filter: &DraftFilter,
    default_limit: usize,
    max_limit: usize,
) -> Result<Page<DraftSummary>, ValidationError> {
    let page = filter.page.unwrap_or(1);
    let limit = filter.limit.unwrap_or(default_limit);
    if page == 0 {
        return Err(ValidationError::InvalidPage);
    }
    if limit == 0 || limit > max_limit {
        return Err(ValidationError::InvalidLimit {
            limit,
            max: max_limit,
        });
    }
    if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
        if from > to {
            return Err(ValidationError::InvalidDateRange);
        }
    }

    let needle = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut matched: Vec<Draft> = drafts
        .into_iter()
        .filter(|d| filter.matches(d, needle.as_deref()))
        .collect();
    matched.sort_by(|a, b| {
        b.created_at
            .to_datetime_utc()
            .cmp(&a.created_at.to_datetime_utc())
            .then_with(|| a.draft_number.cmp(&b.draft_number))
    });

    let total = matched.len();
    let items = matched
        .iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .map(DraftSummary::from)
        .collect();

    Ok(Page {
        items,
        total,
        page,
        limit,
    })
}
