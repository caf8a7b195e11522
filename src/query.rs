use crate::catalog::{ListingFilter, ListingStore, SortSpec, TextFilter};
use crate::models::{ListingStatus, SearchMeta, SearchResponse};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SORT: &str = "-publishedAt";
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

/// Raw query-string parameters of `GET /cars`. Everything arrives as text;
/// the planner owns all parsing and validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub q: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub initial: Option<String>,
    pub full: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Invalid year parameter")]
    InvalidYear,
    #[error("Invalid status parameter")]
    InvalidStatus,
    #[error("Invalid filter pattern")]
    Pattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// `initial=true` or `full=true`: the whole result set in one response.
    All,
    Paged { page: usize, limit: usize },
}

/// Fully resolved query: which rows, in what order, and how much of them.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub filter: ListingFilter,
    pub sort: SortSpec,
    pub mode: PageMode,
    /// Echoed back in the response meta.
    pub sort_label: String,
}

/// Turn raw parameters into an executable plan. `text_available` selects the
/// free-text strategy: index-backed relevance when true, escaped substring
/// matching otherwise.
pub fn build_plan(params: &SearchParams, text_available: bool) -> Result<QueryPlan, PlanError> {
    let mut filter = ListingFilter::default();

    if let Some(raw) = present(&params.status) {
        filter.status = Some(ListingStatus::from_param(raw).ok_or(PlanError::InvalidStatus)?);
    }
    if let Some(raw) = present(&params.year) {
        filter.year = Some(raw.parse::<i32>().map_err(|_| PlanError::InvalidYear)?);
    }
    // Unparseable price bounds are dropped rather than rejected.
    filter.min_price = present(&params.min_price).and_then(|v| v.parse().ok());
    filter.max_price = present(&params.max_price).and_then(|v| v.parse().ok());

    if let Some(raw) = present(&params.title) {
        filter.title = Some(contains(raw)?);
    }
    // A brand filter takes precedence and matches against the make field.
    if let Some(raw) = present(&params.brand).or_else(|| present(&params.make)) {
        filter.make = Some(contains(raw)?);
    }
    if let Some(raw) = present(&params.model) {
        filter.model = Some(contains(raw)?);
    }

    let q = present(&params.q);
    if let Some(q) = q {
        filter.text = Some(if text_available {
            TextFilter::Relevance { tokens: tokenize(q) }
        } else {
            TextFilter::Substring(contains(q)?)
        });
    }

    let requested = present(&params.sort).unwrap_or(DEFAULT_SORT);
    let (sort, sort_label) = resolve_sort(requested, q.filter(|_| text_available));

    let mode = if truthy(&params.initial) || truthy(&params.full) {
        PageMode::All
    } else {
        PageMode::Paged {
            page: parse_page(&params.page),
            limit: parse_limit(&params.limit),
        }
    };

    Ok(QueryPlan {
        filter,
        sort,
        mode,
        sort_label,
    })
}

/// Run the plan against the store and shape the response envelope. Paged mode
/// fetches the page and the total count concurrently.
pub async fn execute(store: &ListingStore, plan: &QueryPlan) -> SearchResponse {
    match plan.mode {
        PageMode::All => {
            let data = store.find_all(&plan.filter, &plan.sort).await;
            let total = data.len();
            SearchResponse {
                success: true,
                message: "All cars retrieved (initial=true)".to_string(),
                meta: SearchMeta {
                    page: 1,
                    limit: total,
                    total,
                    total_pages: 1,
                    sort: plan.sort_label.clone(),
                    initial: true,
                },
                data,
            }
        }
        PageMode::Paged { page, limit } => {
            let skip = (page - 1) * limit;
            let (data, total) = tokio::join!(
                store.find_page(&plan.filter, &plan.sort, skip, limit),
                store.count(&plan.filter),
            );
            SearchResponse {
                success: true,
                message: "Cars retrieved successfully".to_string(),
                meta: SearchMeta {
                    page,
                    limit,
                    total,
                    total_pages: total.div_ceil(limit),
                    sort: plan.sort_label.clone(),
                    initial: false,
                },
                data,
            }
        }
    }
}

fn resolve_sort(requested: &str, query: Option<&str>) -> (SortSpec, String) {
    if requested == "relevance" {
        // Relevance ordering only exists on the index-backed text path.
        if let Some(q) = query {
            return (SortSpec::Relevance { tokens: tokenize(q) }, requested.to_string());
        }
        return resolve_sort(DEFAULT_SORT, None);
    }
    let (name, descending) = match requested.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (requested, false),
    };
    (
        SortSpec::Field {
            name: name.to_string(),
            descending,
        },
        requested.to_string(),
    )
}

/// Case-insensitive literal-substring matcher; user input is escaped, never
/// interpreted as a pattern.
fn contains(raw: &str) -> Result<Regex, PlanError> {
    RegexBuilder::new(&regex::escape(raw))
        .case_insensitive(true)
        .build()
        .map_err(|_| PlanError::Pattern)
}

fn tokenize(q: &str) -> Vec<String> {
    q.to_lowercase().split_whitespace().map(str::to_string).collect()
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn truthy(value: &Option<String>) -> bool {
    present(value).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn parse_page(raw: &Option<String>) -> usize {
    present(raw)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(1)
}

fn parse_limit(raw: &Option<String>) -> usize {
    present(raw)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|limit| *limit >= 1)
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT)
}
