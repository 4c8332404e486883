//! Attribute filtering and pagination over content metadata
//!
//! Filters combine as a conjunction. Each set-valued filter is a disjunction over
//! its members, and an empty set matches everything. Keyword containment is
//! case-insensitive over title, description and topic tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use rusqlite::Connection;

use crate::error::CurriculumError;
use crate::models::{ContentMetadata, DifficultyLevel};
use crate::workflow::WorkflowStatus;

use super::{content, fold_case, to_ts};

/// Column to order results by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    UpdatedAt,
    CreatedAt,
    Title,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::UpdatedAt => "c.updated_at",
            SortField::CreatedAt => "c.created_at",
            SortField::Title => "c.title",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    #[serde(default)]
    pub field: SortField,
    #[serde(default)]
    pub order: SortOrder,
}

/// Search filters; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default)]
    pub key_stages: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub difficulties: Vec<DifficultyLevel>,
    #[serde(default)]
    pub statuses: Vec<WorkflowStatus>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Inclusive lower bound on `updated_at`
    #[serde(default)]
    pub updated_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `updated_at`
    #[serde(default)]
    pub updated_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: Option<Sort>,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub total_results: u64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<ContentMetadata>,
}

fn push_in<T: ToString>(
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
    column: &str,
    values: &[T],
) {
    if values.is_empty() {
        return;
    }
    let placeholders: Vec<_> = values.iter().map(|_| "?").collect();
    conditions.push(format!("{} IN ({})", column, placeholders.join(", ")));
    for value in values {
        params.push(Box::new(value.to_string()));
    }
}

/// Fold the keyword like the stored columns and escape LIKE wildcards so it
/// matches literally
fn like_pattern(keyword: &str) -> String {
    let escaped = fold_case(keyword)
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn where_clause(filters: &SearchFilters) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    push_in(&mut conditions, &mut params, "c.key_stage", &filters.key_stages);
    push_in(&mut conditions, &mut params, "c.subject", &filters.subjects);
    push_in(&mut conditions, &mut params, "c.content_type", &filters.content_types);
    push_in(&mut conditions, &mut params, "c.difficulty", &filters.difficulties);
    push_in(&mut conditions, &mut params, "c.status", &filters.statuses);
    push_in(&mut conditions, &mut params, "c.region", &filters.regions);

    if let Some(keyword) = filters.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        conditions.push(
            r"(c.title_folded LIKE ? ESCAPE '\'
              OR c.description_folded LIKE ? ESCAPE '\'
              OR EXISTS (SELECT 1 FROM content_topics t
                         WHERE t.content_id = c.id AND t.topic_folded LIKE ? ESCAPE '\'))"
                .to_string(),
        );
        let pattern = like_pattern(keyword);
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    if let Some(ref created_by) = filters.created_by {
        conditions.push("c.created_by = ?".to_string());
        params.push(Box::new(created_by.clone()));
    }

    if let Some(ref from) = filters.updated_from {
        conditions.push("c.updated_at >= ?".to_string());
        params.push(Box::new(to_ts(from)));
    }

    if let Some(ref to) = filters.updated_to {
        conditions.push("c.updated_at <= ?".to_string());
        params.push(Box::new(to_ts(to)));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, params)
}

/// Run a search. `page` is 1-indexed; range checks belong to the caller.
pub fn search(
    conn: &Connection,
    filters: &SearchFilters,
    page: u32,
    page_size: u32,
) -> Result<SearchResults, CurriculumError> {
    let (clause, mut params) = where_clause(filters);

    let count_sql = format!("SELECT COUNT(*) FROM content c{}", clause);
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, param_refs.as_slice(), |row| row.get(0))?;

    let sort = filters.sort.unwrap_or_default();
    let direction = match sort.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let sql = format!(
        "SELECT c.* FROM content c{} ORDER BY {} {}, c.id ASC LIMIT ? OFFSET ?",
        clause,
        sort.field.column(),
        direction
    );
    let offset = (page.saturating_sub(1) as i64) * page_size as i64;
    params.push(Box::new(page_size as i64));
    params.push(Box::new(offset));

    debug!("Executing query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(param_refs.as_slice(), content::metadata_from_row)?;

    let mut results = vec![];
    for row in rows {
        let mut metadata = row?;
        metadata.topics = content::get_topics(conn, &metadata.id)?;
        results.push(metadata);
    }

    Ok(SearchResults {
        total_results: total.max(0) as u64,
        page,
        page_size,
        results,
    })
}
