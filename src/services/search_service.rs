//! Search service - pagination rules over the metadata filter query

use std::sync::Arc;

use tracing::debug;

use crate::db::search::{self, SearchFilters, SearchResults};
use crate::db::ContentDb;
use crate::error::CurriculumError;

pub struct SearchService {
    db: Arc<ContentDb>,
    default_page_size: u32,
    max_page_size: u32,
}

impl SearchService {
    pub fn new(db: Arc<ContentDb>, default_page_size: u32, max_page_size: u32) -> Self {
        Self {
            db,
            default_page_size,
            max_page_size,
        }
    }

    /// Run a filtered search. `page` is 1-indexed; `page_size` falls back to the
    /// configured default.
    pub fn search(
        &self,
        filters: &SearchFilters,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<SearchResults, CurriculumError> {
        let page_size = page_size.unwrap_or(self.default_page_size);

        if page < 1 {
            return Err(CurriculumError::Validation("page must be >= 1".into()));
        }
        if page_size < 1 || page_size > self.max_page_size {
            return Err(CurriculumError::Validation(format!(
                "pageSize must be between 1 and {}",
                self.max_page_size
            )));
        }
        if let (Some(from), Some(to)) = (filters.updated_from, filters.updated_to) {
            if from > to {
                return Err(CurriculumError::Validation(
                    "updatedFrom must not be after updatedTo".into(),
                ));
            }
        }

        let results = self.db.with_conn(|conn| search::search(conn, filters, page, page_size))?;
        debug!(
            total = results.total_results,
            page,
            page_size,
            returned = results.results.len(),
            "Search finished"
        );
        Ok(results)
    }
}
