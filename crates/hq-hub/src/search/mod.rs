//! # Search Pipeline
//!
//! validate → convert → cached execute → paginate. Each stage short-circuits
//! with its own error kind; validation and conversion failures never touch
//! the backend.

pub mod executor;

pub use executor::SearchExecutor;

use crate::backend::BackendError;
use hq_core::{
    paginate, validate, ConversionError, HostDocument, Page, PageParams, PaginationError,
    StructuredQuery, ValidationError,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("search backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("search backend error: {0}")]
    BackendQueryError(String),
}

impl From<BackendError> for SearchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => SearchError::BackendUnavailable(msg),
            BackendError::Query(msg) => SearchError::BackendQueryError(msg),
        }
    }
}

/// Any failure a search request can end with.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    /// `page` / `page_size` could not be parsed from the query string.
    #[error("{0}")]
    PageParams(String),
}

pub struct SearchService {
    executor: SearchExecutor,
    default_page_size: usize,
}

impl SearchService {
    pub fn new(executor: SearchExecutor, default_page_size: usize) -> Self {
        Self {
            executor,
            default_page_size,
        }
    }

    /// Validate and convert without touching the backend.
    pub fn prepare(&self, raw: &str) -> Result<StructuredQuery, PipelineError> {
        let validated = validate(raw)?;
        Ok(validated.convert()?)
    }

    pub async fn run(
        &self,
        raw: &str,
        params: PageParams,
    ) -> Result<Page<HostDocument>, PipelineError> {
        let query = self.prepare(raw)?;
        let documents = self.executor.search(&query).await?;
        let (page, page_size) = params.resolve(self.default_page_size);
        Ok(paginate(documents, page, page_size)?)
    }
}
