//! # hq-core — The "Grammar" of HOSTQUERY
//!
//! Everything a search request goes through before (and after) it touches
//! the network: the grammar validator, the `field = value` converter, the
//! structured query it produces, pagination, and the record shapes that
//! cross process boundaries.
//!
//! Nothing in this crate performs I/O. Every function is deterministic.

pub mod convert;
pub mod page;
pub mod query;
pub mod record;
pub mod validate;

pub use convert::{convert, parse_clause, ConversionError, ParsedClause};
pub use page::{paginate, Page, PageParams, PaginationError, DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
pub use query::{StructuredQuery, ValidatedQuery};
pub use record::{AuditRecord, HostDocument};
pub use validate::{validate, ValidationError, ALLOWED_FIELDS, FORBIDDEN_PATTERNS};
