//! Shared listing contract: pagination, sorting, search and filters.
//!
//! Raw caller input (`RawListQuery`, `RawConsultationFilter`) is validated
//! into typed parameters. Out-of-range values are rejected with a message
//! naming the parameter and its legal values; nothing is clamped.

mod filter;
mod page;
mod query;

pub use filter::*;
pub use page::*;
pub use query::*;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Build a case-insensitive substring pattern for `LIKE ... ESCAPE '\'`.
pub fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
