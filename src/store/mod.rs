//! PostgreSQL persistence.
//!
//! Reads go straight to the pool. Anything that moves stock runs in one
//! transaction that locks the order row first, then the product rows in id
//! order, so concurrent writers queue instead of interleaving.

use sqlx::PgPool;

mod orders;
mod products;
mod users;

pub use orders::OrderFilter;
pub use users::{UserFilter, UserStats, UserWithOrders};

#[derive(Clone)]
pub struct Store {
    db: PgPool,
    /// Currency order totals are computed in.
    currency: String,
}

impl Store {
    pub fn new(db: PgPool, currency: &str) -> Self { Self { db, currency: currency.to_lowercase() } }

    pub fn pool(&self) -> &PgPool { &self.db }
}

pub const MAX_PAGE_SIZE: i64 = 100;

/// 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(number: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        Self {
            number: number.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 { (self.number - 1).saturating_mul(self.limit) }

    pub fn pages(&self, total: i64) -> i64 { (total + self.limit - 1) / self.limit }
}

/// One page of rows plus the unpaged match count.
#[derive(Debug)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
fn contains_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        let p = Page::new(Some(0), Some(500), 10);
        assert_eq!(p, Page { number: 1, limit: MAX_PAGE_SIZE });
        let p = Page::new(Some(3), None, 10);
        assert_eq!(p.offset(), 20);
        assert_eq!(p.pages(21), 3);
        assert_eq!(p.pages(0), 0);
    }

    #[test]
    fn test_contains_pattern_escapes() {
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
    }
}
