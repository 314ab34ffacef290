//! Record store contract for the budget, expense and asset screens.
//!
//! The screens themselves are plain CRUD; this module only fixes the shape of
//! the calls and makes sure every call carries the visitor's bearer token and
//! an ownership filter. Lookups fail closed: "not found" is `Ok(None)`.

mod error;
mod postgrest;
mod scoped;

pub use error::StoreError;
pub use postgrest::PostgrestStore;
pub use scoped::{ScopedStore, OWNER_COLUMN};

use regex::Regex;
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::future::Future;

/// Equality filters, column to value.
pub type Filters = Vec<(String, String)>;

/// A record is a JSON object.
pub type Record = Map<String, Value>;

pub trait RecordStore: Send + Sync {
    /// First record matching `filters`, or `None`.
    fn fetch_one(
        &self,
        access_token: &SecretString,
        table: &str,
        filters: &Filters,
    ) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Insert `record` and return it as stored.
    fn insert(
        &self,
        access_token: &SecretString,
        table: &str,
        record: &Record,
    ) -> impl Future<Output = Result<Record, StoreError>> + Send;

    fn update(
        &self,
        access_token: &SecretString,
        table: &str,
        filters: &Filters,
        patch: &Record,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(
        &self,
        access_token: &SecretString,
        table: &str,
        filters: &Filters,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Table and column names go into the request path and query; keep them to
/// plain identifiers.
///
/// # Errors
/// Returns `InvalidIdentifier` if `name` is not a lowercase identifier.
pub fn check_identifier(name: &str) -> Result<(), StoreError> {
    if Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").is_ok_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
