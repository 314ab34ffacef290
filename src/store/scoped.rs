use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Filters, Record, RecordStore, StoreError};
use crate::auth::retry::RetryPolicy;
use crate::auth::session::{IdentityCheck, Session};

/// Column holding the owning user id on every table.
pub const OWNER_COLUMN: &str = "user_id";

/// Record store access on behalf of one session.
///
/// Only constructible from a session whose user id passes the sanity check,
/// so a malformed identity can never reach the store. Every call is filtered
/// by [`OWNER_COLUMN`], and inserts are stamped with it.
pub struct ScopedStore<'a, S> {
    store: &'a S,
    user_id: String,
    access_token: SecretString,
    retry: RetryPolicy,
}

impl<S> std::fmt::Debug for ScopedStore<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl<'a, S: RecordStore> ScopedStore<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, session: &Session, retry: RetryPolicy) -> Option<Self> {
        let check = session.identity();
        if check != IdentityCheck::Plausible {
            warn!(?check, "Refusing record store access");
            return None;
        }
        Some(Self {
            store,
            user_id: session.user_id.trim().to_string(),
            access_token: session.access_token.clone(),
            retry,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn scoped(&self, filters: Filters) -> Filters {
        let mut scoped: Filters = filters
            .into_iter()
            .filter(|(column, _)| column != OWNER_COLUMN)
            .collect();
        scoped.push((OWNER_COLUMN.to_string(), self.user_id.clone()));
        scoped
    }

    /// # Errors
    /// Returns the store error once retries are spent; "not found" is `Ok(None)`.
    pub async fn fetch_one(&self, table: &str, filters: Filters) -> Result<Option<Record>, StoreError> {
        let filters = self.scoped(filters);
        self.retry
            .run("fetch_one", || {
                self.store.fetch_one(&self.access_token, table, &filters)
            })
            .await
    }

    /// # Errors
    /// Returns the store error once retries are spent.
    pub async fn insert(&self, table: &str, mut record: Record) -> Result<Record, StoreError> {
        record.insert(OWNER_COLUMN.to_string(), Value::from(self.user_id.clone()));
        self.retry
            .run("insert", || self.store.insert(&self.access_token, table, &record))
            .await
    }

    /// # Errors
    /// Returns the store error once retries are spent.
    pub async fn update(&self, table: &str, filters: Filters, mut patch: Record) -> Result<(), StoreError> {
        if patch.remove(OWNER_COLUMN).is_some() {
            debug!("Ignoring ownership change in update");
        }
        let filters = self.scoped(filters);
        self.retry
            .run("update", || {
                self.store.update(&self.access_token, table, &filters, &patch)
            })
            .await
    }

    /// # Errors
    /// Returns the store error once retries are spent.
    pub async fn delete(&self, table: &str, filters: Filters) -> Result<(), StoreError> {
        let filters = self.scoped(filters);
        self.retry
            .run("delete", || self.store.delete(&self.access_token, table, &filters))
            .await
    }
}
