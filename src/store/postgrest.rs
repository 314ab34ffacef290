//! PostgREST client for the record store (`{provider_url}/rest/v1`).

use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{check_identifier, Filters, Record, RecordStore, StoreError};
use crate::APP_USER_AGENT;

#[derive(Clone)]
pub struct PostgrestStore {
    base_url: String,
    anon_key: SecretString,
    http: Client,
}

impl std::fmt::Debug for PostgrestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestStore")
            .field("base_url", &self.base_url)
            .field("anon_key", &"***")
            .finish_non_exhaustive()
    }
}

impl PostgrestStore {
    /// # Errors
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(
        provider_url: &str,
        anon_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| StoreError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            base_url: format!("{}/rest/v1", provider_url.trim_end_matches('/')),
            anon_key,
            http,
        })
    }

    fn table_url(&self, table: &str) -> Result<String, StoreError> {
        check_identifier(table)?;
        Ok(format!("{}/{table}", self.base_url))
    }

    fn authorized(&self, builder: RequestBuilder, access_token: &SecretString) -> RequestBuilder {
        builder
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(access_token.expose_secret())
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = store_message(status, &body);
        debug!(status = status.as_u16(), "Record store rejected request: {message}");
        Err(StoreError::from_status(status.as_u16(), message))
    }
}

/// `column=eq.value` pairs in PostgREST syntax.
fn eq_filters(filters: &Filters) -> Result<Vec<(String, String)>, StoreError> {
    filters
        .iter()
        .map(|(column, value)| {
            check_identifier(column)?;
            Ok((column.clone(), format!("eq.{value}")))
        })
        .collect()
}

impl RecordStore for PostgrestStore {
    #[instrument(skip(self, access_token, filters))]
    async fn fetch_one(
        &self,
        access_token: &SecretString,
        table: &str,
        filters: &Filters,
    ) -> Result<Option<Record>, StoreError> {
        let builder = self
            .authorized(self.http.get(self.table_url(table)?), access_token)
            .query(&[("select", "*"), ("limit", "1")])
            .query(&eq_filters(filters)?);

        let response = match Self::send(builder).await {
            Ok(response) => response,
            Err(StoreError::Rejected { status, .. }) if status == 404 || status == 406 => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let rows: Vec<Record> = response
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, access_token, record))]
    async fn insert(
        &self,
        access_token: &SecretString,
        table: &str,
        record: &Record,
    ) -> Result<Record, StoreError> {
        let builder = self
            .authorized(self.http.post(self.table_url(table)?), access_token)
            .header("Prefer", "return=representation")
            .json(record);

        let rows: Vec<Record> = Self::send(builder)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("insert returned no rows".to_string()))
    }

    #[instrument(skip(self, access_token, filters, patch))]
    async fn update(
        &self,
        access_token: &SecretString,
        table: &str,
        filters: &Filters,
        patch: &Record,
    ) -> Result<(), StoreError> {
        let builder = self
            .authorized(self.http.patch(self.table_url(table)?), access_token)
            .header("Prefer", "return=minimal")
            .query(&eq_filters(filters)?)
            .json(patch);
        Self::send(builder).await.map(|_| ())
    }

    #[instrument(skip(self, access_token, filters))]
    async fn delete(
        &self,
        access_token: &SecretString,
        table: &str,
        filters: &Filters,
    ) -> Result<(), StoreError> {
        let builder = self
            .authorized(self.http.delete(self.table_url(table)?), access_token)
            .query(&eq_filters(filters)?);
        Self::send(builder).await.map(|_| ())
    }
}

fn store_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "details", "hint", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        })
}
