use super::oauth::TokenManager;
use super::rate_limit::{RateLimiter, RetryPolicy, parse_retry_after};
use crate::config::XeroConfig;
use crate::domain::accounting::EntityKind;
use crate::domain::ports::AccountingApi;
use crate::error::{FieldOpsError, Result};
use crate::infrastructure::ensure_success;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, IF_MODIFIED_SINCE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const TENANT_HEADER: &str = "xero-tenant-id";
/// Xero returns at most this many records per page.
pub const PAGE_SIZE: usize = 100;

/// Accounting API client for one connected Xero organisation.
pub struct XeroClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl XeroClient {
    /// Creates a client for the organisation `tokens` is connected to, with
    /// the default retry policy and `config.calls_per_minute` as rate limit.
    pub fn new(http: Client, config: &XeroConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            base_url: config.accounting_url(),
            tokens,
            limiter: RateLimiter::per_minute(config.calls_per_minute),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    /// Sends the request built by `build`, passing the rate limiter before
    /// every attempt and retrying transient failures.
    async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            let credentials = self.tokens.access().await?;
            let request = build()
                .bearer_auth(&credentials.access_token)
                .header(TENANT_HEADER, &credentials.tenant_id)
                .header(ACCEPT, "application/json");

            let (error, retry_after) = match request.send().await {
                Ok(response) => {
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after);
                    match ensure_success(response).await {
                        Ok(response) => return Ok(response),
                        Err(e) => (e, retry_after),
                    }
                }
                Err(e) => (FieldOpsError::from(e), None),
            };

            match self.retry.delay_for(attempt, &error, retry_after) {
                Some(delay) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying Xero call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(error),
            }
        }
    }
}

fn type_filter(kind: EntityKind) -> Option<String> {
    if !kind.shares_collection() {
        return None;
    }
    kind.type_code().map(|code| format!("Type==\"{code}\""))
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn unwrap_envelope(kind: EntityKind, mut body: Value) -> Vec<Value> {
    match body.get_mut(kind.collection()).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[async_trait]
impl AccountingApi for XeroClient {
    #[instrument(skip(self))]
    async fn list(
        &self,
        kind: EntityKind,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        let url = self.collection_url(kind);
        let filter = type_filter(kind);
        // items come back in one response and ignore paging
        let paged = kind != EntityKind::Item;

        let mut records = Vec::new();
        let mut page = 1usize;
        loop {
            let response = self
                .execute(|| {
                    let mut request = self.http.get(&url);
                    if let Some(filter) = &filter {
                        request = request.query(&[("where", filter)]);
                    }
                    if paged {
                        request = request.query(&[("page", page)]);
                    }
                    if let Some(since) = modified_since {
                        request = request.header(IF_MODIFIED_SINCE, http_date(since));
                    }
                    request
                })
                .await?;

            let batch = unwrap_envelope(kind, response.json().await?);
            let count = batch.len();
            records.extend(batch);
            debug!(page, count, "fetched page");

            if !paged || count < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, kind: EntityKind, remote_id: &str) -> Result<Option<Value>> {
        let url = format!("{}/{remote_id}", self.collection_url(kind));
        match self.execute(|| self.http.get(&url)).await {
            Ok(response) => Ok(unwrap_envelope(kind, response.json().await?).into_iter().next()),
            Err(FieldOpsError::RemoteError { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, payload))]
    async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<Value> {
        let url = self.collection_url(kind);
        let body = json!({ kind.collection(): [payload] });
        let response = self.execute(|| self.http.post(&url).json(&body)).await?;

        unwrap_envelope(kind, response.json().await?)
            .into_iter()
            .next()
            .ok_or_else(|| FieldOpsError::RemoteError {
                status: StatusCode::OK.as_u16(),
                body: format!("Xero returned no {} in the response", kind.collection()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_type_filter_only_for_shared_collections() {
        assert_eq!(type_filter(EntityKind::Bill).as_deref(), Some("Type==\"ACCPAY\""));
        assert_eq!(type_filter(EntityKind::Expense).as_deref(), Some("Type==\"SPEND\""));
        assert_eq!(type_filter(EntityKind::CreditNote), None);
        assert_eq!(type_filter(EntityKind::Contact), None);
    }

    #[test]
    fn test_http_date() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 0).unwrap();
        assert_eq!(http_date(at), "Sun, 09 Mar 2025 07:05:00 GMT");
    }

    #[test]
    fn test_unwrap_envelope() {
        let body = json!({ "Contacts": [{ "ContactID": "c-1" }, { "ContactID": "c-2" }] });
        assert_eq!(unwrap_envelope(EntityKind::Contact, body).len(), 2);
        assert!(unwrap_envelope(EntityKind::Invoice, json!({ "Status": "OK" })).is_empty());
    }
}
