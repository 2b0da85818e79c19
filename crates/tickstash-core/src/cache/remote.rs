use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tickstash_warehouse::{CacheRow, FetchLogRecord};

use crate::cache::{BackendError, BackendFuture, BackendKind, CacheBackend, CacheKey};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};

/// Remote store speaking the PostgREST dialect: one REST resource per table,
/// `eq.` filters, and upserts through `Prefer: resolution=merge-duplicates`.
#[derive(Clone)]
pub struct RemoteBackend {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RemoteRow {
    provider: String,
    payload: String,
    fetched_at: String,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    ticker: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bar_interval: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lookback: Option<&'a str>,
    provider: &'a str,
    payload: &'a str,
    fetched_at: &'a str,
}

#[derive(Serialize)]
struct AuditBody<'a> {
    ticker: &'a str,
    data_type: &'a str,
    fetched_at: &'a str,
    hit: bool,
    duration_ms: u64,
    backend: Option<&'a str>,
    provider: Option<&'a str>,
    outcome: &'a str,
}

impl RemoteBackend {
    /// `base_url` is the REST root, e.g. `https://project.example.co/rest/v1`.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            timeout_ms: 5_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn authorized(&self, request: HttpRequest) -> Result<HttpRequest, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| BackendError::unavailable(BackendKind::Remote, "missing api key"))?;

        Ok(request
            .with_header("apikey", key)
            .with_bearer(key)
            .with_timeout_ms(self.timeout_ms))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
        let request = self.authorized(request)?;
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| BackendError::unavailable(BackendKind::Remote, error.message()))?;

        if !response.is_success() {
            return Err(BackendError::unavailable(
                BackendKind::Remote,
                format!("status {}", response.status),
            ));
        }
        Ok(response)
    }

    fn row_url(&self, key: &CacheKey) -> String {
        let select = "select=provider,payload,fetched_at&limit=1";
        match key {
            CacheKey::Price {
                ticker,
                interval,
                window,
            } => format!(
                "{}/price_cache?ticker=eq.{}&bar_interval=eq.{}&lookback=eq.{}&{select}",
                self.base_url,
                urlencoding::encode(ticker.as_str()),
                interval.as_str(),
                window.as_str()
            ),
            CacheKey::Fundamentals(ticker) => format!(
                "{}/fundamentals_cache?ticker=eq.{}&{select}",
                self.base_url,
                urlencoding::encode(ticker.as_str())
            ),
            CacheKey::Metadata(ticker) => format!(
                "{}/metadata_cache?ticker=eq.{}&{select}",
                self.base_url,
                urlencoding::encode(ticker.as_str())
            ),
        }
    }

    fn upsert_url(&self, key: &CacheKey) -> String {
        match key {
            CacheKey::Price { .. } => format!(
                "{}/price_cache?on_conflict=ticker,bar_interval,lookback",
                self.base_url
            ),
            CacheKey::Fundamentals(_) => {
                format!("{}/fundamentals_cache?on_conflict=ticker", self.base_url)
            }
            CacheKey::Metadata(_) => format!("{}/metadata_cache?on_conflict=ticker", self.base_url),
        }
    }
}

impl CacheBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BackendFuture<'a, Option<CacheRow>> {
        Box::pin(async move {
            let response = self.send(HttpRequest::get(self.row_url(key))).await?;
            let rows: Vec<RemoteRow> = serde_json::from_str(&response.body).map_err(|error| {
                BackendError::serialization(BackendKind::Remote, error.to_string())
            })?;

            Ok(rows.into_iter().next().map(|row| CacheRow {
                provider: row.provider,
                payload: row.payload,
                fetched_at: row.fetched_at,
            }))
        })
    }

    fn write<'a>(&'a self, key: &'a CacheKey, row: &'a CacheRow) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let (bar_interval, lookback) = match key {
                CacheKey::Price {
                    interval, window, ..
                } => (Some(interval.as_str()), Some(window.as_str())),
                CacheKey::Fundamentals(_) | CacheKey::Metadata(_) => (None, None),
            };
            let body = serde_json::to_string(&UpsertBody {
                ticker: key.ticker().as_str(),
                bar_interval,
                lookback,
                provider: &row.provider,
                payload: &row.payload,
                fetched_at: &row.fetched_at,
            })
            .map_err(|error| BackendError::serialization(BackendKind::Remote, error.to_string()))?;

            let request = HttpRequest::post(self.upsert_url(key))
                .with_header("prefer", "resolution=merge-duplicates,return=minimal")
                .with_json_body(body);
            self.send(request).await.map(|_| ())
        })
    }

    fn append_audit<'a>(&'a self, record: &'a FetchLogRecord) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_string(&AuditBody {
                ticker: &record.ticker,
                data_type: &record.data_type,
                fetched_at: &record.fetched_at,
                hit: record.hit,
                duration_ms: record.duration_ms,
                backend: record.backend.as_deref(),
                provider: record.provider.as_deref(),
                outcome: &record.outcome,
            })
            .map_err(|error| BackendError::serialization(BackendKind::Remote, error.to_string()))?;

            let request = HttpRequest::post(format!("{}/fetch_log", self.base_url))
                .with_header("prefer", "return=minimal")
                .with_json_body(body);
            self.send(request).await.map(|_| ())
        })
    }

    fn probe<'a>(&'a self) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/price_cache?select=ticker&limit=1", self.base_url);
            self.send(HttpRequest::get(url)).await.map(|_| ())
        })
    }
}
