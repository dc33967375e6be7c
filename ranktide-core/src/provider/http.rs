//! HTTP client for the search analytics provider API
//!
//! Speaks a Search-Console-style query protocol: one POST per (site, date,
//! dimension) returning rows of clicks/impressions/ctr/position. HTTP
//! failures are mapped onto the [`FetchErrorKind`] taxonomy so callers can
//! decide retry policy without looking at status codes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{Error, FetchErrorKind, Result};

use super::{PageRow, QueryRow, SearchAnalyticsProvider, TotalsRow};

/// Dimension to break a day's metrics down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Date,
    Page,
    Query,
}

impl Dimension {
    fn as_str(&self) -> &'static str {
        match self {
            Dimension::Date => "date",
            Dimension::Page => "page",
            Dimension::Query => "query",
        }
    }
}

/// Request body for POST /sites/{site}/query
#[derive(Serialize)]
struct QueryRequest<'a> {
    start_date: String,
    end_date: String,
    dimensions: [&'a str; 1],
}

/// Response from POST /sites/{site}/query
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<ResponseRow>,
}

/// One row of the query response.
///
/// `keys` carries the dimension values in request order (here always a
/// single page path, query string, or date).
#[derive(Debug, Deserialize)]
struct ResponseRow {
    #[serde(default)]
    keys: Vec<String>,
    clicks: i64,
    impressions: i64,
    ctr: f64,
    position: f64,
}

/// HTTP client for the provider API
pub struct HttpSearchProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSearchProvider {
    /// Create a new provider client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("provider.endpoint is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// Run one breakdown query for a (site, date, dimension).
    async fn query(
        &self,
        site_ref: &str,
        date: NaiveDate,
        dimension: Dimension,
    ) -> Result<Vec<ResponseRow>> {
        let url = format!(
            "{}/sites/{}/query",
            self.base_url,
            urlencoding::encode(site_ref)
        );

        let request_body = QueryRequest {
            start_date: date.to_string(),
            end_date: date.to_string(),
            dimensions: [dimension.as_str()],
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();

        if status.is_success() {
            let result: QueryResponse = response.json().await.map_err(|e| {
                Error::fetch(
                    FetchErrorKind::Validation,
                    format!("failed to decode response: {}", e),
                )
            })?;
            Ok(result.rows)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(map_status_error(status, &error_text))
        }
    }

    /// Run a query with retry for transient failures only.
    ///
    /// Exponential backoff starting at 500ms, capped at 30s.
    async fn query_with_retry(
        &self,
        site_ref: &str,
        date: NaiveDate,
        dimension: Dimension,
    ) -> Result<Vec<ResponseRow>> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying provider query (attempt {}/{}), waiting {:?}",
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.query(site_ref, date, dimension).await {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    if e.fetch_kind().is_some_and(|k| k.is_retryable()) {
                        tracing::warn!(site = %site_ref, %date, "Transient provider error: {}", e);
                        last_error = Some(e);
                        continue;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::fetch(FetchErrorKind::Transient, "max retries exceeded")
        }))
    }
}

#[async_trait]
impl SearchAnalyticsProvider for HttpSearchProvider {
    async fn fetch_daily_totals(
        &self,
        site_ref: &str,
        date: NaiveDate,
    ) -> Result<Option<TotalsRow>> {
        let rows = self.query_with_retry(site_ref, date, Dimension::Date).await?;
        Ok(rows.first().map(|row| TotalsRow {
            clicks: row.clicks,
            impressions: row.impressions,
            ctr: row.ctr,
            position: row.position,
        }))
    }

    async fn fetch_page_breakdown(&self, site_ref: &str, date: NaiveDate) -> Result<Vec<PageRow>> {
        let rows = self.query_with_retry(site_ref, date, Dimension::Page).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.keys.first() {
                Some(page) => Some(PageRow {
                    page: page.clone(),
                    clicks: row.clicks,
                    impressions: row.impressions,
                    ctr: row.ctr,
                    position: row.position,
                }),
                None => {
                    // Malformed row: log and skip, not fatal to the batch
                    tracing::warn!(site = %site_ref, %date, "Page row missing key, skipping");
                    None
                }
            })
            .collect())
    }

    async fn fetch_query_breakdown(
        &self,
        site_ref: &str,
        date: NaiveDate,
    ) -> Result<Vec<QueryRow>> {
        let rows = self.query_with_retry(site_ref, date, Dimension::Query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.keys.first() {
                Some(query) => Some(QueryRow {
                    query: query.clone(),
                    clicks: row.clicks,
                    impressions: row.impressions,
                    ctr: row.ctr,
                    position: row.position,
                }),
                None => {
                    tracing::warn!(site = %site_ref, %date, "Query row missing key, skipping");
                    None
                }
            })
            .collect())
    }
}

/// Map a reqwest transport error onto the fetch taxonomy.
///
/// Timeouts and connection failures are transient by definition.
fn map_request_error(error: reqwest::Error) -> Error {
    Error::fetch(
        FetchErrorKind::Transient,
        format!("HTTP request failed: {}", error),
    )
}

/// Map an HTTP error status onto the fetch taxonomy.
fn map_status_error(status: reqwest::StatusCode, body: &str) -> Error {
    let kind = match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => FetchErrorKind::Auth,
        reqwest::StatusCode::NOT_FOUND => FetchErrorKind::NotFound,
        reqwest::StatusCode::TOO_MANY_REQUESTS => FetchErrorKind::Transient,
        s if s.is_server_error() => FetchErrorKind::Transient,
        _ => FetchErrorKind::Validation,
    };
    Error::fetch(kind, format!("API error ({}): {}", status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_valid_config() {
        let config = ProviderConfig::default();
        assert!(HttpSearchProvider::new(config).is_err());
    }

    #[test]
    fn test_client_with_valid_config() {
        let config = ProviderConfig {
            endpoint: Some("https://search.example.com/api".to_string()),
            api_key: Some("sk_live_test".to_string()),
            ..Default::default()
        };
        assert!(HttpSearchProvider::new(config).is_ok());
    }

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(
            map_status_error(reqwest::StatusCode::UNAUTHORIZED, "no").fetch_kind(),
            Some(FetchErrorKind::Auth)
        );
        assert_eq!(
            map_status_error(reqwest::StatusCode::NOT_FOUND, "no").fetch_kind(),
            Some(FetchErrorKind::NotFound)
        );
        assert_eq!(
            map_status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down").fetch_kind(),
            Some(FetchErrorKind::Transient)
        );
        assert_eq!(
            map_status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops").fetch_kind(),
            Some(FetchErrorKind::Transient)
        );
        assert_eq!(
            map_status_error(reqwest::StatusCode::BAD_REQUEST, "bad").fetch_kind(),
            Some(FetchErrorKind::Validation)
        );
    }

    #[test]
    fn test_response_row_decoding() {
        let body = r#"{"rows":[{"keys":["/pricing"],"clicks":12,"impressions":340,"ctr":0.035,"position":6.2}]}"#;
        let decoded: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.rows.len(), 1);
        assert_eq!(decoded.rows[0].keys[0], "/pricing");
        assert_eq!(decoded.rows[0].clicks, 12);
    }

    #[test]
    fn test_response_without_rows_is_empty() {
        let decoded: QueryResponse = serde_json::from_str("{}").unwrap();
        assert!(decoded.rows.is_empty());
    }
}
