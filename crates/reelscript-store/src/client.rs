//! Document store REST client.
//!
//! Firestore over REST with token caching, HTTP pooling sized for the worker
//! pool, exponential retry, and request metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::TokenCache;
use crate::types::{
    Document, ListDocumentsResponse, RunAggregationQueryElement, RunAggregationQueryRequest,
    RunQueryElement, RunQueryRequest, StructuredQuery, Value,
};
use crate::types::{Aggregation, CountAggregation, StructuredAggregationQuery};

/// Connection attempts made at boot before giving up.
const CONNECT_ATTEMPTS: u32 = 5;

/// Base delay between connection attempts (doubles each attempt).
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Store client configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// GCP project id.
    pub project_id: String,
    /// Database id (usually "(default)").
    pub database_id: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Pool size; sized for the worker concurrency.
    pub pool_max_idle: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .map_err(|_| StoreError::auth_error("GCP_PROJECT_ID must be set"))?;
        if project_id.is_empty() {
            return Err(StoreError::auth_error("GCP_PROJECT_ID cannot be empty"));
        }

        let pool_max_idle = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5usize)
            .max(2);

        Ok(Self {
            project_id,
            database_id: std::env::var("STORE_DATABASE_ID").unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle,
            retry: RetryConfig::from_env(),
        })
    }
}

/// Document store client.
pub struct StoreClient {
    http: Client,
    config: StoreConfig,
    /// `.../documents` resource prefix.
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl Clone for StoreClient {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            config: self.config.clone(),
            base_url: self.base_url.clone(),
            token_cache: Arc::clone(&self.token_cache),
        }
    }
}

impl StoreClient {
    /// Create a new client and verify credentials, retrying with bounded
    /// exponential backoff (five attempts, base two seconds).
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let client = Self::new(config)?;

        let mut delay = CONNECT_BASE_DELAY;
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match client.token_cache.get_token().await {
                Ok(_) => {
                    info!("Connected to document store (attempt {})", attempt);
                    return Ok(client);
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        "Store connection failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    last_err = Some(e);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| StoreError::request_failed("store connection failed")))
    }

    /// Create from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(StoreConfig::from_env()?).await
    }

    fn new(config: StoreConfig) -> StoreResult<Self> {
        let auth = Self::create_auth_provider()?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(config.pool_max_idle)
            .user_agent(concat!("reelscript-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        let base_url = format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents",
            config.project_id, config.database_id
        );

        Ok(Self {
            http,
            config,
            base_url,
            token_cache: Arc::new(TokenCache::new(auth)),
        })
    }

    fn create_auth_provider() -> StoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env()
            .map_err(|e| StoreError::auth_error(format!("Failed to load service account: {}", e)))?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(StoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Point it at a service account JSON file.",
            )),
        }
    }

    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Send an authorized request, refreshing the token once if the server
    /// reports an expired access token.
    async fn authorized_send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> StoreResult<reqwest::Response> {
        let build = |token: &str| {
            let mut req = self.http.request(method.clone(), url).bearer_auth(token);
            if let Some(b) = body {
                req = req.json(b);
            }
            req
        };

        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            if Self::is_access_token_expired(&text) {
                self.token_cache.invalidate().await;
                let token = self.token_cache.get_token().await?;
                return Ok(build(&token).send().await?);
            }
            return Err(StoreError::from_http_status(401, format!("{} failed: {}", url, text)));
        }

        Ok(response)
    }

    async fn error_from(url: &str, response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StoreError::from_http_status(status, format!("{} failed with status {}: {}", url, status, body))
    }

    // =========================================================================
    // CRUD operations
    // =========================================================================

    /// Get a document; `None` when it does not exist.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> StoreResult<Option<Document>> {
        let url = self.document_path(collection, doc_id);

        with_retry(&self.config.retry, "get_document", || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::GET, &url, None).await?;
            let status = response.status();
            record_request("get_document", status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    /// Create a document; fails with `AlreadyExists` on id collision.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> StoreResult<Document> {
        let url = format!("{}/{}?documentId={}", self.base_url, collection, doc_id);
        let body = serde_json::to_value(Document::new(fields))?;

        with_retry(&self.config.retry, "create_document", || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::POST, &url, Some(&body)).await?;
            let status = response.status();
            record_request("create_document", status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => {
                    Err(StoreError::AlreadyExists(format!("{}/{}", collection, doc_id)))
                }
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    /// Update (merge) a document. With an update mask only the named fields
    /// are touched; without one the whole document is replaced.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
    ) -> StoreResult<Document> {
        self.update_inner(collection, doc_id, fields, update_mask, None).await
    }

    /// Update with optimistic concurrency: the write only lands if the
    /// document's update time still matches.
    pub async fn update_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
        update_time: &str,
    ) -> StoreResult<Document> {
        self.update_inner(collection, doc_id, fields, update_mask, Some(update_time)).await
    }

    async fn update_inner(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
        update_time: Option<&str>,
    ) -> StoreResult<Document> {
        let mut url = self.document_path(collection, doc_id);
        let mut params: Vec<String> = Vec::new();
        if let Some(mask) = update_mask {
            params.extend(mask.iter().map(|f| format!("updateMask.fieldPaths={}", f)));
        }
        if let Some(ts) = update_time {
            params.push(format!("currentDocument.updateTime={}", urlencoding::encode(ts)));
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        let body = serde_json::to_value(Document::new(fields))?;
        let operation = if update_time.is_some() { "update_with_precondition" } else { "update_document" };

        with_retry(&self.config.retry, operation, || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::PATCH, &url, Some(&body)).await?;
            let status = response.status();
            record_request(operation, status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let text = response.text().await.unwrap_or_default();
                    Err(StoreError::PreconditionFailed(text))
                }
                StatusCode::NOT_FOUND => {
                    Err(StoreError::not_found(format!("{}/{}", collection, doc_id)))
                }
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    /// Delete a document; idempotent.
    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> StoreResult<()> {
        let url = self.document_path(collection, doc_id);

        with_retry(&self.config.retry, "delete_document", || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::DELETE, &url, None).await?;
            let status = response.status();
            record_request("delete_document", status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
                StatusCode::NOT_FOUND => {
                    debug!("Document {}/{} already deleted", collection, doc_id);
                    Ok(())
                }
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    /// List documents in a collection (paged).
    pub async fn list_documents(
        &self,
        collection: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> StoreResult<ListDocumentsResponse> {
        let mut url = format!("{}/{}", self.base_url, collection);
        let mut params = Vec::new();
        if let Some(size) = page_size {
            params.push(format!("pageSize={}", size));
        }
        if let Some(token) = page_token {
            params.push(format!("pageToken={}", token));
        }
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        with_retry(&self.config.retry, "list_documents", || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::GET, &url, None).await?;
            let status = response.status();
            record_request("list_documents", status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK => Ok(response.json().await?),
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a structured query and return matching documents.
    pub async fn run_query(&self, query: StructuredQuery) -> StoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let body = serde_json::to_value(RunQueryRequest { structured_query: query })?;

        with_retry(&self.config.retry, "run_query", || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::POST, &url, Some(&body)).await?;
            let status = response.status();
            record_request("run_query", status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK => {
                    let elements: Vec<RunQueryElement> = response.json().await?;
                    Ok(elements.into_iter().filter_map(|e| e.document).collect())
                }
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    /// Run the query and return the first match, if any.
    pub async fn find_one(&self, query: StructuredQuery) -> StoreResult<Option<Document>> {
        let docs = self.run_query(query.with_limit(1)).await?;
        Ok(docs.into_iter().next())
    }

    /// Count documents matching a query via a server-side aggregation.
    pub async fn count(&self, query: StructuredQuery) -> StoreResult<u64> {
        let url = format!("{}:runAggregationQuery", self.base_url);
        let body = serde_json::to_value(RunAggregationQueryRequest {
            structured_aggregation_query: StructuredAggregationQuery {
                structured_query: query,
                aggregations: vec![Aggregation {
                    count: CountAggregation {},
                    alias: "count".to_string(),
                }],
            },
        })?;

        with_retry(&self.config.retry, "count", || async {
            let start = Instant::now();
            let response = self.authorized_send(Method::POST, &url, Some(&body)).await?;
            let status = response.status();
            record_request("count", status.as_u16(), start.elapsed().as_millis() as f64);

            match status {
                StatusCode::OK => {
                    let elements: Vec<RunAggregationQueryElement> = response.json().await?;
                    let count = elements
                        .iter()
                        .filter_map(|e| e.result.as_ref())
                        .filter_map(|r| r.aggregate_fields.get("count"))
                        .filter_map(|v| match v {
                            Value::IntegerValue(s) => s.parse::<u64>().ok(),
                            _ => None,
                        })
                        .next()
                        .ok_or_else(|| StoreError::invalid_response("no count in aggregation reply"))?;
                    Ok(count)
                }
                _ => Err(Self::error_from(&url, response).await),
            }
        })
        .await
    }

    /// Cheap connectivity probe for readiness checks.
    pub async fn ping(&self) -> StoreResult<()> {
        self.token_cache.get_token().await.map(|_| ())
    }
}
