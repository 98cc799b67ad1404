//! # Elasticsearch Client
//!
//! HTTP adapter for both backend seams. The client is constructed
//! explicitly and shared by handle; [`supervise`] keeps it healthy by
//! pinging on an interval and rebuilding the connection pool with
//! exponential backoff when the cluster stops answering.

use super::{BackendError, DocumentIndex, SearchBackend};
use crate::config::SearchConfig;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

pub struct ElasticClient {
    base_url: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
    http: RwLock<reqwest::Client>,
}

impl ElasticClient {
    pub fn new(config: &SearchConfig) -> Result<Self, BackendError> {
        let credentials = match (&config.username, &config.password) {
            (Some(user), password) => Some((user.clone(), password.clone().unwrap_or_default())),
            _ => None,
        };
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials,
            timeout: config.timeout(),
            http: RwLock::new(build_http(config.timeout())?),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let http = self.http.read().await.clone();
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let request = http.request(method, url);
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    /// Cheap liveness probe against the cluster root.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let response = self
            .request(Method::GET, "/")
            .await
            .send()
            .await
            .map_err(classify)?;
        read_json(response).await.map(|_| ())
    }

    /// Drop the pooled connections and build a fresh client, then probe it.
    pub async fn reconnect(&self) -> Result<(), BackendError> {
        let fresh = build_http(self.timeout)?;
        *self.http.write().await = fresh;
        tracing::info!("Rebuilt search client for {}", self.base_url);
        self.ping().await
    }

    /// Create `index` with `mappings` unless it already exists. Returns `true` if created.
    pub async fn ensure_index(&self, index: &str, mappings: &Value) -> Result<bool, BackendError> {
        let exists = self
            .request(Method::HEAD, index)
            .await
            .send()
            .await
            .map_err(classify)?;
        if index_exists(exists.status())? {
            return Ok(false);
        }

        let response = self
            .request(Method::PUT, index)
            .await
            .json(&serde_json::json!({ "mappings": mappings }))
            .send()
            .await
            .map_err(classify)?;
        read_json(response).await?;
        tracing::info!("Created index '{}'", index);
        Ok(true)
    }
}

#[async_trait::async_trait]
impl SearchBackend for ElasticClient {
    async fn search(&self, index: &str, body: &Value) -> Result<Value, BackendError> {
        let response = self
            .request(Method::POST, &format!("{}/_search", index))
            .await
            .json(body)
            .send()
            .await
            .map_err(classify)?;
        read_json(response).await
    }
}

#[async_trait::async_trait]
impl DocumentIndex for ElasticClient {
    async fn index(&self, index: &str, document: &Value) -> Result<String, BackendError> {
        let response = self
            .request(Method::POST, &format!("{}/_doc", index))
            .await
            .json(document)
            .send()
            .await
            .map_err(classify)?;
        let body = read_json(response).await?;
        body.get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Query("index response without _id".into()))
    }
}

/// Ping every `interval`; on failure, reconnect with exponential backoff until it succeeds.
pub async fn supervise(client: Arc<ElasticClient>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Err(err) = client.ping().await else {
            continue;
        };
        tracing::warn!("Search cluster {} unhealthy: {}", client.base_url(), err);

        let mut delay = Duration::from_secs(1);
        loop {
            tokio::time::sleep(delay).await;
            match client.reconnect().await {
                Ok(()) => {
                    tracing::info!("Search cluster {} reachable again", client.base_url());
                    break;
                }
                Err(err) => {
                    tracing::warn!("Reconnect to {} failed: {}", client.base_url(), err);
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Unavailable(format!("cannot build HTTP client: {}", e)))
}

fn classify(err: reqwest::Error) -> BackendError {
    if err.is_connect() || err.is_timeout() {
        BackendError::Unavailable(err.to_string())
    } else {
        BackendError::Query(err.to_string())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, BackendError> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(classify);
    }
    let text = response.text().await.unwrap_or_default();
    Err(status_error(status, &text))
}

/// Interpret a `HEAD /<index>` status. Only 404 means missing.
fn index_exists(status: StatusCode) -> Result<bool, BackendError> {
    match status {
        status if status.is_success() => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        status => Err(status_error(status, "index existence check failed")),
    }
}

fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = format!("{}: {}", status, body);
    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT | StatusCode::BAD_GATEWAY => {
            BackendError::Unavailable(message)
        }
        _ => BackendError::Query(message),
    }
}
