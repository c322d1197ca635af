use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use async_trait::async_trait;
use beststories_core::{AppConfig, CoreError, HackerNewsApiError, Item, ItemId, StorySource};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use url::Url;

pub const BEST_STORIES_ENDPOINT: &str = "beststories.json";

const BEST_STORIES_METRIC: &str = "beststories";
const ITEM_METRIC: &str = "item";

/// Item as served by `item/{id}.json`. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HackerNewsItemData {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub descendants: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub dead: bool,
}

impl HackerNewsItemData {
    /// Converts the wire record into a resolved item. Deleted and dead
    /// items have been removed upstream and resolve to `None`.
    pub fn into_item(self) -> Option<Item> {
        if self.deleted || self.dead {
            return None;
        }
        Some(Item {
            id: ItemId(self.id),
            title: self.title,
            url: self.url,
            by: self.by.unwrap_or_default(),
            time: self.time.unwrap_or_default(),
            score: self.score.unwrap_or_default(),
            descendants: self.descendants.unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct HackerNewsClient {
    http_client: Client,
    base_url: Url,
    limiter: Option<Arc<Semaphore>>,
    metrics: Arc<MetricsCollector>,
}

impl HackerNewsClient {
    pub fn new(config: &AppConfig) -> Result<Self, CoreError> {
        let base_url = config.base_url()?;

        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()?;

        let limiter = match config.max_concurrent_requests {
            0 => None,
            permits => Some(Arc::new(Semaphore::new(permits))),
        };

        info!(
            "Hacker News client targeting {} (max in-flight requests: {})",
            base_url,
            if limiter.is_some() {
                config.max_concurrent_requests.to_string()
            } else {
                "unbounded".to_string()
            }
        );

        Ok(Self {
            http_client,
            base_url,
            limiter,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, CoreError> {
        self.base_url.join(endpoint).map_err(|_| {
            CoreError::HackerNewsApi(HackerNewsApiError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
            })
        })
    }

    pub fn item_endpoint(id: ItemId) -> String {
        format!("item/{}.json", id)
    }

    /// Issues a GET and returns the body, mapping non-success statuses onto
    /// `HackerNewsApiError`. The limiter permit is held until the body has
    /// been read, so the cap bounds open connections.
    async fn make_request(&self, endpoint: &str, metric: &str) -> Result<String, CoreError> {
        let url = self.endpoint_url(endpoint)?;

        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.clone().acquire_owned().await.map_err(|_| {
                CoreError::Internal {
                    message: "request limiter closed".to_string(),
                }
            })?),
            None => None,
        };

        let start_time = Instant::now();
        debug!("Requesting {}", url);
        let result = self.http_client.get(url).send().await;
        let response_time = start_time.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.record(metric, None, response_time, false).await;
                if e.is_timeout() {
                    warn!("Request to {} timed out", endpoint);
                    return Err(CoreError::HackerNewsApi(HackerNewsApiError::RequestTimeout));
                }
                error!("Network error for {}: {}", endpoint, e);
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        self.record(metric, Some(status.as_u16()), response_time, status.is_success())
            .await;

        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return Ok(response.text().await?);
        }

        if status == StatusCode::NOT_FOUND {
            debug!("{} answered 404", endpoint);
        } else {
            error!("Request failed with status: {} for {}", status, endpoint);
        }

        let error = if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(60);
            HackerNewsApiError::RateLimitExceeded { retry_after }
        } else if status.is_server_error() {
            HackerNewsApiError::ServerError {
                status_code: status.as_u16(),
            }
        } else {
            HackerNewsApiError::UnexpectedStatus {
                status_code: status.as_u16(),
                endpoint: endpoint.to_string(),
            }
        };
        Err(CoreError::HackerNewsApi(error))
    }

    async fn record(
        &self,
        metric: &str,
        status_code: Option<u16>,
        response_time: std::time::Duration,
        success: bool,
    ) {
        self.metrics
            .record_request(RequestMetrics {
                endpoint: metric.to_string(),
                status_code,
                response_time,
                success,
                not_found: status_code == Some(StatusCode::NOT_FOUND.as_u16()),
            })
            .await;
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }
}

/// Decodes the body of `beststories.json`. A literal `null` is an empty list.
pub fn parse_ranked_ids(body: &str) -> Result<Vec<ItemId>, CoreError> {
    let ids: Option<Vec<u64>> = serde_json::from_str(body).map_err(|e| {
        CoreError::HackerNewsApi(HackerNewsApiError::InvalidResponse {
            details: format!("Failed to parse best story ids: {}", e),
        })
    })?;
    Ok(ids.unwrap_or_default().into_iter().map(ItemId).collect())
}

/// Decodes the body of `item/{id}.json`. `null`, deleted and dead items
/// resolve to `None`.
pub fn parse_item(id: ItemId, body: &str) -> Result<Option<Item>, CoreError> {
    let data: Option<HackerNewsItemData> = serde_json::from_str(body).map_err(|e| {
        CoreError::HackerNewsApi(HackerNewsApiError::InvalidResponse {
            details: format!("Failed to parse item {}: {}", id, e),
        })
    })?;
    Ok(data
        .map(|mut data| {
            if data.id == 0 {
                data.id = id.0;
            }
            data
        })
        .and_then(HackerNewsItemData::into_item))
}

#[async_trait]
impl StorySource for HackerNewsClient {
    async fn fetch_ranked_ids(&self) -> Result<Vec<ItemId>, CoreError> {
        let body = self
            .make_request(BEST_STORIES_ENDPOINT, BEST_STORIES_METRIC)
            .await?;
        let ids = parse_ranked_ids(&body)?;
        info!("Retrieved {} best story ids", ids.len());
        Ok(ids)
    }

    async fn fetch_item(&self, id: ItemId) -> Result<Option<Item>, CoreError> {
        let endpoint = Self::item_endpoint(id);
        let body = match self.make_request(&endpoint, ITEM_METRIC).await {
            Ok(body) => body,
            Err(CoreError::HackerNewsApi(HackerNewsApiError::UnexpectedStatus {
                status_code: 404,
                ..
            })) => return Ok(None),
            Err(e) => return Err(e),
        };
        let item = parse_item(id, &body)?;
        if item.is_none() {
            debug!("Item {} is not available", id);
        }
        Ok(item)
    }
}
