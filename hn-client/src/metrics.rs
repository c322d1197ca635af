use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Requests answered with 404.
    pub not_found_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
    pub last_request_time: Option<SystemTime>,
    pub requests_by_endpoint: HashMap<String, EndpointMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub max_response_time: Duration,
}

#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Endpoint family, e.g. `beststories` or `item`. Never a per-id path.
    pub endpoint: String,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub success: bool,
    pub not_found: bool,
}

impl EndpointMetrics {
    fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            total_response_time: Duration::ZERO,
            max_response_time: Duration::ZERO,
        }
    }

    fn update(&mut self, metrics: &RequestMetrics) {
        self.request_count += 1;
        self.total_response_time += metrics.response_time;
        self.max_response_time = self.max_response_time.max(metrics.response_time);

        if metrics.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            Duration::ZERO
        } else {
            self.total_response_time / self.request_count as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.request_count as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<ApiMetrics>>,
    total_response_time: Arc<RwLock<Duration>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, request_metrics: RequestMetrics) {
        let mut metrics = self.metrics.write().await;
        let mut total_response_time = self.total_response_time.write().await;

        metrics.total_requests += 1;
        metrics.last_request_time = Some(SystemTime::now());

        if request_metrics.success {
            metrics.successful_requests += 1;
        } else if request_metrics.not_found {
            metrics.not_found_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }

        *total_response_time += request_metrics.response_time;
        metrics.average_response_time = *total_response_time / metrics.total_requests as u32;

        metrics
            .requests_by_endpoint
            .entry(request_metrics.endpoint.clone())
            .or_insert_with(EndpointMetrics::new)
            .update(&request_metrics);
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.read().await.clone()
    }
}
