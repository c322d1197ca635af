pub mod api;
pub mod metrics;

pub use api::{
    parse_item, parse_ranked_ids, HackerNewsClient, HackerNewsItemData, BEST_STORIES_ENDPOINT,
};
pub use metrics::{ApiMetrics, EndpointMetrics, MetricsCollector, RequestMetrics};

#[cfg(test)]
mod tests;
