//! The "best stories" aggregation pipeline.
//!
//! A request for the top `n` stories reads the ranked id list through the
//! shared [`StoryCache`], resolves the first `2 * n` ids concurrently (each
//! through its own cache entry), drops the ones that did not resolve, sorts
//! the rest by score and keeps `n`. Over-fetching is best effort: if more
//! than half of the candidates are gone, fewer than `n` records come back.

pub mod mapper;

pub use mapper::{format_timestamp, to_output};

use beststories_core::{AppConfig, CoreError, Item, ItemId, OutputRecord, StorySource};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ttl_cache::{CacheStats, TtlCache};

/// Cache key of the ranked id list.
pub const BEST_STORY_IDS_KEY: &str = "beststories_ids";

/// How many candidates are resolved per requested story.
pub const CANDIDATE_FACTOR: usize = 2;

pub type IdListCache = TtlCache<&'static str, Arc<Vec<ItemId>>, CoreError>;
pub type ItemCache = TtlCache<ItemId, Option<Item>, CoreError>;

/// Process-wide cache state, owned by whoever builds the aggregator and
/// shared between concurrent requests.
#[derive(Debug)]
pub struct StoryCache {
    ids: IdListCache,
    items: ItemCache,
}

impl StoryCache {
    pub fn new() -> Self {
        Self {
            ids: TtlCache::new("best_story_ids"),
            items: TtlCache::new("items"),
        }
    }

    pub fn ids(&self) -> &IdListCache {
        &self.ids
    }

    pub fn items(&self) -> &ItemCache {
        &self.items
    }

    pub fn id_list_stats(&self) -> CacheStats {
        self.ids.stats()
    }

    pub fn item_stats(&self) -> CacheStats {
        self.items.stats()
    }
}

impl Default for StoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub id_list_ttl: Duration,
    pub item_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for AggregatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            id_list_ttl: config.id_list_ttl(),
            item_ttl: config.item_ttl(),
        }
    }
}

pub struct Aggregator<S> {
    source: Arc<S>,
    cache: Arc<StoryCache>,
    config: AggregatorConfig,
}

impl<S> Clone for Aggregator<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> Aggregator<S>
where
    S: StorySource + 'static,
{
    pub fn new(source: Arc<S>, cache: Arc<StoryCache>, config: AggregatorConfig) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<StoryCache> {
        &self.cache
    }

    /// Returns up to `n` stories sorted by score, highest first.
    ///
    /// Fails only when the ranked id list cannot be obtained. Items that are
    /// missing upstream, or whose fetch failed, are left out.
    ///
    /// Dropping the returned future aborts every outstanding item fetch.
    pub async fn get_top(&self, n: NonZeroUsize) -> Result<Vec<OutputRecord>, CoreError> {
        let started = Instant::now();
        let n = n.get();

        let purged = self.cache.items.purge_expired();
        if purged > 0 {
            debug!("Dropped {} expired items before request", purged);
        }

        let ids = self.ranked_ids().await?;
        if ids.is_empty() {
            info!("Best story list is empty");
            return Ok(Vec::new());
        }

        let candidates = &ids[..ids.len().min(n.saturating_mul(CANDIDATE_FACTOR))];
        let resolved = self.resolve_items(candidates).await;
        let resolved_count = resolved.len();

        let stories: Vec<OutputRecord> = rank(resolved, n).into_iter().map(to_output).collect();

        let item_stats = self.cache.item_stats();
        info!(
            requested = n,
            candidates = candidates.len(),
            resolved = resolved_count,
            returned = stories.len(),
            item_cache_hits = item_stats.hits,
            item_cache_misses = item_stats.misses,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Assembled best stories"
        );
        Ok(stories)
    }

    /// Same as [`Aggregator::get_top`], but gives up with
    /// [`CoreError::Cancelled`] as soon as `cancel` fires.
    pub async fn get_top_with_cancel(
        &self,
        n: NonZeroUsize,
        cancel: &CancellationToken,
    ) -> Result<Vec<OutputRecord>, CoreError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Best stories request cancelled");
                Err(CoreError::Cancelled)
            }
            result = self.get_top(n) => result,
        }
    }

    async fn ranked_ids(&self) -> Result<Arc<Vec<ItemId>>, CoreError> {
        self.cache
            .ids
            .get_or_compute(BEST_STORY_IDS_KEY, self.config.id_list_ttl, || async {
                self.source.fetch_ranked_ids().await.map(Arc::new)
            })
            .await
            .map_err(CoreError::UpstreamUnavailable)
    }

    /// Resolves every candidate concurrently and returns the available items
    /// in candidate order.
    async fn resolve_items(&self, candidates: &[ItemId]) -> Vec<Item> {
        let mut tasks = JoinSet::new();
        for (position, &id) in candidates.iter().enumerate() {
            let source = self.source.clone();
            let cache = self.cache.clone();
            let ttl = self.config.item_ttl;
            tasks.spawn(async move {
                let item = cache
                    .items
                    .get_or_compute(id, ttl, || source.fetch_item(id))
                    .await;
                (position, id, item)
            });
        }

        let mut slots: Vec<Option<Item>> = vec![None; candidates.len()];
        let mut absent = 0usize;
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, _, Ok(Some(item)))) => slots[position] = Some(item),
                Ok((_, id, Ok(None))) => {
                    absent += 1;
                    debug!("Item {} is unavailable, skipping", id);
                }
                Ok((_, id, Err(e))) => {
                    failed += 1;
                    warn!("Skipping item {}: {}", id, e);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Item fetch task did not complete: {}", e);
                }
            }
        }

        if absent + failed > 0 {
            debug!(absent, failed, "Some candidates did not resolve");
        }
        slots.into_iter().flatten().collect()
    }
}

/// Sorts by score, highest first, and keeps the first `n`. Items with equal
/// scores stay in their incoming order.
pub fn rank(mut items: Vec<Item>, n: usize) -> Vec<Item> {
    items.sort_by(|a, b| b.score.cmp(&a.score));
    items.truncate(n);
    items
}
