use crate::error::CoreError;
use crate::types::{Item, ItemId};
use async_trait::async_trait;

/// The two remote reads the aggregation pipeline depends on.
#[async_trait]
pub trait StorySource: Send + Sync {
    /// Ids of the current best stories, in the remote's ranking order.
    async fn fetch_ranked_ids(&self) -> Result<Vec<ItemId>, CoreError>;

    /// Resolves one item. Deleted, dead or missing items are `Ok(None)`;
    /// only transport and decoding failures are errors.
    async fn fetch_item(&self, id: ItemId) -> Result<Option<Item>, CoreError>;
}
