use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a remote Hacker News item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A resolved story record. Items that could not be resolved are never
/// represented by this type; they surface as `None` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub title: Option<String>,
    pub url: Option<String>,
    pub by: String,
    /// Seconds since the Unix epoch. Zero for some legacy items.
    pub time: i64,
    pub score: i64,
    pub descendants: i64,
}

/// Externally visible shape of a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub title: Option<String>,
    pub uri: Option<String>,
    pub posted_by: String,
    /// ISO-8601 UTC, e.g. `2021-01-01T00:00:00.0000000Z`.
    pub time: String,
    pub score: i64,
    pub comment_count: i64,
}
