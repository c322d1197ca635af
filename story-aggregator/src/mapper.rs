use beststories_core::{Item, OutputRecord};
use chrono::{DateTime, Utc};

/// Projects a resolved item onto the externally visible record.
pub fn to_output(item: Item) -> OutputRecord {
    OutputRecord {
        title: item.title,
        uri: item.url,
        posted_by: item.by,
        time: format_timestamp(item.time),
        score: item.score,
        comment_count: item.descendants,
    }
}

/// Formats epoch seconds as a fixed-width ISO-8601 UTC timestamp with seven
/// fractional digits, e.g. `2021-01-01T00:00:00.0000000Z`. Values outside
/// the representable range fall back to the epoch.
pub fn format_timestamp(epoch_secs: i64) -> String {
    let time = DateTime::<Utc>::from_timestamp(epoch_secs, 0).unwrap_or_default();
    format!(
        "{}.{:07}Z",
        time.format("%Y-%m-%dT%H:%M:%S"),
        time.timestamp_subsec_nanos() / 100
    )
}
