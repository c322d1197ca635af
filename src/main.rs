use beststories_core::{AppConfig, CoreError, ErrorReporter, OutputRecord};
use clap::Parser;
use hn_client::HackerNewsClient;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use story_aggregator::{Aggregator, AggregatorConfig, StoryCache};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "beststories=info,story_aggregator=info,hn_client=info,ttl_cache=info";

/// Prints the highest scoring Hacker News best stories as JSON.
#[derive(Debug, Parser)]
#[command(name = "beststories", version, about)]
struct Args {
    /// Number of stories to return
    #[arg(allow_negative_numbers = true)]
    n: i64,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "BESTSTORIES_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let reporter = ErrorReporter::new();

    let result = run(args).await.and_then(|stories| {
        serde_json::to_string_pretty(&stories).map_err(CoreError::Serialization)
    });
    match result {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", reporter.report_error(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<Vec<OutputRecord>, CoreError> {
    let config = AppConfig::load(args.config.as_deref())?;
    let n = requested_count(args.n, config.max_stories)?;

    tracing::info!("Fetching top {} best stories from {}", n, config.base_url);

    let client = Arc::new(HackerNewsClient::new(&config)?);
    let aggregator = Aggregator::new(
        client.clone(),
        Arc::new(StoryCache::new()),
        AggregatorConfig::from(&config),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let stories = aggregator.get_top_with_cancel(n, &cancel).await?;

    let metrics = client.get_metrics().await;
    tracing::debug!(
        requests = metrics.total_requests,
        failed = metrics.failed_requests,
        not_found = metrics.not_found_requests,
        "Upstream usage"
    );
    for (endpoint, usage) in &metrics.requests_by_endpoint {
        tracing::debug!(
            endpoint = endpoint.as_str(),
            requests = usage.request_count,
            success_rate = usage.success_rate(),
            average_ms = usage.average_response_time().as_millis() as u64,
            max_ms = usage.max_response_time.as_millis() as u64,
            "Endpoint usage"
        );
    }

    require_stories(stories)
}

fn require_stories(stories: Vec<OutputRecord>) -> Result<Vec<OutputRecord>, CoreError> {
    if stories.is_empty() {
        return Err(CoreError::NotFound {
            resource: "stories".to_string(),
        });
    }
    Ok(stories)
}

fn requested_count(n: i64, max: usize) -> Result<NonZeroUsize, CoreError> {
    if n <= 0 {
        return Err(CoreError::InvalidInput {
            message: "number of the top n stories must be greater than zero.".to_string(),
        });
    }
    usize::try_from(n)
        .ok()
        .filter(|n| *n <= max)
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| CoreError::InvalidInput {
            message: format!("number of the top n stories cannot be greater than {}.", max),
        })
}
