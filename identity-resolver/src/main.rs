use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use identity_resolver::{
    config::Config, BatchIngestor, ChannelEventPublisher, InMemoryKeyLockService,
    InMemoryLiveBookStore, InMemoryRuleCatalog, IngestItem, LiveBookEvent, Resolver,
};

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

/// Reads one ingest item per line. Blank lines are ignored; lines that do
/// not parse are logged and skipped.
fn read_items(path: &Path) -> Result<Vec<IngestItem>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut items = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IngestItem>(&line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(line = number + 1, error = %e, "skipping unparseable input line"),
        }
    }
    Ok(items)
}

/// Drains published events until every publisher is gone, logging each.
fn spawn_event_logger(mut events: mpsc::Receiver<LiveBookEvent>) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = events.recv().await {
            seen += 1;
            match serde_json::to_string(&event) {
                Ok(json) => info!(event = %json, "live book event"),
                Err(e) => warn!(error = %e, "could not serialize event"),
            }
        }
        seen
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting identity resolver");

    let config = Config::init_from_env().context("failed to load configuration from environment")?;
    info!(?config, "configuration loaded");

    let scope_groups = config
        .parse_scope_groups()
        .context("invalid SCOPE_GROUPS definition")?;
    let catalog = InMemoryRuleCatalog::from_json_file(config.rules_path_buf())
        .context("failed to load rule catalog")?;
    let items = read_items(&config.input_path_buf())?;

    let (publisher, events) = ChannelEventPublisher::bounded(config.event_channel_capacity);
    let event_logger = spawn_event_logger(events);

    let store = Arc::new(InMemoryLiveBookStore::new());
    let resolver = Resolver::new(
        store.clone(),
        Arc::new(catalog),
        Arc::new(InMemoryKeyLockService::new(config.lock_timeout())),
        Arc::new(publisher),
        scope_groups,
        &config,
    );
    let ingestor = BatchIngestor::new(
        Arc::new(resolver),
        config.worker_count,
        config.max_conflict_retries,
    );

    let summary = ingestor.run(items).await;
    // Dropping the ingestor drops the last publisher and ends the logger.
    drop(ingestor);
    let events_seen = event_logger.await.context("event logger task failed")?;

    for failed in &summary.failures {
        warn!(
            index = failed.index,
            reference = %failed.reference,
            kind = failed.kind,
            reason = %failed.reason,
            attempts = failed.attempts,
            manual_review = failed.manual_review,
            "record failed"
        );
    }
    info!(
        profiles_created = summary.profiles_created,
        profiles_merged = summary.profiles_merged,
        offers_unique = summary.offers_unique,
        offers_duplicate = summary.offers_duplicate,
        failed = summary.failed(),
        skipped = summary.skipped,
        live_profiles = store.profile_count(),
        events = events_seen,
        "batch complete"
    );

    if let Some(reason) = summary.aborted {
        anyhow::bail!("batch aborted: {reason}");
    }
    Ok(())
}
