//! visual-search - command-line entry point
//!
//! Indexes every file of a reference directory, runs one search for a query
//! file and prints the outcome as JSON. Ctrl-C cancels the search.
//!
//! Usage: `visual-search <reference-dir> <query-file>`

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visual_search::{recognizer::MemoryRecognizer, Query, QueueConfig, SearchQueue};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visual_search=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(reference_dir), Some(query_path)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: visual-search <reference-dir> <query-file>");
    };

    // Load configuration
    let config = QueueConfig::from_env()?;
    info!("Loaded configuration: max_concurrent={}", config.max_concurrent);

    let recognizer = Arc::new(MemoryRecognizer::new());
    let indexed = recognizer
        .index_dir(Path::new(&reference_dir))
        .await
        .with_context(|| format!("Failed to index references in {}", reference_dir))?;
    recognizer.open();
    info!("Indexed {} references from {}", indexed, reference_dir);

    let query = tokio::fs::read(&query_path)
        .await
        .with_context(|| format!("Failed to read query {}", query_path))?;

    let queue = SearchQueue::new(recognizer, config);
    let task = queue.task(Query::new(query));
    task.set_progress(|percent| debug!(percent, "Search progress"));
    queue.submit(Arc::clone(&task))?;

    let outcome = tokio::select! {
        outcome = task.wait() => outcome.clone(),
        _ = tokio::signal::ctrl_c() => {
            queue.cancel_all();
            task.wait().await.clone()
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome.report())?);
    Ok(())
}
