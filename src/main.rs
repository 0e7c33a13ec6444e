//! CLI entry point for the clipfetch tool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use clipfetch_core::{
    CaptchaBackoff, DEFAULT_DEBOUNCE, DiskExistence, DiskStorage, DownloadedRegistry,
    InProgressSlot, JsonFileStore, PendingQueue, ProcessState, Processor, ScrapeClient,
    StringSetStore, remove_video_state,
};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let store: Arc<dyn StringSetStore> =
        Arc::new(JsonFileStore::open(args.data_dir.join("state.json"))?);
    let queue = PendingQueue::new(store.clone());
    let registry = DownloadedRegistry::new(
        store.clone(),
        Arc::new(DiskStorage::new(".")),
        Arc::new(DiskExistence),
        args.media_dir.clone(),
    );
    let backoff = CaptchaBackoff::new(store, Duration::from_secs(args.backoff_mins * 60));

    match args.command {
        Command::Add { url } => {
            let entry = queue.submit(&url)?;
            println!("queued {} as {}", entry.url, entry.id);
        }
        Command::List => {
            let pending = queue.list()?;
            let downloaded = registry.list()?;

            println!("pending ({}):", pending.len());
            for (position, entry) in pending.iter().enumerate() {
                println!("  {position:3}  {}  {}", entry.id, entry.url);
            }
            println!("downloaded ({}):", downloaded.len());
            for entry in &downloaded {
                println!("       {}  {}", entry.id, entry.storage_uri);
            }
        }
        Command::Move { id, offset } => {
            let Some(entry) = queue.list()?.into_iter().find(|entry| entry.id == id) else {
                bail!("no queued link with id {id}");
            };
            queue.move_by(&entry, offset)?;
            println!("moved {id} by {offset}");
        }
        Command::Remove { id } => {
            let pending = queue.list()?;
            let downloaded = registry.list()?;
            let Some(state) = pending
                .into_iter()
                .map(clipfetch_core::VideoState::InPending)
                .chain(
                    downloaded
                        .into_iter()
                        .map(clipfetch_core::VideoState::Downloaded),
                )
                .find(|state| state.id() == id)
            else {
                bail!("no link or record with id {id}");
            };
            remove_video_state(&queue, &registry, &state)?;
            println!("removed {id}");
        }
        Command::Run => {
            let fetcher = Arc::new(ScrapeClient::new(Duration::from_millis(args.delay_ms))?);
            let processor = Processor::spawn(
                fetcher,
                queue,
                registry,
                Arc::new(InProgressSlot::new()),
                backoff,
                DEFAULT_DEBOUNCE,
            );

            let mut states = processor.subscribe();
            loop {
                states
                    .changed()
                    .await
                    .map_err(|_| anyhow::anyhow!("processor stopped unexpectedly"))?;
                let state = states.borrow_and_update().clone();
                match state {
                    Some(ProcessState::Processing(entry)) => {
                        info!(id = %entry.id, url = %entry.url, "downloading");
                    }
                    Some(ProcessState::Processed(entry)) => {
                        info!(id = %entry.id, uri = %entry.storage_uri, "downloaded");
                    }
                    Some(ProcessState::Finished) => {
                        info!("queue drained");
                        break;
                    }
                    Some(error_state) => {
                        bail!("download halted: {error_state:?}");
                    }
                    None => {}
                }
            }
        }
    }

    Ok(())
}
