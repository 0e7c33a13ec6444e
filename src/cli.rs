//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Queue-driven downloader for short-form video share links.
///
/// Clipfetch keeps a persistent queue of share links and works through it
/// one download at a time, recording completed videos in a local registry.
#[derive(Parser, Debug)]
#[command(name = "clipfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory holding the persisted queue and registry state
    #[arg(long, default_value = ".clipfetch")]
    pub data_dir: PathBuf,

    /// Directory downloaded videos are written into
    #[arg(long, default_value = "videos")]
    pub media_dir: String,

    /// Pause before each outgoing request in milliseconds (max 60000)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub delay_ms: u64,

    /// Cooldown after a captcha challenge in minutes (1-1440)
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=1440))]
    pub backoff_mins: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level operations.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue a share link for download
    Add {
        /// The http(s) share link
        url: String,
    },
    /// Show the queue and the downloaded registry
    List,
    /// Reposition a queued link by a signed number of slots
    Move {
        /// Id of the queued link
        id: String,
        /// Slots to move by; negative moves earlier
        #[arg(allow_hyphen_values = true)]
        offset: isize,
    },
    /// Remove a queued link or a downloaded record
    Remove {
        /// Id of the link or record
        id: String,
    },
    /// Work through the queue until it is empty or a download fails
    Run,
}
