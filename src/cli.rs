use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "joinwatch")]
#[command(about = "Announce party joins from game chat logs, enriched with public profile data", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// JSON config file; environment variables override its values.
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// World assumed for joiners whose line omits it.
    #[arg(long, global = true)]
    pub(crate) default_world: Option<String>,
    /// Skip profile lookups and send names only.
    #[arg(long, global = true)]
    pub(crate) no_lodestone: bool,
    /// SQLite file that remembers already-announced lines.
    #[arg(long, global = true)]
    pub(crate) dedupe_db: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Accept log-shipper HTTP posts and notify for each batch.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Process one JSON payload read from stdin.
    Run {
        /// Print the notification instead of posting it.
        #[arg(long)]
        print: bool,
    },

    /// Pull recent lines from Loki and process them as one batch.
    Poll {
        /// Window to query, in seconds.
        #[arg(long)]
        lookback: Option<u64>,
        #[arg(long)]
        print: bool,
    },

    /// Delete expired dedupe keys.
    Prune,
}
