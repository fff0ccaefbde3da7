mod achievements;
mod bridges;
mod cli;
mod config;
mod config_file;
mod dedupe;
mod enrich;
mod error;
mod http;
mod lodestone;
mod loki;
mod parser;
mod pipeline;
mod text;
mod types;
mod util;

use std::io::{self, Read};

use clap::Parser;
use tracing::info;

use crate::bridges::discord::{DiscordWebhook, Notifier, StdoutNotifier};
use crate::bridges::webhook::{parse_json_text, run_intake_server};
use crate::cli::{Cli, Command};
use crate::config::{AppConfig, ConfigOverrides};
use crate::dedupe::{DedupeStore, SqliteDedupeStore};
use crate::error::{JoinWatchError, Result};
use crate::http::UreqFetcher;
use crate::loki::LokiClient;
use crate::pipeline::JoinPartyHandler;
use crate::util::{Clock, SystemClock};

/// Where the rendered block goes for this invocation.
enum Delivery<'a> {
    Stdout(StdoutNotifier),
    Discord(DiscordWebhook<'a, SystemClock>),
}

impl<'a> Delivery<'a> {
    fn select(config: &AppConfig, clock: &'a SystemClock, print: bool) -> Result<Self> {
        if print {
            return Ok(Delivery::Stdout(StdoutNotifier));
        }
        let url = config.require_webhook_url()?;
        Ok(Delivery::Discord(DiscordWebhook::new(
            url.to_string(),
            config.discord.username.clone(),
            config.discord.avatar_url.clone(),
            clock,
        )))
    }
}

impl Notifier for Delivery<'_> {
    fn deliver(&self, text: &str) -> Result<()> {
        match self {
            Delivery::Stdout(notifier) => notifier.deliver(text),
            Delivery::Discord(notifier) => notifier.deliver(text),
        }
    }
}

fn open_store(config: &AppConfig) -> Result<Option<SqliteDedupeStore>> {
    config
        .dedupe
        .as_ref()
        .map(|dedupe| SqliteDedupeStore::open_or_create(&dedupe.db_path))
        .transpose()
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("joinwatch=info".parse()?),
        )
        .init();

    let overrides = ConfigOverrides {
        default_world_name: cli.default_world.clone(),
        dedupe_db_path: cli.dedupe_db.clone(),
        no_lodestone: cli.no_lodestone,
    };
    let config = AppConfig::load(cli.config.as_deref(), &overrides)?;

    let clock = SystemClock;
    let fetcher = UreqFetcher::new(config.fetch_timeout_ms);
    let store = open_store(&config)?;
    let store_ref = store.as_ref().map(|store| store as &dyn DedupeStore);

    match cli.command {
        Command::Serve { bind, port } => {
            let notifier = Delivery::select(&config, &clock, false)?;
            let handler = JoinPartyHandler {
                config: &config,
                fetcher: &fetcher,
                clock: &clock,
                store: store_ref,
                notifier: &notifier,
            };
            run_intake_server(&bind, port, &handler)?;
        }

        Command::Run { print } => {
            let notifier = Delivery::select(&config, &clock, print)?;
            let handler = JoinPartyHandler {
                config: &config,
                fetcher: &fetcher,
                clock: &clock,
                store: store_ref,
                notifier: &notifier,
            };
            let mut body = String::new();
            io::stdin().read_to_string(&mut body)?;
            let response = handler.handle(&parse_json_text(&body));
            let summary = serde_json::json!({"status": response.status, "body": response.body});
            if print {
                eprintln!("{summary}");
            } else {
                println!("{summary}");
            }
            if response.status >= 500 {
                std::process::exit(1);
            }
        }

        Command::Poll { lookback, print } => {
            let base_url = config
                .loki
                .base_url
                .as_deref()
                .ok_or_else(|| JoinWatchError::Config("Missing LOKI_BASE_URL".to_string()))?;
            let query = config
                .loki
                .query
                .as_deref()
                .ok_or_else(|| JoinWatchError::Config("Missing LOKI_QUERY".to_string()))?;
            let lookback_seconds = lookback.unwrap_or(config.loki.lookback_seconds);
            let lines = LokiClient::new(base_url).recent_lines(query, lookback_seconds)?;
            info!(lines = lines.len(), lookback_seconds, "fetched log lines");

            let notifier = Delivery::select(&config, &clock, print)?;
            let handler = JoinPartyHandler {
                config: &config,
                fetcher: &fetcher,
                clock: &clock,
                store: store_ref,
                notifier: &notifier,
            };
            let outcome = handler.process_lines(&lines)?;
            let response = outcome.into_response();
            eprintln!("{}", response.body);
        }

        Command::Prune => {
            let store = store.as_ref().ok_or_else(|| {
                JoinWatchError::Config("Missing DEDUPE_DB_PATH (or --dedupe-db)".to_string())
            })?;
            let removed = store.purge_expired(clock.now_epoch_seconds())?;
            info!(removed, "pruned expired dedupe keys");
        }
    }
    Ok(())
}
