//! `werewolf`: play, resume and evaluate LLM Werewolf games.
//!
//! ```bash
//! # One game with the configured default models
//! werewolf run --v-models flash --w-models gpt4o
//!
//! # Continue games that stopped on an error
//! werewolf resume logs/session_20240601_120000_1a2b3c4d
//!
//! # Every pairing, five games each, skipping mirror matches
//! werewolf eval --v-models flash,pro1.5 --w-models flash,gpt4o --num-games 5 --arena
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use werewolf_agents::{GameConfig, RoutedBackend, Runner};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; every field is optional
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Seed for role dealing, speaker choice and roster shuffling
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Concurrent decisions per fanned-out phase
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a single game
    Run {
        /// Villager model alias (defaults to the first configured)
        #[arg(long)]
        v_models: Option<String>,

        /// Werewolf model alias (defaults to the first configured)
        #[arg(long)]
        w_models: Option<String>,
    },

    /// Resume saved sessions
    Resume {
        /// Session directories
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// Play every villager × werewolf model pairing
    Eval {
        /// Comma-separated villager model aliases
        #[arg(long, value_delimiter = ',')]
        v_models: Vec<String>,

        /// Comma-separated werewolf model aliases
        #[arg(long, value_delimiter = ',')]
        w_models: Vec<String>,

        /// Games per pairing
        #[arg(long, default_value_t = 1)]
        num_games: usize,

        /// Skip pairings of a model against itself
        #[arg(long, default_value_t = false)]
        arena: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = GameConfig::load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }

    let backend = Arc::new(RoutedBackend::from_config(&config.providers)?);
    let default_villager = config.villager_models.first().cloned();
    let default_werewolf = config.werewolf_models.first().cloned();
    let configured_villagers = config.villager_models.clone();
    let configured_werewolves = config.werewolf_models.clone();
    let runner = Runner::new(config, backend)?;

    match args.command {
        Command::Run { v_models, w_models } => {
            let (Some(villager), Some(werewolf)) =
                (v_models.or(default_villager), w_models.or(default_werewolf))
            else {
                bail!("no villager or werewolf model configured");
            };
            let report = runner.run_game(&villager, &werewolf).await?;
            match (&report.winner, &report.error) {
                (Some(winner), _) => info!(%winner, dir = %report.log_dir.display(), "Game complete"),
                (None, error) => info!(error = ?error, dir = %report.log_dir.display(), "Game incomplete"),
            }
        }
        Command::Resume { dirs } => {
            let report = runner.resume_games(&dirs).await;
            info!(
                successful = report.successful.len(),
                failed = report.failed.len(),
                invalid = report.invalid.len(),
                "Resume finished"
            );
            for dir in &report.failed {
                info!(dir = %dir.display(), "Failed");
            }
            for dir in &report.invalid {
                info!(dir = %dir.display(), "Invalid");
            }
        }
        Command::Eval {
            v_models,
            w_models,
            num_games,
            arena,
        } => {
            let villagers = if v_models.is_empty() { configured_villagers } else { v_models };
            let werewolves = if w_models.is_empty() { configured_werewolves } else { w_models };
            let results = runner.evaluate(&villagers, &werewolves, num_games, arena).await?;
            info!(results = %results.display(), "Evaluation finished");
        }
    }

    Ok(())
}
