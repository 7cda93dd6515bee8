//! Drivers: play one game, resume saved games, run model evaluations.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use moderator::{
    deal_roles, load_game, new_session_id, prepare_resume, save_game, PersistenceError, Session, Winner,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::backend::GenerationBackend;
use crate::config::GameConfig;
use crate::game_master::{GameMaster, GameSettings};
use crate::gateway::DecisionGateway;
use crate::prompts::PromptLibrary;

/// Result of playing one session to its end or to a fatal error.
#[derive(Debug, Clone)]
pub struct GameReport {
    pub session_id: String,
    pub winner: Option<Winner>,
    pub error: Option<String>,
    pub log_dir: PathBuf,
}

/// Outcome of resuming a batch of session directories.
#[derive(Debug, Clone, Default)]
pub struct ResumeReport {
    pub successful: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Directories holding no loadable snapshot.
    pub invalid: Vec<PathBuf>,
}

/// One line of an evaluation results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub villager_model: String,
    pub werewolf_model: String,
    pub winner: Option<Winner>,
    pub log_dir: PathBuf,
}

pub struct Runner {
    config: GameConfig,
    gateway: Arc<DecisionGateway>,
    games_started: AtomicU64,
}

impl Runner {
    pub fn new(config: GameConfig, backend: Arc<dyn GenerationBackend>) -> Result<Self> {
        let prompts = PromptLibrary::new().context("Failed to build prompt library")?;
        let gateway = DecisionGateway::new(backend, prompts, config.retry_policy());
        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            games_started: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Deal a new game between two model aliases and play it out.
    pub async fn run_game(&self, villager_model: &str, werewolf_model: &str) -> Result<GameReport> {
        let mut rng = self.next_rng();
        let agents = deal_roles(
            &self.config.player_names,
            self.config.num_players,
            &self.config.resolve_model(villager_model),
            &self.config.resolve_model(werewolf_model),
            &mut rng,
        )?;

        let session_id = new_session_id();
        let session = Session::new(session_id.clone(), agents)?;
        let dir = self.session_dir(&session_id);
        info!(%session_id, villager_model, werewolf_model, dir = %dir.display(), "Starting game");
        self.play(session, dir, rng).await
    }

    /// Continue every session in `dirs` from its last completed round.
    pub async fn resume_games(&self, dirs: &[PathBuf]) -> ResumeReport {
        let mut report = ResumeReport::default();
        for dir in dirs {
            let mut session = match load_game(dir) {
                Ok(session) => session,
                Err(PersistenceError::NotFound { .. }) => {
                    warn!(dir = %dir.display(), "No snapshot found");
                    report.invalid.push(dir.clone());
                    continue;
                }
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "Snapshot could not be loaded");
                    report.invalid.push(dir.clone());
                    continue;
                }
            };

            prepare_resume(&mut session);
            info!(session_id = %session.session_id, rounds = session.rounds.len(), "Resuming game");

            match self.play(session, dir.clone(), self.next_rng()).await {
                Ok(game) if game.error.is_none() => report.successful.push(dir.clone()),
                Ok(_) => report.failed.push(dir.clone()),
                Err(err) => {
                    error!(dir = %dir.display(), error = %err, "Resume failed");
                    report.failed.push(dir.clone());
                }
            }
        }
        report
    }

    /// Play `num_games` for every villager × werewolf pairing and append one
    /// JSON line per game to a fresh results file, returning its path.
    /// `arena` skips pairings of a model with itself.
    pub async fn evaluate(
        &self,
        villager_models: &[String],
        werewolf_models: &[String],
        num_games: usize,
        arena: bool,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.log_dir)
            .with_context(|| format!("Failed to create {}", self.config.log_dir.display()))?;
        let results = self
            .config
            .log_dir
            .join(format!("eval_results_{}.jsonl", timestamp()));

        for villager_model in villager_models {
            for werewolf_model in werewolf_models {
                if arena && villager_model == werewolf_model {
                    continue;
                }
                for game in 0..num_games {
                    info!(%villager_model, %werewolf_model, game, "Evaluation game");
                    let report = self.run_game(villager_model, werewolf_model).await?;
                    let record = EvalRecord {
                        villager_model: villager_model.clone(),
                        werewolf_model: werewolf_model.clone(),
                        winner: report.winner,
                        log_dir: report.log_dir,
                    };
                    append_record(&results, &record)?;
                }
            }
        }
        Ok(results)
    }

    async fn play(&self, session: Session, dir: PathBuf, rng: StdRng) -> Result<GameReport> {
        let mut master = GameMaster::new(
            session,
            self.gateway.clone(),
            GameSettings::from_config(&self.config),
            rng,
        );
        let winner = master.run_game().await;
        let session = master.into_session();

        let snapshot = save_game(&session, &dir)
            .with_context(|| format!("Failed to save session {}", session.session_id))?;
        match (&winner, &session.error) {
            (Some(winner), _) => info!(session_id = %session.session_id, %winner, snapshot = %snapshot.display(), "Game finished"),
            (None, Some(err)) => warn!(session_id = %session.session_id, error = %err, snapshot = %snapshot.display(), "Game stopped early"),
            (None, None) => {}
        }

        Ok(GameReport {
            session_id: session.session_id,
            winner,
            error: session.error,
            log_dir: dir,
        })
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        let short: String = session_id.chars().take(8).collect();
        self.config
            .log_dir
            .join(format!("session_{}_{}", timestamp(), short))
    }

    /// Seeded runs derive one generator per game from the base seed.
    fn next_rng(&self) -> StdRng {
        let game = self.games_started.fetch_add(1, Ordering::Relaxed);
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(game)),
            None => StdRng::from_os_rng(),
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn append_record(path: &Path, record: &EvalRecord) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(record)?)
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}
