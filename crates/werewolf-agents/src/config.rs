use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::anthropic::DEFAULT_ANTHROPIC_URL;
use crate::backend::gemini::DEFAULT_GEMINI_URL;
use crate::backend::openai::DEFAULT_OPENAI_URL;
use crate::gateway::RetryPolicy;

/// Names of famous werewolves, sampled for each new game.
const DEFAULT_NAMES: [&str; 17] = [
    "Derek", "Scott", "Jacob", "Isaac", "Hayley", "David", "Tyler", "Ginger", "Jackson", "Mason",
    "Dan", "Bert", "Will", "Sam", "Paul", "Leah", "Harold",
];

/// Provider endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub anthropic_base_url: String,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    pub anthropic_max_tokens: u32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            openai_base_url: DEFAULT_OPENAI_URL.into(),
            gemini_base_url: DEFAULT_GEMINI_URL.into(),
            anthropic_base_url: DEFAULT_ANTHROPIC_URL.into(),
            openai_api_key: None,
            gemini_api_key: None,
            anthropic_api_key: None,
            anthropic_max_tokens: 1024,
            request_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level game configuration.
///
/// Resolution order: built-in defaults, then the optional TOML file, then
/// `WEREWOLF_*` and provider key environment variables, then CLI flags
/// (applied by the binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub num_players: usize,
    pub max_debate_turns: usize,
    /// Run a voting checkpoint after every debate turn, not just the last.
    pub synthetic_votes: bool,
    /// Width of the per-phase worker pool.
    pub threads: usize,
    pub retries: u32,
    pub temperature_step: f64,
    pub temperature_ceiling: f64,
    /// Starting temperature when the answer must come from a fixed set.
    pub constrained_temperature: f64,
    /// Starting temperature for free-text answers.
    pub open_temperature: f64,
    /// Seed for roles, speaker choice and option shuffling.
    pub seed: Option<u64>,
    pub log_dir: PathBuf,
    pub player_names: Vec<String>,
    /// Alias → backend model id.
    pub models: BTreeMap<String, String>,
    pub villager_models: Vec<String>,
    pub werewolf_models: Vec<String>,
    pub providers: ProviderConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        let models = [
            ("pro1.5", "gemini-1.5-pro-002"),
            ("flash", "gemini-1.5-flash-002"),
            ("pro1", "gemini-pro"),
            ("gpt4", "gpt-4-turbo-2024-04-09"),
            ("gpt4o", "gpt-4o-2024-05-13"),
            ("gpt3.5", "gpt-3.5-turbo-0125"),
            ("sonnet", "claude-3-5-sonnet-20240620"),
        ]
        .iter()
        .map(|(alias, id)| (alias.to_string(), id.to_string()))
        .collect();

        Self {
            num_players: 8,
            max_debate_turns: 8,
            synthetic_votes: true,
            threads: 2,
            retries: 3,
            temperature_step: 0.2,
            temperature_ceiling: 1.0,
            constrained_temperature: 0.5,
            open_temperature: 1.0,
            seed: None,
            log_dir: PathBuf::from("logs"),
            player_names: DEFAULT_NAMES.iter().map(|s| s.to_string()).collect(),
            models,
            villager_models: vec!["flash".into(), "pro1.5".into()],
            werewolf_models: vec!["flash".into(), "pro1.5".into()],
            providers: ProviderConfig::default(),
        }
    }
}

impl GameConfig {
    /// Load defaults, the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            value
                .map(|v| {
                    v.trim()
                        .parse::<T>()
                        .map_err(|e| anyhow::anyhow!("invalid {key}={v}: {e}"))
                })
                .transpose()
        }

        if let Some(v) = parsed("WEREWOLF_NUM_PLAYERS", lookup("WEREWOLF_NUM_PLAYERS"))? {
            self.num_players = v;
        }
        if let Some(v) = parsed("WEREWOLF_MAX_DEBATE_TURNS", lookup("WEREWOLF_MAX_DEBATE_TURNS"))? {
            self.max_debate_turns = v;
        }
        if let Some(v) = parsed("WEREWOLF_SYNTHETIC_VOTES", lookup("WEREWOLF_SYNTHETIC_VOTES"))? {
            self.synthetic_votes = v;
        }
        if let Some(v) = parsed("WEREWOLF_THREADS", lookup("WEREWOLF_THREADS"))? {
            self.threads = v;
        }
        if let Some(v) = parsed("WEREWOLF_RETRIES", lookup("WEREWOLF_RETRIES"))? {
            self.retries = v;
        }
        if let Some(v) = parsed("WEREWOLF_SEED", lookup("WEREWOLF_SEED"))? {
            self.seed = Some(v);
        }
        if let Some(dir) = lookup("WEREWOLF_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("WEREWOLF_OPENAI_BASE_URL") {
            self.providers.openai_base_url = url;
        }
        if let Some(url) = lookup("WEREWOLF_GEMINI_BASE_URL") {
            self.providers.gemini_base_url = url;
        }
        if let Some(url) = lookup("WEREWOLF_ANTHROPIC_BASE_URL") {
            self.providers.anthropic_base_url = url;
        }

        self.providers.openai_api_key = lookup("OPENAI_API_KEY").or(self.providers.openai_api_key.take());
        self.providers.gemini_api_key = lookup("GEMINI_API_KEY").or(self.providers.gemini_api_key.take());
        self.providers.anthropic_api_key =
            lookup("ANTHROPIC_API_KEY").or(self.providers.anthropic_api_key.take());
        Ok(())
    }

    /// Map an alias to its model id; unknown aliases pass through unchanged.
    pub fn resolve_model(&self, alias: &str) -> String {
        self.models
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            temperature_step: self.temperature_step,
            temperature_ceiling: self.temperature_ceiling,
            constrained_temperature: self.constrained_temperature,
            open_temperature: self.open_temperature,
        }
    }
}
