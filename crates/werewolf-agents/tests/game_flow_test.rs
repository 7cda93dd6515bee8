//! End-to-end games against a scripted in-process backend.
//!
//! The script is deterministic: named choices pick the alphabetically
//! smallest option, except protection which picks the largest. Every agent
//! bids 1, so only speaker order depends on the seed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use moderator::snapshot::{COMPLETE_FILE, PARTIAL_FILE};
use moderator::{load_game, save_game, Agent, Role, Session, Winner};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use werewolf_agents::{
    BackendError, DecisionGateway, GameConfig, GameMaster, GameSettings, GenerationBackend,
    PromptLibrary, RetryPolicy, Runner,
};

#[derive(Default)]
struct ScriptedBackend {
    /// While set, every vote answer is unusable.
    break_votes: AtomicBool,
}

impl ScriptedBackend {
    fn decision_key(schema: &Value) -> String {
        schema["required"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find(|k| *k != "reasoning")
            .unwrap_or_default()
            .to_string()
    }

    fn options(prompt: &str) -> Vec<String> {
        prompt
            .lines()
            .find_map(|line| line.split_once("One of: ").map(|(_, rest)| rest))
            .map(|rest| rest.split(", ").map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        schema: &Value,
        _temperature: f64,
    ) -> Result<String, BackendError> {
        let key = Self::decision_key(schema);
        let mut options = Self::options(prompt);
        options.sort();

        let value = match key.as_str() {
            "bid" => json!("1"),
            "say" => json!("I have been watching everyone closely."),
            "summary" => json!("\"Nothing certain yet.\""),
            "vote" if self.break_votes.load(Ordering::SeqCst) => {
                return Ok("I would rather not say.".into());
            }
            "protect" => json!(options.last()),
            _ => json!(options.first()),
        };
        let mut answer = json!({"reasoning": "scripted"});
        answer[key.as_str()] = value;
        Ok(format!("```json\n{}\n```", answer))
    }
}

fn fixed_session() -> Session {
    let agents = vec![
        Agent::new("Ada", Role::Villager, "scripted"),
        Agent::new("Bram", Role::Werewolf, "scripted"),
        Agent::new("Cleo", Role::Doctor, "scripted"),
        Agent::new("Dov", Role::Villager, "scripted"),
        Agent::new("Esme", Role::Werewolf, "scripted"),
        Agent::new("Finn", Role::Seer, "scripted"),
    ];
    Session::new("fixed", agents).unwrap()
}

fn master(session: Session, backend: Arc<ScriptedBackend>) -> GameMaster {
    let gateway = DecisionGateway::new(backend, PromptLibrary::new().unwrap(), RetryPolicy::default());
    GameMaster::new(
        session,
        Arc::new(gateway),
        GameSettings {
            max_debate_turns: 8,
            synthetic_votes: true,
            threads: 2,
        },
        StdRng::seed_from_u64(7),
    )
}

/// A finished round 0 that left only `alive` in the game.
fn session_after_first_round(alive: &[&str]) -> Session {
    let mut session = fixed_session();
    session.start_round();
    let round = session.current_round_mut().unwrap();
    round.players.retain(|p| alive.contains(&p.as_str()));
    round.success = true;
    session
}

fn test_config(log_dir: PathBuf) -> GameConfig {
    GameConfig {
        num_players: 6,
        max_debate_turns: 2,
        synthetic_votes: false,
        seed: Some(42),
        log_dir,
        ..GameConfig::default()
    }
}

#[tokio::test]
async fn test_scripted_game_plays_to_werewolf_parity() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut gm = master(fixed_session(), backend);

    let winner = gm.run_game().await;
    assert_eq!(winner, Some(Winner::Werewolves));

    let session = gm.into_session();
    assert!(session.error.is_none());
    assert_eq!(session.rounds.len(), 2);
    assert_eq!(session.logs.len(), 2);
    assert!(session.rounds.iter().all(|r| r.success));

    let first = &session.rounds[0];
    assert_eq!(first.eliminated.as_deref(), Some("Ada"));
    assert_eq!(first.protected.as_deref(), Some("Finn"));
    assert_eq!(first.unmasked.as_deref(), Some("Ada"));
    assert_eq!(first.exiled.as_deref(), Some("Bram"));
    assert_eq!(first.debate.len(), 8);
    assert_eq!(first.bids.len(), 8);
    assert_eq!(first.votes.len(), 8);
    assert_eq!(first.players, vec!["Cleo", "Dov", "Esme", "Finn"]);

    let second = &session.rounds[1];
    assert_eq!(second.eliminated.as_deref(), Some("Cleo"));
    assert_eq!(second.exiled.as_deref(), Some("Dov"));
    assert_eq!(second.players, vec!["Esme", "Finn"]);

    let log = &session.logs[0];
    assert!(log.eliminate.as_ref().is_some_and(|r| r.succeeded()));
    assert_eq!(log.debate.len(), 8);
    assert_eq!(log.summaries.len(), 4);
    assert!(session.logs[1].summaries.is_empty());

    let seer = session.agent("Finn").unwrap();
    let seen = seer.investigated().unwrap();
    assert_eq!(seen.get("Ada"), Some(&Role::Villager));
    assert_eq!(seen.get("Cleo"), Some(&Role::Doctor));
}

#[tokio::test]
async fn test_speaker_never_repeats_back_to_back() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut gm = master(fixed_session(), backend);
    gm.run_game().await;

    for round in &gm.session().rounds {
        for pair in round.debate.windows(2) {
            assert_ne!(pair[0].speaker, pair[1].speaker);
        }
        for (turn, bids) in round.bids.iter().enumerate() {
            let max = bids.values().max().copied().unwrap();
            let speaker = &round.debate[turn].speaker;
            assert_eq!(bids.get(speaker).copied(), Some(max));
        }
    }
}

#[tokio::test]
async fn test_werewolves_share_night_notes() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut gm = master(fixed_session(), backend);
    gm.run_game().await;
    let session = gm.into_session();

    let esme = session.agent("Esme").unwrap();
    let texts: Vec<&str> = esme.observations.iter().map(|o| o.text.as_str()).collect();
    assert!(texts.contains(&"During the night, we decided to eliminate Ada."));
    assert!(texts.contains(&"During the night, I decided to eliminate Cleo."));
    assert!(texts
        .iter()
        .any(|t| t.starts_with("Moderator Announcement: The majority voted to remove Bram")));
}

#[tokio::test]
async fn test_night_skips_doctor_and_seer_once_removed() {
    let backend = Arc::new(ScriptedBackend::default());
    let session = session_after_first_round(&["Ada", "Bram", "Dov", "Esme"]);
    let mut gm = master(session, backend);

    assert_eq!(gm.run_game().await, Some(Winner::Werewolves));
    let session = gm.into_session();
    assert!(session.error.is_none());

    let night = &session.rounds[1];
    assert!(night.success);
    assert_eq!(night.eliminated.as_deref(), Some("Ada"));
    assert!(night.protected.is_none());
    assert!(night.unmasked.is_none());
    assert!(session.logs[1].protect.is_none());
    assert!(session.logs[1].investigate.is_none());
}

#[tokio::test]
async fn test_seer_with_nobody_left_to_investigate_sits_out() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut session = session_after_first_round(&["Cleo", "Esme", "Finn"]);
    let seer = session.agent_mut("Finn").unwrap();
    seer.record_investigation("Cleo", Role::Doctor).unwrap();
    seer.record_investigation("Esme", Role::Werewolf).unwrap();
    let mut gm = master(session, backend);

    assert_eq!(gm.run_game().await, Some(Winner::Werewolves));
    let session = gm.into_session();
    assert!(session.error.is_none());

    let night = &session.rounds[1];
    assert!(night.success);
    assert_eq!(night.eliminated.as_deref(), Some("Cleo"));
    assert_eq!(night.protected.as_deref(), Some("Finn"));
    assert!(night.unmasked.is_none());
    assert!(session.logs[1].investigate.is_none());
    assert_eq!(session.rounds[1].players, vec!["Esme", "Finn"]);
}

#[tokio::test]
async fn test_failed_vote_is_persisted_and_resumed() {
    let logs = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    backend.break_votes.store(true, Ordering::SeqCst);
    let runner = Runner::new(test_config(logs.path().to_path_buf()), backend.clone()).unwrap();

    let report = runner.run_game("scripted", "scripted").await.unwrap();
    assert!(report.winner.is_none());
    assert!(report.error.as_deref().is_some_and(|e| e.contains("vote")));
    assert!(report.log_dir.join(PARTIAL_FILE).exists());

    let failed = load_game(&report.log_dir).unwrap();
    assert_eq!(failed.rounds.len(), 1);
    assert!(!failed.rounds[0].success);
    assert!(failed.error.is_some());
    assert_eq!(failed.logs[0].votes.len(), 1);

    backend.break_votes.store(false, Ordering::SeqCst);
    let resumed = runner.resume_games(&[report.log_dir.clone()]).await;
    assert_eq!(resumed.successful, vec![report.log_dir.clone()]);
    assert!(resumed.failed.is_empty());

    assert!(!report.log_dir.join(PARTIAL_FILE).exists());
    assert!(report.log_dir.join(COMPLETE_FILE).exists());
    let finished = load_game(&report.log_dir).unwrap();
    assert!(finished.winner.is_some());
    assert!(finished.error.is_none());
    assert!(finished.rounds.iter().all(|r| r.success));
    assert_eq!(finished.rounds.len(), finished.logs.len());
}

#[tokio::test]
async fn test_resume_reports_directories_without_snapshots() {
    let logs = tempfile::tempdir().unwrap();
    let empty = tempfile::tempdir().unwrap();
    let runner = Runner::new(
        test_config(logs.path().to_path_buf()),
        Arc::new(ScriptedBackend::default()),
    )
    .unwrap();

    let report = runner.resume_games(&[empty.path().to_path_buf()]).await;
    assert_eq!(report.invalid, vec![empty.path().to_path_buf()]);
    assert!(report.successful.is_empty());
}

#[tokio::test]
async fn test_evaluate_writes_one_line_per_game() {
    let logs = tempfile::tempdir().unwrap();
    let runner = Runner::new(
        test_config(logs.path().to_path_buf()),
        Arc::new(ScriptedBackend::default()),
    )
    .unwrap();

    let models = vec!["alpha".to_string(), "beta".to_string()];
    let results = runner.evaluate(&models, &models, 1, true).await.unwrap();

    let text = std::fs::read_to_string(&results).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l["villager_model"] != l["werewolf_model"]));
    assert!(lines.iter().all(|l| !l["winner"].is_null()));
}

#[tokio::test]
async fn test_completed_game_round_trips_through_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let mut gm = master(fixed_session(), backend);
    gm.run_game().await;
    let session = gm.into_session();

    save_game(&session, dir.path()).unwrap();
    let loaded = load_game(dir.path()).unwrap();
    assert_eq!(loaded.winner, Some(Winner::Werewolves));
    assert_eq!(loaded.rounds, session.rounds);
    assert_eq!(loaded.logs, session.logs);
}
