//! Session snapshots: save, load, and prepare for resume.
//!
//! A session directory holds up to three files:
//!
//! ```text
//! game_partial.json   session with a fatal error recorded
//! game_complete.json  session that finished cleanly
//! game_logs.json      the parallel RoundLog history
//! ```
//!
//! Writing a complete snapshot removes any stale partial one. Loading
//! prefers the partial snapshot when both exist.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{Agent, Observation, Role, RoleState};
use crate::error::PersistenceError;
use crate::log::RoundLog;
use crate::session::{Round, Session, Winner};

pub const PARTIAL_FILE: &str = "game_partial.json";
pub const COMPLETE_FILE: &str = "game_complete.json";
pub const LOGS_FILE: &str = "game_logs.json";

/// Persisted form of one agent. Transient views are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub bidding_rationale: String,
    /// Seer only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previously_investigated: BTreeMap<String, Role>,
}

impl AgentRecord {
    fn from_agent(agent: &Agent) -> Self {
        Self {
            name: agent.name().to_string(),
            model: agent.model.clone(),
            personality: agent.personality.clone(),
            observations: agent.observations.clone(),
            bidding_rationale: agent.bidding_rationale.clone(),
            previously_investigated: agent.investigated().cloned().unwrap_or_default(),
        }
    }

    fn into_agent(self, role: Role) -> Agent {
        let state = match role {
            Role::Seer => RoleState::Seer {
                investigated: self.previously_investigated,
            },
            other => RoleState::new(other),
        };
        let mut agent = Agent::with_state(self.name, state, self.model);
        agent.personality = self.personality;
        agent.observations = self.observations;
        agent.bidding_rationale = self.bidding_rationale;
        agent
    }
}

/// Persisted form of a [`Session`], grouped by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Schema version for forward compatibility.
    pub version: u32,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    pub session_id: String,
    pub seer: AgentRecord,
    pub doctor: AgentRecord,
    pub werewolves: Vec<AgentRecord>,
    #[serde(default)]
    pub villagers: Vec<AgentRecord>,
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default)]
    pub winner: Option<Winner>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn from_session(session: &Session) -> Result<Self, PersistenceError> {
        let single = |role: Role| {
            session
                .role_holder(role)
                .map(AgentRecord::from_agent)
                .map_err(|e| PersistenceError::Corrupted(e.to_string()))
        };
        let many = |role: Role| {
            session
                .agents()
                .filter(|a| a.role() == role)
                .map(AgentRecord::from_agent)
                .collect::<Vec<_>>()
        };

        Ok(Self {
            version: Self::CURRENT_VERSION,
            saved_at: Some(Utc::now()),
            session_id: session.session_id.clone(),
            seer: single(Role::Seer)?,
            doctor: single(Role::Doctor)?,
            werewolves: many(Role::Werewolf),
            villagers: many(Role::Villager),
            rounds: session.rounds.clone(),
            winner: session.winner,
            error: session.error.clone(),
        })
    }

    /// Rebuild the session; `logs` become its parallel log history.
    pub fn into_session(self, logs: Vec<RoundLog>) -> Result<Session, PersistenceError> {
        let mut agents = vec![
            self.seer.into_agent(Role::Seer),
            self.doctor.into_agent(Role::Doctor),
        ];
        agents.extend(self.werewolves.into_iter().map(|r| r.into_agent(Role::Werewolf)));
        agents.extend(self.villagers.into_iter().map(|r| r.into_agent(Role::Villager)));

        let mut session = Session::new(self.session_id, agents)
            .map_err(|e| PersistenceError::Corrupted(e.to_string()))?;
        session.rounds = self.rounds;
        session.logs = logs;
        session.logs.resize_with(session.rounds.len(), RoundLog::default);
        session.winner = self.winner;
        session.error = self.error;
        Ok(session)
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(PersistenceError::Serialize)
    }

    pub fn from_json(json: &str, path: &Path) -> Result<Self, PersistenceError> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|source| PersistenceError::Deserialize {
                path: path.to_path_buf(),
                source,
            })?;

        if snapshot.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }
}

/// Persisted RoundLog history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub version: u32,
    #[serde(default)]
    pub rounds: Vec<RoundLog>,
}

/// Write the session and its logs into `dir`, returning the snapshot path.
///
/// A session carrying an error is written as the partial snapshot.
pub fn save_game(session: &Session, dir: &Path) -> Result<PathBuf, PersistenceError> {
    fs::create_dir_all(dir)?;

    let partial = dir.join(PARTIAL_FILE);
    let target = if session.error.is_some() {
        partial
    } else {
        if partial.exists() {
            fs::remove_file(&partial)?;
        }
        dir.join(COMPLETE_FILE)
    };

    let snapshot = SessionSnapshot::from_session(session)?;
    fs::write(&target, snapshot.to_json()?)?;

    let logs = LogSnapshot {
        version: SessionSnapshot::CURRENT_VERSION,
        rounds: session.logs.clone(),
    };
    let json = serde_json::to_string_pretty(&logs).map_err(PersistenceError::Serialize)?;
    fs::write(dir.join(LOGS_FILE), json)?;

    info!(
        session_id = %session.session_id,
        path = %target.display(),
        rounds = session.rounds.len(),
        "Saved game snapshot"
    );
    Ok(target)
}

/// Load the session saved in `dir`, preferring the partial snapshot.
pub fn load_game(dir: &Path) -> Result<Session, PersistenceError> {
    let partial = dir.join(PARTIAL_FILE);
    let complete = dir.join(COMPLETE_FILE);
    let path = if partial.exists() {
        partial
    } else if complete.exists() {
        complete
    } else {
        return Err(PersistenceError::NotFound {
            path: dir.to_path_buf(),
        });
    };

    let snapshot = SessionSnapshot::from_json(&fs::read_to_string(&path)?, &path)?;

    let logs_path = dir.join(LOGS_FILE);
    let logs = if logs_path.exists() {
        let json = fs::read_to_string(&logs_path)?;
        let logs: LogSnapshot =
            serde_json::from_str(&json).map_err(|source| PersistenceError::Deserialize {
                path: logs_path.clone(),
                source,
            })?;
        logs.rounds
    } else {
        warn!(path = %logs_path.display(), "Log history missing, starting empty");
        Vec::new()
    };

    snapshot.into_session(logs)
}

/// Make a loaded session ready to continue.
///
/// An unfinished last round is dropped together with its log, and the
/// error is cleared. Agents still in play get a fresh view for the round
/// about to be replayed, lose any observation tagged with that round, and
/// the seer's memory is rebuilt from the retained rounds. With no rounds
/// left every agent is reset to a freshly dealt state. Returns the
/// discarded round, if any.
pub fn prepare_resume(session: &mut Session) -> Option<Round> {
    let discarded = session.discard_unfinished_round();
    session.error = None;

    if session.rounds.is_empty() {
        let everyone = session.names();
        for agent in session.agents_mut() {
            agent.reset_memory();
            agent.begin_round(0, everyone.clone());
        }
        session.link_werewolves();
        return discarded;
    }

    let replay = session.rounds.len() as u32;
    let roster = session
        .rounds
        .last()
        .map(|r| r.players.clone())
        .unwrap_or_default();

    let mut history = BTreeMap::new();
    for round in &session.rounds {
        if let Some(target) = round.unmasked.as_deref() {
            if let Ok(agent) = session.agent(target) {
                history.insert(target.to_string(), agent.role());
            }
        }
    }

    session.link_werewolves();
    for agent in session.agents_mut() {
        if !roster.iter().any(|p| p == agent.name()) {
            agent.clear_view();
            continue;
        }
        agent.begin_round(replay, roster.clone());
        agent.forget_from_round(replay);
        agent.bidding_rationale.clear();
        if agent.role() == Role::Seer {
            agent.set_investigated(history.clone());
        }
    }

    if let Some(round) = discarded.as_ref() {
        info!(
            session_id = %session.session_id,
            discarded_players = round.players.len(),
            replay,
            "Discarded unfinished round"
        );
    }
    discarded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let agents = vec![
            Agent::new("Ada", Role::Seer, "m"),
            Agent::new("Bram", Role::Werewolf, "w"),
            Agent::new("Cleo", Role::Doctor, "m"),
            Agent::new("Dov", Role::Villager, "m").with_personality("You are cunning."),
            Agent::new("Esme", Role::Werewolf, "w"),
            Agent::new("Finn", Role::Villager, "m"),
        ];
        Session::new("abc", agents).unwrap()
    }

    #[test]
    fn test_snapshot_groups_agents_by_role() {
        let snapshot = SessionSnapshot::from_session(&session()).unwrap();
        assert_eq!(snapshot.seer.name, "Ada");
        assert_eq!(snapshot.doctor.name, "Cleo");
        assert_eq!(snapshot.werewolves.len(), 2);
        assert_eq!(snapshot.villagers.len(), 2);
        assert_eq!(snapshot.version, SessionSnapshot::CURRENT_VERSION);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut snapshot = SessionSnapshot::from_session(&session()).unwrap();
        snapshot.version = SessionSnapshot::CURRENT_VERSION + 1;
        let json = snapshot.to_json().unwrap();
        let err = SessionSnapshot::from_json(&json, Path::new("x")).unwrap_err();
        assert!(matches!(err, PersistenceError::VersionMismatch { found: 2, .. }));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "version": 1,
            "session_id": "s",
            "seer": {"name": "Ada", "model": "m"},
            "doctor": {"name": "Cleo", "model": "m"},
            "werewolves": [{"name": "Bram", "model": "w"}, {"name": "Esme", "model": "w"}],
            "villagers": [{"name": "Dov", "model": "m"}]
        }"#;
        let snapshot = SessionSnapshot::from_json(json, Path::new("x")).unwrap();
        let session = snapshot.into_session(Vec::new()).unwrap();
        assert!(session.rounds.is_empty());
        assert!(session.error.is_none());
        assert_eq!(session.agent("Bram").unwrap().partner(), Some("Esme"));
    }

    #[test]
    fn test_corrupted_roles_rejected() {
        let mut snapshot = SessionSnapshot::from_session(&session()).unwrap();
        snapshot.werewolves.pop();
        assert!(matches!(
            snapshot.into_session(Vec::new()),
            Err(PersistenceError::Corrupted(_))
        ));
    }

    #[test]
    fn test_prepare_resume_with_no_rounds_resets_agents() {
        let mut s = session();
        s.start_round();
        s.agent_mut("Ada").unwrap().record_investigation("Bram", Role::Werewolf).unwrap();
        s.error = Some("boom".into());

        let discarded = prepare_resume(&mut s);
        assert!(discarded.is_some());
        assert!(s.rounds.is_empty());
        assert!(s.logs.is_empty());
        assert!(s.error.is_none());

        let seer = s.agent("Ada").unwrap();
        assert!(seer.observations.is_empty());
        assert!(seer.investigated().unwrap().is_empty());
        assert_eq!(seer.view().unwrap().round, 0);
        assert_eq!(s.agent("Esme").unwrap().view().unwrap().partner.as_deref(), Some("Bram"));
    }

    #[test]
    fn test_prepare_resume_keeps_finished_round() {
        let mut s = session();
        s.start_round();
        s.current_round_mut().unwrap().success = true;
        s.winner = None;
        assert!(prepare_resume(&mut s).is_none());
        assert_eq!(s.rounds.len(), 1);
        assert_eq!(s.agent("Dov").unwrap().view().unwrap().round, 1);
    }
}
