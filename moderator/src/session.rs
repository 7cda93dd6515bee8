//! Session and round records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, Role, Utterance};
use crate::error::{GameError, GameResult};
use crate::log::RoundLog;

/// Which side won the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Winner {
    Villagers,
    Werewolves,
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Villagers => write!(f, "Villagers"),
            Self::Werewolves => write!(f, "Werewolves"),
        }
    }
}

/// One night+day cycle.
///
/// Vote and bid tallies are keyed by agent name in a `BTreeMap`, which fixes
/// the iteration order used by the exile tie-break.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Alive agents; shrinks as the round removes players.
    pub players: Vec<String>,
    #[serde(default)]
    pub eliminated: Option<String>,
    #[serde(default)]
    pub protected: Option<String>,
    #[serde(default)]
    pub unmasked: Option<String>,
    #[serde(default)]
    pub exiled: Option<String>,
    #[serde(default)]
    pub debate: Vec<Utterance>,
    /// One tally per voting checkpoint: voter → target.
    #[serde(default)]
    pub votes: Vec<BTreeMap<String, String>>,
    /// One tally per debate turn: bidder → bid.
    #[serde(default)]
    pub bids: Vec<BTreeMap<String, u8>>,
    #[serde(default)]
    pub success: bool,
}

impl Round {
    pub fn new(players: Vec<String>) -> Self {
        Self {
            players,
            ..Self::default()
        }
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.players.iter().any(|p| p == name)
    }

    /// Remove a player from the roster, returning whether they were present.
    pub fn remove_player(&mut self, name: &str) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p != name);
        self.players.len() != before
    }
}

/// Fresh random session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One game instance.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    agents: BTreeMap<String, Agent>,
    pub rounds: Vec<Round>,
    /// Parallel to `rounds`.
    pub logs: Vec<RoundLog>,
    pub winner: Option<Winner>,
    /// Last fatal error; `None` while healthy.
    pub error: Option<String>,
}

impl Session {
    /// Build a session, checking the role distribution and linking the
    /// werewolves to each other.
    pub fn new(session_id: impl Into<String>, agents: Vec<Agent>) -> GameResult<Self> {
        let mut by_name = BTreeMap::new();
        for agent in agents {
            let name = agent.name().to_string();
            if by_name.insert(name.clone(), agent).is_some() {
                return Err(GameError::InvalidRoster(format!("duplicate agent name {}", name)));
            }
        }

        let mut session = Self {
            session_id: session_id.into(),
            agents: by_name,
            rounds: Vec::new(),
            logs: Vec::new(),
            winner: None,
            error: None,
        };
        session.validate_roles()?;
        session.link_werewolves();
        Ok(session)
    }

    fn validate_roles(&self) -> GameResult<()> {
        let count = |role| self.agents.values().filter(|a| a.role() == role).count();
        let (seers, doctors, wolves) = (count(Role::Seer), count(Role::Doctor), count(Role::Werewolf));
        if seers != 1 || doctors != 1 || wolves != 2 {
            return Err(GameError::InvalidRoster(format!(
                "expected 1 Seer, 1 Doctor and 2 Werewolves, found {} / {} / {}",
                seers, doctors, wolves
            )));
        }
        Ok(())
    }

    /// Point each werewolf at the other one.
    pub fn link_werewolves(&mut self) {
        let wolves = self.names_with_role(Role::Werewolf);
        for name in &wolves {
            let partner = wolves.iter().find(|w| *w != name).cloned();
            if let Some(agent) = self.agents.get_mut(name) {
                agent.set_partner(partner);
            }
        }
    }

    pub fn agent(&self, name: &str) -> GameResult<&Agent> {
        self.agents
            .get(name)
            .ok_or_else(|| GameError::UnknownAgent(name.to_string()))
    }

    pub fn agent_mut(&mut self, name: &str) -> GameResult<&mut Agent> {
        self.agents
            .get_mut(name)
            .ok_or_else(|| GameError::UnknownAgent(name.to_string()))
    }

    /// All agents, alphabetically by name.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn agents_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }

    /// All names, alphabetically.
    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn names_with_role(&self, role: Role) -> Vec<String> {
        self.agents
            .values()
            .filter(|a| a.role() == role)
            .map(|a| a.name().to_string())
            .collect()
    }

    /// The single holder of a unique role (Seer or Doctor).
    pub fn role_holder(&self, role: Role) -> GameResult<&Agent> {
        self.agents
            .values()
            .find(|a| a.role() == role)
            .ok_or(GameError::MissingRole(role))
    }

    /// Index of the round in progress.
    pub fn round_number(&self) -> GameResult<u32> {
        match self.rounds.len() {
            0 => Err(GameError::NoActiveRound),
            n => Ok((n - 1) as u32),
        }
    }

    pub fn current_round(&self) -> GameResult<&Round> {
        self.rounds.last().ok_or(GameError::NoActiveRound)
    }

    pub fn current_round_mut(&mut self) -> GameResult<&mut Round> {
        self.rounds.last_mut().ok_or(GameError::NoActiveRound)
    }

    pub fn current_log_mut(&mut self) -> GameResult<&mut RoundLog> {
        self.logs.last_mut().ok_or(GameError::NoActiveRound)
    }

    /// Append a new round and its log.
    ///
    /// The roster carries over from the previous round; the first round
    /// starts with every agent. Each rostered agent gets a fresh view.
    pub fn start_round(&mut self) -> u32 {
        let players = match self.rounds.last() {
            Some(prev) => prev.players.clone(),
            None => self.names(),
        };
        let number = self.rounds.len() as u32;

        for agent in self.agents.values_mut() {
            if players.iter().any(|p| p == agent.name()) {
                agent.begin_round(number, players.clone());
            } else {
                agent.clear_view();
            }
        }
        self.rounds.push(Round::new(players));
        self.logs.push(RoundLog::default());
        number
    }

    /// Drop the last round and its log if the round did not finish.
    pub fn discard_unfinished_round(&mut self) -> Option<Round> {
        if self.rounds.last().is_some_and(|r| !r.success) {
            if self.logs.len() == self.rounds.len() {
                self.logs.pop();
            }
            return self.rounds.pop();
        }
        None
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }
}
