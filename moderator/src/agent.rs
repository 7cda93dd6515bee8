//! Agents, roles, and the per-round view each agent reasons over.
//!
//! Role polymorphism is a closed set: [`RoleState`] carries only the memory
//! a role needs (the Werewolf's partner, the Seer's investigations) and the
//! option builders dispatch on it. The [`GameView`] is rebuilt wholesale at
//! the start of every round and never persisted.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GameError, GameResult};

/// The four roles of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Villager,
    Werewolf,
    Seer,
    Doctor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Villager => write!(f, "Villager"),
            Self::Werewolf => write!(f, "Werewolf"),
            Self::Seer => write!(f, "Seer"),
            Self::Doctor => write!(f, "Doctor"),
        }
    }
}

/// Role tag plus the role-specific memory it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    Villager,
    Werewolf {
        /// The other werewolf, if there is one.
        partner: Option<String>,
    },
    Seer {
        /// Everyone investigated so far, with the role that was revealed.
        investigated: BTreeMap<String, Role>,
    },
    Doctor,
}

impl RoleState {
    /// Fresh state for a role, with empty memory.
    pub fn new(role: Role) -> Self {
        match role {
            Role::Villager => Self::Villager,
            Role::Werewolf => Self::Werewolf { partner: None },
            Role::Seer => Self::Seer {
                investigated: BTreeMap::new(),
            },
            Role::Doctor => Self::Doctor,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Villager => Role::Villager,
            Self::Werewolf { .. } => Role::Werewolf,
            Self::Seer { .. } => Role::Seer,
            Self::Doctor => Role::Doctor,
        }
    }
}

/// A private observation, tagged with the round it was made in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub round: u32,
    pub text: String,
}

/// One line of the day debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
}

/// What an agent can see during the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameView {
    /// Round this view was built for.
    pub round: u32,
    /// Players still in the game, in roster order.
    pub players: Vec<String>,
    /// Debate so far this round.
    pub debate: Vec<Utterance>,
    /// The other werewolf, for werewolves only.
    pub partner: Option<String>,
}

impl GameView {
    pub fn new(round: u32, players: Vec<String>, partner: Option<String>) -> Self {
        Self {
            round,
            players,
            debate: Vec::new(),
            partner,
        }
    }

    pub fn record_utterance(&mut self, speaker: &str, text: &str) {
        self.debate.push(Utterance {
            speaker: speaker.to_string(),
            text: text.to_string(),
        });
    }

    pub fn remove_player(&mut self, name: &str) {
        match self.players.iter().position(|p| p == name) {
            Some(idx) => {
                self.players.remove(idx);
            }
            None => warn!(player = name, players = ?self.players, "player not in view roster"),
        }
    }
}

/// One participant in a session.
#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    role: RoleState,
    /// Backend model id used for this agent's decisions.
    pub model: String,
    pub personality: Option<String>,
    pub observations: Vec<Observation>,
    /// Reasoning from the agent's latest bid, reused when it speaks.
    pub bidding_rationale: String,
    view: Option<GameView>,
}

impl Agent {
    pub fn new(name: impl Into<String>, role: Role, model: impl Into<String>) -> Self {
        Self::with_state(name, RoleState::new(role), model)
    }

    pub fn with_state(name: impl Into<String>, role: RoleState, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            model: model.into(),
            personality: None,
            observations: Vec::new(),
            bidding_rationale: String::new(),
            view: None,
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub fn role_state(&self) -> &RoleState {
        &self.role
    }

    pub fn is_werewolf(&self) -> bool {
        self.role() == Role::Werewolf
    }

    /// The werewolf partner, if this agent is a werewolf with one.
    pub fn partner(&self) -> Option<&str> {
        match &self.role {
            RoleState::Werewolf { partner } => partner.as_deref(),
            _ => None,
        }
    }

    pub fn set_partner(&mut self, name: Option<String>) {
        if let RoleState::Werewolf { partner } = &mut self.role {
            *partner = name.clone();
        }
        if let Some(view) = self.view.as_mut() {
            view.partner = name;
        }
    }

    /// Seer memory; empty for every other role.
    pub fn investigated(&self) -> Option<&BTreeMap<String, Role>> {
        match &self.role {
            RoleState::Seer { investigated } => Some(investigated),
            _ => None,
        }
    }

    /// Replace the seer's memory wholesale. No-op for other roles.
    pub fn set_investigated(&mut self, history: BTreeMap<String, Role>) {
        if let RoleState::Seer { investigated } = &mut self.role {
            *investigated = history;
        }
    }

    /// Build a fresh view for a new round.
    pub fn begin_round(&mut self, round: u32, players: Vec<String>) {
        let partner = self.partner().map(str::to_string);
        self.view = Some(GameView::new(round, players, partner));
    }

    /// Drop the view; the agent is no longer taking part.
    pub fn clear_view(&mut self) {
        self.view = None;
    }

    pub fn view(&self) -> GameResult<&GameView> {
        self.view
            .as_ref()
            .ok_or_else(|| GameError::ViewNotInitialized(self.name.clone()))
    }

    pub fn view_mut(&mut self) -> GameResult<&mut GameView> {
        self.view
            .as_mut()
            .ok_or_else(|| GameError::ViewNotInitialized(self.name.clone()))
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    /// Append a private observation tagged with the current view's round.
    pub fn add_observation(&mut self, text: impl Into<String>) -> GameResult<()> {
        let round = self.view()?.round;
        self.observations.push(Observation {
            round,
            text: text.into(),
        });
        Ok(())
    }

    pub fn add_announcement(&mut self, announcement: &str) -> GameResult<()> {
        self.add_observation(format!("Moderator Announcement: {}", announcement))
    }

    /// Remember what an investigation revealed and note it privately.
    pub fn record_investigation(&mut self, target: &str, revealed: Role) -> GameResult<()> {
        let RoleState::Seer { investigated } = &mut self.role else {
            return Err(GameError::MissingRole(Role::Seer));
        };
        investigated.insert(target.to_string(), revealed);
        self.add_observation(format!(
            "During the night, I decided to investigate {} and learned they are a {}.",
            target, revealed
        ))
    }

    /// Drop every observation made in `round` or later.
    pub fn forget_from_round(&mut self, round: u32) {
        self.observations.retain(|o| o.round < round);
    }

    /// Reset to the state of a freshly dealt game, keeping identity and role.
    pub fn reset_memory(&mut self) {
        self.observations.clear();
        self.bidding_rationale.clear();
        if let RoleState::Seer { investigated } = &mut self.role {
            investigated.clear();
        }
    }

    // ── Option sets ─────────────────────────────────────────────────────

    /// Everyone alive except this agent.
    pub fn vote_options(&self) -> GameResult<Vec<String>> {
        let view = self.view()?;
        Ok(view
            .players
            .iter()
            .filter(|p| **p != self.name)
            .cloned()
            .collect())
    }

    /// Everyone alive except this agent and its partner.
    pub fn eliminate_options(&self) -> GameResult<Vec<String>> {
        let view = self.view()?;
        let partner = view.partner.as_deref();
        Ok(view
            .players
            .iter()
            .filter(|p| **p != self.name && Some(p.as_str()) != partner)
            .cloned()
            .collect())
    }

    /// Everyone alive, this agent included.
    pub fn protect_options(&self) -> GameResult<Vec<String>> {
        Ok(self.view()?.players.clone())
    }

    /// Everyone alive except this agent and anyone already investigated.
    pub fn investigate_options(&self) -> GameResult<Vec<String>> {
        let view = self.view()?;
        let investigated = self.investigated();
        Ok(view
            .players
            .iter()
            .filter(|p| **p != self.name)
            .filter(|p| investigated.map_or(true, |seen| !seen.contains_key(*p)))
            .cloned()
            .collect())
    }

    /// Extra prompt context for werewolves about their partner.
    pub fn werewolf_context(&self) -> GameResult<String> {
        if !self.is_werewolf() {
            return Ok(String::new());
        }
        let view = self.view()?;
        Ok(match view.partner.as_deref() {
            Some(partner) if view.players.iter().any(|p| p == partner) => {
                format!("\n- The other Werewolf is {}.", partner)
            }
            Some(partner) => format!(
                "\n- The other Werewolf, {}, was exiled by the Villagers. Only you remain.",
                partner
            ),
            None => "\n- You are the only Werewolf.".to_string(),
        })
    }
}

/// Group observations by round for prompt rendering.
///
/// Each entry reads `Round N:` followed by one indented bullet per
/// observation. Double quotes are stripped from the text.
pub fn format_observations(observations: &[Observation]) -> Vec<String> {
    let mut grouped: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry(obs.round)
            .or_default()
            .push(obs.text.trim().replace('"', ""));
    }

    grouped
        .into_iter()
        .map(|(round, lines)| {
            let body = lines
                .iter()
                .map(|l| format!("   - {}", l))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Round {}:\n{}", round, body)
        })
        .collect()
}
