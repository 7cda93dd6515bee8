//! Werewolf moderator
//!
//! The deterministic core of the game. This crate never talks to a model:
//! it owns the data model and the rules, and leaves decision making to the
//! caller.
//!
//! - [`agent`]: roles, role memory, per-round views and option sets
//! - [`session`]: sessions and rounds
//! - [`phase`]: the round phase machine and its legal transitions
//! - [`rules`]: winner check, majority exile, night outcome, speaker choice
//! - [`log`]: decision records and the round audit trail
//! - [`setup`]: dealing roles for a new game
//! - [`snapshot`]: partial/complete snapshots and resume preparation

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod error;
pub mod log;
pub mod phase;
pub mod rules;
pub mod session;
pub mod setup;
pub mod snapshot;

pub use agent::{format_observations, Agent, GameView, Observation, Role, RoleState, Utterance};
pub use error::{GameError, GameResult, PersistenceError};
pub use log::{AgentDecision, DecisionRecord, RoundLog, VoteLog, FAILED_ATTEMPT_SEPARATOR};
pub use phase::{IllegalTransition, RoundMachine, RoundPhase, TransitionRecord};
pub use rules::{
    determine_winner, exile_announcement, max_bidders, resolve_exile, resolve_night,
    select_speaker, tally_votes, NightOutcome,
};
pub use session::{new_session_id, Round, Session, Winner};
pub use setup::deal_roles;
pub use snapshot::{load_game, prepare_resume, save_game, SessionSnapshot};
