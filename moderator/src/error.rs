//! Game error types
//!
//! Every fault that can stop a round is represented here. None of these are
//! retried: transient generation failures are absorbed upstream by the
//! decision gateway, so anything that reaches this type is fatal for the
//! round that raised it.

use std::path::PathBuf;

use thiserror::Error;

use crate::agent::Role;
use crate::phase::IllegalTransition;

/// Result type alias for game operations
pub type GameResult<T> = Result<T, GameError>;

/// Errors that abort the current round
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// An agent operation produced no usable result where a definite
    /// choice is required.
    #[error("{agent} did not return a valid {action} during {phase}")]
    InvalidActor {
        phase: String,
        agent: String,
        action: String,
    },

    /// An agent operation was called before its per-round view was built.
    #[error("game view for {0} is not initialized")]
    ViewNotInitialized(String),

    /// No living agent holds a role the phase requires.
    #[error("no living agent holds the {0} role")]
    MissingRole(Role),

    /// A name that is not part of the session was referenced.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// The role distribution breaks the session invariant.
    #[error("invalid roster: {0}")]
    InvalidRoster(String),

    /// A round was asked for before any round was started.
    #[error("no round in progress")]
    NoActiveRound,

    /// The phase machine refused a transition.
    #[error(transparent)]
    Transition(#[from] IllegalTransition),
}

impl GameError {
    /// Build an `InvalidActor` error.
    pub fn invalid_actor(
        phase: impl Into<String>,
        agent: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidActor {
            phase: phase.into(),
            agent: agent.into(),
            action: action.into(),
        }
    }
}

/// Errors raised while writing or reading session snapshots
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Neither a partial nor a complete snapshot exists in the directory.
    #[error("no saved game found in {path}")]
    NotFound { path: PathBuf },

    /// Serialization failed.
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Deserialization failed.
    #[error("deserialize failed for {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot was written by a newer schema.
    #[error("snapshot version mismatch: expected <= {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Snapshot parsed but violates a session invariant.
    #[error("corrupted snapshot: {0}")]
    Corrupted(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
