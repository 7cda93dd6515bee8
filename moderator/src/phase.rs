//! Round phase machine with legal transition guards.
//!
//! Every round walks the same ordered phase graph. The game master calls
//! [`RoundMachine::advance`] before entering each phase so that the order is
//! enforced in one place and every step is recorded for diagnostics:
//!
//! ```text
//! NightEliminate → NightProtect → NightInvestigate → NightResolve
//!   → CheckWinnerNight ─┬→ Complete
//!                       └→ DayDebate → DayExile → CheckWinnerDay ─┬→ Complete
//!                                                                 └→ Summarize → Complete
//! ```
//!
//! Any non-terminal phase may move to `Failed`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One ordered step of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// A werewolf picks a victim.
    NightEliminate,
    /// The doctor shields someone.
    NightProtect,
    /// The seer learns one role.
    NightInvestigate,
    /// Apply the night's outcome to the roster.
    NightResolve,
    /// Winner check after the night.
    CheckWinnerNight,
    /// Bidding, speaking and voting checkpoints.
    DayDebate,
    /// Majority exile from the last checkpoint.
    DayExile,
    /// Winner check after the day.
    CheckWinnerDay,
    /// Every active agent writes a private summary.
    Summarize,
    /// Round finished, terminal.
    Complete,
    /// Round aborted on a fatal fault, terminal.
    Failed,
}

impl RoundPhase {
    /// Whether this is a terminal phase (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NightEliminate => write!(f, "night_eliminate"),
            Self::NightProtect => write!(f, "night_protect"),
            Self::NightInvestigate => write!(f, "night_investigate"),
            Self::NightResolve => write!(f, "night_resolve"),
            Self::CheckWinnerNight => write!(f, "check_winner_night"),
            Self::DayDebate => write!(f, "day_debate"),
            Self::DayExile => write!(f, "day_exile"),
            Self::CheckWinnerDay => write!(f, "check_winner_day"),
            Self::Summarize => write!(f, "summarize"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn is_legal_transition(from: RoundPhase, to: RoundPhase) -> bool {
    use RoundPhase::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (NightEliminate, NightProtect)
            | (NightProtect, NightInvestigate)
            | (NightInvestigate, NightResolve)
            | (NightResolve, CheckWinnerNight)
            // winner found: the round ends early
            | (CheckWinnerNight, Complete)
            | (CheckWinnerNight, DayDebate)
            | (DayDebate, DayExile)
            | (DayExile, CheckWinnerDay)
            | (CheckWinnerDay, Complete)
            | (CheckWinnerDay, Summarize)
            | (Summarize, Complete)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RoundPhase,
    pub to: RoundPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RoundPhase,
    pub to: RoundPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal phase transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Phase tracker for a single round.
#[derive(Debug, Clone)]
pub struct RoundMachine {
    round: u32,
    current: RoundPhase,
    transitions: Vec<TransitionRecord>,
}

impl RoundMachine {
    /// Start a round at `NightEliminate`.
    pub fn new(round: u32) -> Self {
        Self {
            round,
            current: RoundPhase::NightEliminate,
            transitions: Vec::new(),
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn current(&self) -> RoundPhase {
        self.current
    }

    /// Move to `to` if the phase graph allows it.
    pub fn advance(&mut self, to: RoundPhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            round = self.round,
            from = %self.current,
            to = %to,
            "Phase transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Failed` from any non-terminal phase.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RoundPhase::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(machine: &mut RoundMachine, phases: &[RoundPhase]) {
        for phase in phases {
            machine.advance(*phase, None).unwrap();
        }
    }

    #[test]
    fn test_full_round_path() {
        let mut m = RoundMachine::new(0);
        walk(
            &mut m,
            &[
                RoundPhase::NightProtect,
                RoundPhase::NightInvestigate,
                RoundPhase::NightResolve,
                RoundPhase::CheckWinnerNight,
                RoundPhase::DayDebate,
                RoundPhase::DayExile,
                RoundPhase::CheckWinnerDay,
                RoundPhase::Summarize,
                RoundPhase::Complete,
            ],
        );
        assert!(m.is_terminal());
        assert_eq!(m.transitions().len(), 9);
    }

    #[test]
    fn test_early_finish_after_night() {
        let mut m = RoundMachine::new(2);
        walk(
            &mut m,
            &[
                RoundPhase::NightProtect,
                RoundPhase::NightInvestigate,
                RoundPhase::NightResolve,
                RoundPhase::CheckWinnerNight,
            ],
        );
        m.advance(RoundPhase::Complete, Some("Werewolves win")).unwrap();
        assert_eq!(m.current(), RoundPhase::Complete);
        assert_eq!(
            m.transitions().last().and_then(|t| t.reason.as_deref()),
            Some("Werewolves win")
        );
    }

    #[test]
    fn test_cannot_skip_night() {
        let mut m = RoundMachine::new(0);
        let err = m.advance(RoundPhase::DayDebate, None).unwrap_err();
        assert_eq!(err.from, RoundPhase::NightEliminate);
        assert_eq!(err.to, RoundPhase::DayDebate);
        assert_eq!(m.current(), RoundPhase::NightEliminate);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut m = RoundMachine::new(1);
        m.advance(RoundPhase::NightProtect, None).unwrap();
        m.fail("doctor returned nothing").unwrap();
        assert!(m.is_terminal());
        assert!(m.fail("again").is_err());
        assert!(m.advance(RoundPhase::NightInvestigate, None).is_err());
    }

    #[test]
    fn test_display_is_snake_case() {
        assert_eq!(RoundPhase::CheckWinnerNight.to_string(), "check_winner_night");
        let err = IllegalTransition {
            from: RoundPhase::Complete,
            to: RoundPhase::Summarize,
        };
        assert_eq!(err.to_string(), "illegal phase transition: complete → summarize");
    }
}
