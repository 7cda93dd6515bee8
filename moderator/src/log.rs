//! Decision audit trail.
//!
//! A [`RoundLog`] mirrors a [`crate::session::Round`] but records *how* each
//! decision was reached: the rendered prompt, what the backend returned and
//! what was parsed out of it. Nothing here feeds back into control flow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One call to the decision gateway, successful or not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub prompt: String,
    /// Raw backend output. After exhausted retries this holds every failed
    /// attempt joined by [`FAILED_ATTEMPT_SEPARATOR`].
    #[serde(default)]
    pub raw_response: String,
    /// Parsed structured result, `None` when every attempt failed.
    #[serde(default)]
    pub result: Option<Value>,
}

/// Joins raw outputs of failed attempts in an exhausted record.
pub const FAILED_ATTEMPT_SEPARATOR: &str = "-------";

impl DecisionRecord {
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }

    /// The `reasoning` field of the parsed result, if present.
    pub fn reasoning(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("reasoning"))
            .and_then(Value::as_str)
    }
}

/// A decision attributed to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub agent: String,
    pub record: DecisionRecord,
}

impl AgentDecision {
    pub fn new(agent: impl Into<String>, record: DecisionRecord) -> Self {
        Self {
            agent: agent.into(),
            record,
        }
    }
}

/// One agent's ballot at a voting checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteLog {
    pub voter: String,
    #[serde(default)]
    pub voted_for: Option<String>,
    pub record: DecisionRecord,
}

/// Audit trail for one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundLog {
    #[serde(default)]
    pub eliminate: Option<DecisionRecord>,
    #[serde(default)]
    pub investigate: Option<DecisionRecord>,
    #[serde(default)]
    pub protect: Option<DecisionRecord>,
    /// One entry per debate turn, each holding every bidder's record.
    #[serde(default)]
    pub bids: Vec<Vec<AgentDecision>>,
    #[serde(default)]
    pub debate: Vec<AgentDecision>,
    /// One entry per voting checkpoint.
    #[serde(default)]
    pub votes: Vec<Vec<VoteLog>>,
    #[serde(default)]
    pub summaries: Vec<AgentDecision>,
}
