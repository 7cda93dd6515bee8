//! Agent operations on top of the decision gateway.
//!
//! An operation runs in three steps so that fan-out never shares an
//! agent across tasks:
//!
//! 1. [`DecisionRequest::prepare`] reads the agent's view and builds an
//!    owned request (context, model, option set).
//! 2. [`DecisionRequest::run`] calls the gateway; it needs no game state
//!    and can run on any task.
//! 3. The `apply_*` functions write the outcome back into the agent on the
//!    orchestrating task.

use moderator::{Agent, GameError, GameResult, Role};
use rand::Rng;

use crate::gateway::{Decision, DecisionGateway, GatewayError};
use crate::prompts::{Action, PromptContext, TableSettings};

/// Highest bid an agent may place.
pub const MAX_BID: u8 = 4;

/// An owned, ready-to-send decision for one agent.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub agent: String,
    pub action: Action,
    pub model: String,
    pub context: PromptContext,
    pub options: Option<Vec<String>>,
}

/// The gateway's answer, tagged with who asked.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub agent: String,
    pub action: Action,
    pub decision: Decision,
}

impl DecisionRequest {
    pub fn prepare<R>(agent: &Agent, action: Action, table: TableSettings, rng: &mut R) -> GameResult<Self>
    where
        R: Rng + ?Sized,
    {
        if let Some(required) = required_role(action) {
            if agent.role() != required {
                return Err(GameError::MissingRole(required));
            }
        }

        let options = match action {
            Action::Bid => Some((0..=MAX_BID).map(|b| b.to_string()).collect()),
            Action::Vote => Some(agent.vote_options()?),
            Action::Remove => Some(agent.eliminate_options()?),
            Action::Protect => Some(agent.protect_options()?),
            Action::Investigate => Some(agent.investigate_options()?),
            Action::Debate | Action::Summarize => None,
        };

        let mut context = PromptContext::for_agent(agent, table, rng)?;
        if let Some(options) = &options {
            context = context.with_options(options);
        }

        Ok(Self {
            agent: agent.name().to_string(),
            action,
            model: agent.model.clone(),
            context,
            options,
        })
    }

    pub async fn run(self, gateway: &DecisionGateway) -> Result<DecisionOutcome, GatewayError> {
        let decision = gateway
            .decide(self.action, &self.model, &self.context, self.options.as_deref())
            .await?;
        Ok(DecisionOutcome {
            agent: self.agent,
            action: self.action,
            decision,
        })
    }
}

fn required_role(action: Action) -> Option<Role> {
    match action {
        Action::Remove => Some(Role::Werewolf),
        Action::Protect => Some(Role::Doctor),
        Action::Investigate => Some(Role::Seer),
        _ => None,
    }
}

// ── Applying outcomes ───────────────────────────────────────────────────

/// Parse the bid and keep the reasoning for the debate prompt.
pub fn apply_bid(agent: &mut Agent, decision: &Decision) -> Option<u8> {
    let bid = decision.text()?.parse::<u8>().ok().filter(|b| *b <= MAX_BID)?;
    if let Some(reasoning) = decision.record.reasoning() {
        agent.bidding_rationale = reasoning.to_string();
    }
    Some(bid)
}

/// The chosen target. At the round's last checkpoint the vote is also
/// noted privately.
pub fn apply_vote(agent: &mut Agent, decision: &Decision, final_checkpoint: bool) -> GameResult<Option<String>> {
    let Some(target) = decision.text() else {
        return Ok(None);
    };
    if final_checkpoint {
        agent.add_observation(format!(
            "After the debate, I voted to remove {} from the game.",
            target
        ))?;
    }
    Ok(Some(target))
}

pub fn apply_protect(agent: &mut Agent, decision: &Decision) -> GameResult<Option<String>> {
    let Some(target) = decision.text() else {
        return Ok(None);
    };
    agent.add_observation(format!("During the night, I chose to protect {}", target))?;
    Ok(Some(target))
}

/// Note the victim for one living werewolf; `pack_size` picks "we" or "I".
pub fn note_elimination(wolf: &mut Agent, target: &str, pack_size: usize) -> GameResult<()> {
    let pronoun = if pack_size > 1 { "we" } else { "I" };
    wolf.add_observation(format!(
        "During the night, {} decided to eliminate {}.",
        pronoun, target
    ))
}

/// Store a non-empty summary as a private observation.
pub fn apply_summary(agent: &mut Agent, decision: &Decision) -> GameResult<Option<String>> {
    let Some(summary) = decision.text() else {
        return Ok(None);
    };
    let summary = summary.trim_matches('"').trim().to_string();
    if summary.is_empty() {
        return Ok(None);
    }
    agent.add_observation(format!("Summary: {}", summary))?;
    Ok(Some(summary))
}
