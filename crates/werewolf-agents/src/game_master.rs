//! Game Master: drives rounds until a side wins or a round fails.
//!
//! Each round walks a [`RoundMachine`] through the night, the debate and
//! the exile. Phases with a single actor run one decision at a time.
//! Bids, votes and summaries fan out over a bounded worker pool; workers
//! only return outcomes, and every write to the session happens here once
//! all of them have joined.
//!
//! A missing decision where the round needs one is fatal. The round stays
//! unsuccessful, `session.error` is set and the loop stops so the caller
//! can persist a partial snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use moderator::{
    determine_winner, exile_announcement, resolve_exile, resolve_night, select_speaker, AgentDecision,
    GameError, IllegalTransition, NightOutcome, Role, RoundMachine, RoundPhase, Session, Utterance,
    VoteLog, Winner,
};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::GameConfig;
use crate::gateway::{Decision, DecisionGateway, GatewayError};
use crate::player::{
    apply_bid, apply_protect, apply_summary, apply_vote, note_elimination, DecisionOutcome,
    DecisionRequest,
};
use crate::prompts::{Action, TableSettings};

#[derive(Debug, Error)]
pub enum GameMasterError {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("decision worker failed: {0}")]
    Join(#[from] JoinError),
}

impl From<IllegalTransition> for GameMasterError {
    fn from(err: IllegalTransition) -> Self {
        Self::Game(GameError::Transition(err))
    }
}

/// Round-driving knobs.
#[derive(Debug, Clone, Copy)]
pub struct GameSettings {
    pub max_debate_turns: usize,
    /// Vote after every debate turn, not only after the last one.
    pub synthetic_votes: bool,
    /// Width of the worker pool for fanned-out phases.
    pub threads: usize,
}

impl GameSettings {
    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            max_debate_turns: config.max_debate_turns,
            synthetic_votes: config.synthetic_votes,
            threads: config.threads,
        }
    }
}

pub struct GameMaster {
    session: Session,
    gateway: Arc<DecisionGateway>,
    settings: GameSettings,
    rng: StdRng,
}

impl GameMaster {
    pub fn new(session: Session, gateway: Arc<DecisionGateway>, settings: GameSettings, rng: StdRng) -> Self {
        Self {
            session,
            gateway,
            settings,
            rng,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Play rounds until a winner is decided or a round fails.
    pub async fn run_game(&mut self) -> Option<Winner> {
        while self.session.winner.is_none() {
            let round = self.session.start_round();
            info!(session = %self.session.session_id, round, "Starting round");

            if let Err(err) = self.run_round(round).await {
                error!(session = %self.session.session_id, round, error = %err, "Round failed");
                self.session.error = Some(format!("Round {} failed: {}", round, err));
                return None;
            }
        }

        if let Some(winner) = self.session.winner {
            info!(session = %self.session.session_id, %winner, "Game over");
        }
        self.session.winner
    }

    async fn run_round(&mut self, round: u32) -> Result<(), GameMasterError> {
        let mut machine = RoundMachine::new(round);
        let outcome = self.drive(&mut machine).await;
        if let Err(err) = &outcome {
            if !machine.is_terminal() {
                if let Err(illegal) = machine.fail(&err.to_string()) {
                    warn!(round, error = %illegal, "Could not mark round as failed");
                }
            }
        }
        outcome
    }

    async fn drive(&mut self, machine: &mut RoundMachine) -> Result<(), GameMasterError> {
        self.night_eliminate().await?;
        machine.advance(RoundPhase::NightProtect, None)?;
        self.night_protect().await?;
        machine.advance(RoundPhase::NightInvestigate, None)?;
        self.night_investigate().await?;
        machine.advance(RoundPhase::NightResolve, None)?;
        self.night_resolve()?;

        machine.advance(RoundPhase::CheckWinnerNight, None)?;
        if self.check_winner()? {
            self.session.current_round_mut()?.success = true;
            machine.advance(RoundPhase::Complete, Some("winner decided after the night"))?;
            return Ok(());
        }

        machine.advance(RoundPhase::DayDebate, None)?;
        self.day_debate().await?;
        machine.advance(RoundPhase::DayExile, None)?;
        self.day_exile()?;

        machine.advance(RoundPhase::CheckWinnerDay, None)?;
        if self.check_winner()? {
            self.session.current_round_mut()?.success = true;
            machine.advance(RoundPhase::Complete, Some("winner decided after the exile"))?;
            return Ok(());
        }

        machine.advance(RoundPhase::Summarize, None)?;
        self.summarize().await?;
        self.session.current_round_mut()?.success = true;
        machine.advance(RoundPhase::Complete, None)?;
        Ok(())
    }

    // ── Night ───────────────────────────────────────────────────────────

    async fn night_eliminate(&mut self) -> Result<(), GameMasterError> {
        let wolves = self.alive_with_role(Role::Werewolf)?;
        let actor = wolves
            .choose(&mut self.rng)
            .cloned()
            .ok_or(GameError::MissingRole(Role::Werewolf))?;

        let decision = self.ask(&actor, Action::Remove).await?;
        self.session.current_log_mut()?.eliminate = Some(decision.record.clone());
        let target = decision
            .text()
            .ok_or_else(|| GameError::invalid_actor(RoundPhase::NightEliminate.to_string(), &actor, "remove"))?;

        self.session.current_round_mut()?.eliminated = Some(target.clone());
        for wolf in &wolves {
            note_elimination(self.session.agent_mut(wolf)?, &target, wolves.len())?;
        }
        info!(werewolf = %actor, %target, "Werewolves chose a victim");
        Ok(())
    }

    async fn night_protect(&mut self) -> Result<(), GameMasterError> {
        let Some(doctor) = self.alive_with_role(Role::Doctor)?.into_iter().next() else {
            debug!("Doctor is out of the game, skipping protection");
            return Ok(());
        };

        let decision = self.ask(&doctor, Action::Protect).await?;
        self.session.current_log_mut()?.protect = Some(decision.record.clone());
        let target = apply_protect(self.session.agent_mut(&doctor)?, &decision)?
            .ok_or_else(|| GameError::invalid_actor(RoundPhase::NightProtect.to_string(), &doctor, "protect"))?;

        self.session.current_round_mut()?.protected = Some(target.clone());
        info!(%doctor, %target, "Doctor protected a player");
        Ok(())
    }

    async fn night_investigate(&mut self) -> Result<(), GameMasterError> {
        let Some(seer) = self.alive_with_role(Role::Seer)?.into_iter().next() else {
            debug!("Seer is out of the game, skipping investigation");
            return Ok(());
        };
        if self.session.agent(&seer)?.investigate_options()?.is_empty() {
            debug!(%seer, "Seer has already investigated everyone left, skipping investigation");
            return Ok(());
        }

        let decision = self.ask(&seer, Action::Investigate).await?;
        self.session.current_log_mut()?.investigate = Some(decision.record.clone());
        let target = decision.text().ok_or_else(|| {
            GameError::invalid_actor(RoundPhase::NightInvestigate.to_string(), &seer, "investigate")
        })?;

        let revealed = self.session.agent(&target)?.role();
        self.session.agent_mut(&seer)?.record_investigation(&target, revealed)?;
        self.session.current_round_mut()?.unmasked = Some(target.clone());
        info!(%seer, %target, role = %revealed, "Seer investigated a player");
        Ok(())
    }

    fn night_resolve(&mut self) -> Result<(), GameMasterError> {
        let round = self.session.current_round()?;
        let eliminated = round.eliminated.clone().ok_or_else(|| {
            GameError::invalid_actor(RoundPhase::NightResolve.to_string(), "werewolves", "remove")
        })?;

        let outcome = resolve_night(&eliminated, round.protected.as_deref());
        if let NightOutcome::Removed(name) = &outcome {
            self.remove_from_play(name)?;
        }
        self.broadcast(&outcome.announcement())
    }

    // ── Day ─────────────────────────────────────────────────────────────

    async fn day_debate(&mut self) -> Result<(), GameMasterError> {
        let max_turns = self.settings.max_debate_turns;
        let mut previous_speaker: Option<String> = None;

        for turn in 0..max_turns {
            let speaker = self.next_speaker(previous_speaker.as_deref()).await?;
            let decision = self.ask(&speaker, Action::Debate).await?;
            self.session
                .current_log_mut()?
                .debate
                .push(AgentDecision::new(&speaker, decision.record.clone()));
            let text = decision
                .text()
                .ok_or_else(|| GameError::invalid_actor(RoundPhase::DayDebate.to_string(), &speaker, "debate"))?;

            self.session.current_round_mut()?.debate.push(Utterance {
                speaker: speaker.clone(),
                text: text.clone(),
            });
            for name in self.roster()? {
                self.session
                    .agent_mut(&name)?
                    .view_mut()?
                    .record_utterance(&speaker, &text);
            }
            info!(turn, %speaker, said = %text, "Debate");

            let final_turn = turn + 1 == max_turns;
            if final_turn || self.settings.synthetic_votes {
                self.run_vote(final_turn).await?;
            }
            previous_speaker = Some(speaker);
        }

        if max_turns == 0 {
            self.run_vote(true).await?;
        }
        Ok(())
    }

    /// Collect bids from everyone but the last speaker and pick the next one.
    async fn next_speaker(&mut self, previous: Option<&str>) -> Result<String, GameMasterError> {
        let bidders: Vec<String> = self
            .roster()?
            .into_iter()
            .filter(|name| Some(name.as_str()) != previous)
            .collect();
        let outcomes = self.fan_out(&bidders, Action::Bid).await?;

        let mut bids = BTreeMap::new();
        let mut records = Vec::with_capacity(outcomes.len());
        let mut failed = None;
        for (name, outcome) in outcomes {
            match apply_bid(self.session.agent_mut(&name)?, &outcome.decision) {
                Some(bid) => {
                    bids.insert(name.clone(), bid);
                }
                None => {
                    failed.get_or_insert_with(|| name.clone());
                }
            }
            records.push(AgentDecision::new(name, outcome.decision.record));
        }

        self.session.current_log_mut()?.bids.push(records);
        self.session.current_round_mut()?.bids.push(bids.clone());
        if let Some(bidder) = failed {
            return Err(GameError::invalid_actor(RoundPhase::DayDebate.to_string(), bidder, "bid").into());
        }

        let last_utterance = self.session.current_round()?.debate.last().map(|u| u.text.clone());
        let speaker = select_speaker(&bids, last_utterance.as_deref(), &mut self.rng)
            .ok_or_else(|| GameError::invalid_actor(RoundPhase::DayDebate.to_string(), "bidders", "bid"))?;
        debug!(?bids, %speaker, "Selected next speaker");
        Ok(speaker)
    }

    /// One voting checkpoint. Partial ballots are kept in the round and its
    /// log even when a voter fails.
    async fn run_vote(&mut self, final_checkpoint: bool) -> Result<(), GameMasterError> {
        let voters = self.roster()?;
        let outcomes = self.fan_out(&voters, Action::Vote).await?;

        let mut votes = BTreeMap::new();
        let mut ballots = Vec::with_capacity(outcomes.len());
        let mut failed = None;
        for (name, outcome) in outcomes {
            let target = apply_vote(self.session.agent_mut(&name)?, &outcome.decision, final_checkpoint)?;
            match &target {
                Some(t) => {
                    votes.insert(name.clone(), t.clone());
                }
                None => {
                    failed.get_or_insert_with(|| name.clone());
                }
            }
            ballots.push(VoteLog {
                voter: name,
                voted_for: target,
                record: outcome.decision.record,
            });
        }

        debug!(?votes, final_checkpoint, "Votes collected");
        self.session.current_log_mut()?.votes.push(ballots);
        self.session.current_round_mut()?.votes.push(votes);
        match failed {
            Some(voter) => Err(GameError::invalid_actor(RoundPhase::DayDebate.to_string(), voter, "vote").into()),
            None => Ok(()),
        }
    }

    fn day_exile(&mut self) -> Result<(), GameMasterError> {
        let round = self.session.current_round()?;
        let votes = round.votes.last().cloned().unwrap_or_default();
        let exiled = resolve_exile(&votes, round.players.len());

        if let Some(name) = &exiled {
            self.session.current_round_mut()?.exiled = Some(name.clone());
            self.remove_from_play(name)?;
        }
        self.broadcast(&exile_announcement(exiled.as_deref()))
    }

    fn check_winner(&mut self) -> Result<bool, GameMasterError> {
        let wolves = self.session.names_with_role(Role::Werewolf);
        let winner = determine_winner(&self.session.current_round()?.players, &wolves);
        if let Some(winner) = winner {
            info!(%winner, "Winner decided");
            self.session.winner = Some(winner);
        }
        Ok(winner.is_some())
    }

    /// End-of-round notes. A failed summary is logged and skipped.
    async fn summarize(&mut self) -> Result<(), GameMasterError> {
        let roster = self.roster()?;
        let outcomes = match self.fan_out(&roster, Action::Summarize).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(error = %err, "Summaries failed");
                return Ok(());
            }
        };

        for (name, outcome) in outcomes {
            match apply_summary(self.session.agent_mut(&name)?, &outcome.decision) {
                Ok(Some(_)) => {}
                Ok(None) => warn!(agent = %name, "No summary produced"),
                Err(err) => warn!(agent = %name, error = %err, "Could not store summary"),
            }
            self.session
                .current_log_mut()?
                .summaries
                .push(AgentDecision::new(name, outcome.decision.record));
        }
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn table(&self) -> TableSettings {
        TableSettings {
            num_players: self.session.names().len(),
            max_debate_turns: self.settings.max_debate_turns,
        }
    }

    fn roster(&self) -> Result<Vec<String>, GameMasterError> {
        Ok(self.session.current_round()?.players.clone())
    }

    fn alive_with_role(&self, role: Role) -> Result<Vec<String>, GameMasterError> {
        let round = self.session.current_round()?;
        Ok(self
            .session
            .names_with_role(role)
            .into_iter()
            .filter(|name| round.is_alive(name))
            .collect())
    }

    /// One decision from one agent, on the current task.
    async fn ask(&mut self, name: &str, action: Action) -> Result<Decision, GameMasterError> {
        let table = self.table();
        let request = DecisionRequest::prepare(self.session.agent(name)?, action, table, &mut self.rng)?;
        Ok(request.run(&self.gateway).await?.decision)
    }

    /// One decision from each named agent, at most `threads` in flight.
    ///
    /// Every worker is awaited even after one fails; the first failure is
    /// then returned.
    async fn fan_out(
        &mut self,
        names: &[String],
        action: Action,
    ) -> Result<BTreeMap<String, DecisionOutcome>, GameMasterError> {
        let table = self.table();
        let mut requests = Vec::with_capacity(names.len());
        for name in names {
            requests.push(DecisionRequest::prepare(
                self.session.agent(name)?,
                action,
                table,
                &mut self.rng,
            )?);
        }

        let permits = Arc::new(Semaphore::new(self.settings.threads.max(1)));
        let mut workers = JoinSet::new();
        for request in requests {
            let permits = permits.clone();
            let gateway = self.gateway.clone();
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                request.run(&gateway).await
            });
        }

        let mut outcomes = BTreeMap::new();
        let mut first_error: Option<GameMasterError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    outcomes.insert(outcome.agent.clone(), outcome);
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err.into());
                }
                Err(err) => {
                    first_error.get_or_insert(err.into());
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    /// Take a player out of the round and out of everyone's view.
    fn remove_from_play(&mut self, name: &str) -> Result<(), GameMasterError> {
        self.session.current_round_mut()?.remove_player(name);
        self.session.agent_mut(name)?.clear_view();
        for other in self.roster()? {
            self.session.agent_mut(&other)?.view_mut()?.remove_player(name);
        }
        Ok(())
    }

    /// Moderator announcement to everyone still in the round.
    fn broadcast(&mut self, announcement: &str) -> Result<(), GameMasterError> {
        info!(%announcement, "Moderator");
        for name in self.roster()? {
            self.session.agent_mut(&name)?.add_announcement(announcement)?;
        }
        Ok(())
    }
}
