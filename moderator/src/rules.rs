//! Pure resolution rules: winner check, majority exile, night outcome and
//! next-speaker selection.
//!
//! Nothing in here touches agents or performs I/O. Randomness is always
//! passed in so that callers can seed it.

use std::collections::BTreeMap;

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use crate::session::Winner;

/// Decide the game from the alive roster.
///
/// Werewolves win at parity (`W >= V`), which is checked first; villagers
/// win once no werewolf is left.
pub fn determine_winner(alive: &[String], werewolves: &[String]) -> Option<Winner> {
    let wolves = alive.iter().filter(|p| werewolves.contains(p)).count();
    let others = alive.len() - wolves;
    if wolves >= others {
        Some(Winner::Werewolves)
    } else if wolves == 0 {
        Some(Winner::Villagers)
    } else {
        None
    }
}

/// Count votes per target, in the order targets are first encountered while
/// walking the ballot map.
pub fn tally_votes(votes: &BTreeMap<String, String>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for target in votes.values() {
        match counts.iter_mut().find(|(name, _)| name == target) {
            Some((_, n)) => *n += 1,
            None => counts.push((target.clone(), 1)),
        }
    }
    counts
}

/// The agent to exile, if the leader holds a strict majority of `alive`.
///
/// Among tied leaders the first one encountered by [`tally_votes`] wins.
pub fn resolve_exile(votes: &BTreeMap<String, String>, alive: usize) -> Option<String> {
    let mut leader: Option<(String, usize)> = None;
    for (name, count) in tally_votes(votes) {
        if leader.as_ref().map_or(true, |(_, best)| count > *best) {
            leader = Some((name, count));
        }
    }
    leader
        .filter(|(_, count)| count * 2 > alive)
        .map(|(name, _)| name)
}

/// What the night did to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NightOutcome {
    Removed(String),
    Saved,
}

/// The victim is removed unless the doctor protected exactly that player.
pub fn resolve_night(eliminated: &str, protected: Option<&str>) -> NightOutcome {
    if protected == Some(eliminated) {
        NightOutcome::Saved
    } else {
        NightOutcome::Removed(eliminated.to_string())
    }
}

impl NightOutcome {
    pub fn announcement(&self) -> String {
        match self {
            Self::Removed(name) => {
                format!("The Werewolves removed {} from the game during the night.", name)
            }
            Self::Saved => "No one was removed from the game during the night.".to_string(),
        }
    }
}

pub fn exile_announcement(exiled: Option<&str>) -> String {
    match exiled {
        Some(name) => format!("The majority voted to remove {} from the game.", name),
        None => {
            "A majority vote was not reached, so no one was removed from the game.".to_string()
        }
    }
}

/// Every bidder holding the highest bid, in map order.
pub fn max_bidders(bids: &BTreeMap<String, u8>) -> Vec<String> {
    let Some(max) = bids.values().copied().max() else {
        return Vec::new();
    };
    bids.iter()
        .filter(|(_, bid)| **bid == max)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Pick the next speaker from the highest bidders.
///
/// Candidates named in the previous utterance are entered twice, which
/// doubles their odds without excluding anyone else. Returns `None` only
/// when nobody bid.
pub fn select_speaker<R>(
    bids: &BTreeMap<String, u8>,
    previous_utterance: Option<&str>,
    rng: &mut R,
) -> Option<String>
where
    R: Rng + ?Sized,
{
    let mut pool = max_bidders(bids);
    if let Some(text) = previous_utterance {
        let mentioned: Vec<String> = pool
            .iter()
            .filter(|name| text.contains(name.as_str()))
            .cloned()
            .collect();
        pool.extend(mentioned);
    }
    pool.shuffle(rng);
    pool.choose(rng).cloned()
}
