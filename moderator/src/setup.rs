//! Role dealing for a new game.

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use tracing::info;

use crate::agent::{Agent, Role};
use crate::error::{GameError, GameResult};

/// Smallest table where the werewolves do not already have parity.
pub const MIN_PLAYERS: usize = 5;

/// Sample `num_players` names from `pool` and deal the roles.
///
/// One Seer, one Doctor and two Werewolves are drawn first; everyone left
/// is a Villager. Werewolves use `werewolf_model`, everyone else
/// `villager_model`.
pub fn deal_roles<R>(
    pool: &[String],
    num_players: usize,
    villager_model: &str,
    werewolf_model: &str,
    rng: &mut R,
) -> GameResult<Vec<Agent>>
where
    R: Rng + ?Sized,
{
    if num_players < MIN_PLAYERS {
        return Err(GameError::InvalidRoster(format!(
            "at least {} players are needed, got {}",
            MIN_PLAYERS, num_players
        )));
    }
    if pool.len() < num_players {
        return Err(GameError::InvalidRoster(format!(
            "name pool has {} names but {} players were requested",
            pool.len(),
            num_players
        )));
    }

    let mut names: Vec<String> = pool.choose_multiple(rng, num_players).cloned().collect();
    names.shuffle(rng);

    let mut agents = Vec::with_capacity(num_players);
    for (idx, name) in names.into_iter().enumerate() {
        let role = match idx {
            0 => Role::Seer,
            1 => Role::Doctor,
            2 | 3 => Role::Werewolf,
            _ => Role::Villager,
        };
        let model = if role == Role::Werewolf {
            werewolf_model
        } else {
            villager_model
        };
        info!(agent = %name, role = %role, model, "Dealt role");
        agents.push(Agent::new(name, role, model));
    }
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool() -> Vec<String> {
        ["Derek", "Scott", "Jacob", "Isaac", "Hayley", "David", "Tyler", "Ginger", "Mason"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_deal_produces_valid_session() {
        let mut rng = StdRng::seed_from_u64(3);
        let agents = deal_roles(&pool(), 8, "villager-model", "wolf-model", &mut rng).unwrap();
        assert_eq!(agents.len(), 8);
        for agent in &agents {
            let expected = if agent.is_werewolf() { "wolf-model" } else { "villager-model" };
            assert_eq!(agent.model, expected);
        }
        let session = Session::new("s", agents).unwrap();
        assert_eq!(session.names_with_role(Role::Villager).len(), 4);
    }

    #[test]
    fn test_deal_is_seeded() {
        let deal = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            deal_roles(&pool(), 6, "v", "w", &mut rng)
                .unwrap()
                .iter()
                .map(|a| (a.name().to_string(), a.role()))
                .collect::<Vec<_>>()
        };
        assert_eq!(deal(11), deal(11));
    }

    #[test]
    fn test_deal_rejects_small_tables() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(deal_roles(&pool(), 4, "v", "w", &mut rng).is_err());
        assert!(deal_roles(&pool()[..5], 6, "v", "w", &mut rng).is_err());
    }
}
