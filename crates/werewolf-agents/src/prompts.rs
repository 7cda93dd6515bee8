//! Prompt templates, response schemas, and the context they are rendered
//! with.
//!
//! Every action template includes a shared preamble (rules, the agent's
//! state, private notes) and ends in a fenced JSON sketch of the expected
//! answer. The companion schema is derived from the matching response
//! struct.

use std::collections::HashMap;
use std::fmt;

use minijinja::Environment;
use moderator::{format_observations, Agent, GameResult};
use rand::seq::SliceRandom;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ── Actions ─────────────────────────────────────────────────────────────

/// One decision an agent can be asked to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Bid,
    Debate,
    Vote,
    Investigate,
    Remove,
    Protect,
    Summarize,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Bid,
        Action::Debate,
        Action::Vote,
        Action::Investigate,
        Action::Remove,
        Action::Protect,
        Action::Summarize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Debate => "debate",
            Self::Vote => "vote",
            Self::Investigate => "investigate",
            Self::Remove => "remove",
            Self::Protect => "protect",
            Self::Summarize => "summarize",
        }
    }

    /// Field of the structured answer that carries the decision.
    pub fn result_key(self) -> &'static str {
        match self {
            Self::Debate => "say",
            Self::Summarize => "summary",
            other => other.name(),
        }
    }

    /// Whether the answer must come from a fixed option set.
    pub fn is_constrained(self) -> bool {
        !matches!(self, Self::Debate | Self::Summarize)
    }

    fn template(self) -> &'static str {
        match self {
            Self::Bid => BID,
            Self::Debate => DEBATE,
            Self::Vote => VOTE,
            Self::Investigate => INVESTIGATE,
            Self::Remove => REMOVE,
            Self::Protect => PROTECT,
            Self::Summarize => SUMMARIZE,
        }
    }

    fn schema(self) -> schemars::schema::RootSchema {
        match self {
            Self::Bid => schemars::schema_for!(BidResponse),
            Self::Debate => schemars::schema_for!(DebateResponse),
            Self::Vote => schemars::schema_for!(VoteResponse),
            Self::Investigate => schemars::schema_for!(InvestigateResponse),
            Self::Remove => schemars::schema_for!(RemoveResponse),
            Self::Protect => schemars::schema_for!(ProtectResponse),
            Self::Summarize => schemars::schema_for!(SummarizeResponse),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Response shapes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BidResponse {
    #[schemars(description = "Why speaking now does or does not matter")]
    pub reasoning: String,
    #[schemars(description = "Bid from \"0\" to \"4\"")]
    pub bid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DebateResponse {
    #[schemars(description = "What the statement should achieve")]
    pub reasoning: String,
    #[schemars(description = "Public statement to the other players")]
    pub say: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VoteResponse {
    pub reasoning: String,
    #[schemars(description = "Name of the player to exile")]
    pub vote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InvestigateResponse {
    pub reasoning: String,
    #[schemars(description = "Name of the player to investigate")]
    pub investigate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoveResponse {
    pub reasoning: String,
    #[schemars(description = "Name of the player to remove tonight")]
    pub remove: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProtectResponse {
    pub reasoning: String,
    #[schemars(description = "Name of the player to protect tonight")]
    pub protect: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummarizeResponse {
    pub reasoning: String,
    #[schemars(description = "First-person notes on the round")]
    pub summary: String,
}

// ── Context ─────────────────────────────────────────────────────────────

/// Table-wide numbers every prompt needs.
#[derive(Debug, Clone, Copy)]
pub struct TableSettings {
    pub num_players: usize,
    pub max_debate_turns: usize,
}

/// Everything a template may interpolate.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub name: String,
    pub role: String,
    pub round: u32,
    pub observations: Vec<String>,
    pub remaining_players: String,
    pub debate: Vec<String>,
    pub bidding_rationale: String,
    pub debate_turns_left: usize,
    pub personality: Option<String>,
    pub num_players: usize,
    pub num_villagers: usize,
    pub werewolf_context: String,
    /// Comma-separated choices for constrained actions.
    pub options: Option<String>,
}

impl PromptContext {
    /// Build the context from the agent's current view. The roster is
    /// shuffled for presentation, with the agent marked `(You)`.
    pub fn for_agent<R>(agent: &Agent, table: TableSettings, rng: &mut R) -> GameResult<Self>
    where
        R: Rng + ?Sized,
    {
        let view = agent.view()?;

        let mut remaining: Vec<String> = view
            .players
            .iter()
            .map(|p| {
                if p == agent.name() {
                    format!("{} (You)", p)
                } else {
                    p.clone()
                }
            })
            .collect();
        remaining.shuffle(rng);

        let debate: Vec<String> = view
            .debate
            .iter()
            .map(|u| {
                if u.speaker == agent.name() {
                    format!("{} (You): {}", u.speaker, u.text)
                } else {
                    format!("{}: {}", u.speaker, u.text)
                }
            })
            .collect();

        Ok(Self {
            name: agent.name().to_string(),
            role: agent.role().to_string(),
            round: view.round,
            observations: format_observations(&agent.observations),
            remaining_players: remaining.join(", "),
            debate_turns_left: table.max_debate_turns.saturating_sub(debate.len()),
            debate,
            bidding_rationale: agent.bidding_rationale.clone(),
            personality: agent.personality.clone(),
            num_players: table.num_players,
            num_villagers: table.num_players.saturating_sub(4),
            werewolf_context: agent.werewolf_context()?,
            options: None,
        })
    }

    pub fn with_options(mut self, options: &[String]) -> Self {
        self.options = Some(options.join(", "));
        self
    }
}

// ── Library ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("schema error: {0}")]
    Schema(#[from] serde_json::Error),
}

static EMPTY_SCHEMA: Value = Value::Null;

/// Compiled templates plus their response schemas.
pub struct PromptLibrary {
    env: Environment<'static>,
    schemas: HashMap<Action, Value>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("preamble", PREAMBLE)?;
        env.add_template("debate_so_far", DEBATE_SO_FAR)?;

        let mut schemas = HashMap::new();
        for action in Action::ALL {
            env.add_template(action.name(), action.template())?;
            schemas.insert(action, clean_schema(serde_json::to_value(action.schema())?));
        }
        Ok(Self { env, schemas })
    }

    pub fn render(&self, action: Action, context: &PromptContext) -> Result<String, minijinja::Error> {
        self.env.get_template(action.name())?.render(context)
    }

    pub fn schema(&self, action: Action) -> &Value {
        self.schemas.get(&action).unwrap_or(&EMPTY_SCHEMA)
    }
}

/// Drop draft metadata that provider schema dialects reject.
fn clean_schema(mut schema: Value) -> Value {
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

// ── Templates ───────────────────────────────────────────────────────────

const PREAMBLE: &str = r#"You are {{ name }}, a player in a game of Werewolf with {{ num_players }} players.

GAME RULES:
- Hidden roles: {{ num_villagers }} Villagers, 2 Werewolves, 1 Seer and 1 Doctor. Only the Werewolves know each other.
- Every night the Werewolves remove one player. The Doctor protects one player, who survives if the Werewolves chose them. The Seer learns the role of one player.
- Every day the players debate and then vote. A player is exiled only with more than half of the votes.
- The Villagers, Seer and Doctor win once both Werewolves are gone. The Werewolves win once they match the number of other players.

YOUR STATE:
- Round: {{ round }}
- Your role: {{ role }}{{ werewolf_context }}
{% if personality %}
- Your personality: {{ personality }}
{% endif %}
- Players still in the game: {{ remaining_players }}

{% if observations %}
YOUR PRIVATE NOTES:
{% for entry in observations %}
{{ entry }}
{% endfor %}

{% endif %}
"#;

const DEBATE_SO_FAR: &str = r#"ROUND {{ round }} DEBATE:
{% for line in debate %}
{{ line }}
{% else %}
Nobody has spoken yet.
{% endfor %}

"#;

const BID: &str = r#"{% include "preamble" %}
{% include "debate_so_far" %}
TASK: Bid for the chance to speak next. The highest bid speaks.
- 0: I would rather listen for now.
- 1: I have general thoughts to share.
- 2: I have something specific and important to add.
- 3: I urgently need to speak next.
- 4: I was addressed directly and must answer.
- You can speak at most {{ debate_turns_left }} more time(s) this round.

GUIDANCE:
- Weigh how much you have already said against how suspicious silence looks.
{% if role == "Werewolf" %}
- Decide whether to steer suspicion toward Villagers or stay out of sight.
{% else %}
- Speak up if you are being accused, if the debate is drifting, or if you hold information that matters.
{% endif %}

```json
{
  "reasoning": "string",  // Why speaking now does or does not matter, in one or two sentences.
  "bid": "string"  // One of "0" | "1" | "2" | "3" | "4"
}
```
"#;

const DEBATE: &str = r#"{% include "preamble" %}
{% include "debate_so_far" %}
TASK: It is your turn to speak as {{ name }} the {{ role }}.
- What you were thinking when you asked to speak: {{ bidding_rationale }}
{% if role == "Werewolf" %}
- Keep suspicion away from yourself and your partner, and turn the Villagers against each other.
- A false claim can be powerful, but use it sparingly.
{% else %}
- Find the Werewolves. Question accusations, point out inconsistencies and call out players who stay quiet.
{% if role in ["Seer", "Doctor"] %}
- Revealing your role gives your information weight but makes you a target. Choose the moment.
{% else %}
- If someone claims to be the Seer or Doctor, test their claim against what you know.
{% endif %}
{% endif %}

```json
{
  "reasoning": "string",  // What you want to achieve with this statement.
  "say": "string"  // Your public statement. Be concise and respond to what others said.
}
```
"#;

const VOTE: &str = r#"{% include "preamble" %}
{% include "debate_so_far" %}
TASK: Vote for the player you want exiled. Your vote is private.
{% if role == "Werewolf" %}
- Go after influential Villagers, or join suspicion that is already building against one.
{% else %}
- Look for contradictions, deflection, and players who sow discord or say little.
{% endif %}
- You must pick someone.

```json
{
  "reasoning": "string",  // Why this player.
  "vote": "string"  // One of: {{ options }}
}
```
"#;

const INVESTIGATE: &str = r#"{% include "preamble" %}
TASK: It is night in round {{ round }}. As the Seer, choose one player whose role you will learn.
{% if round == 0 %}
- Nothing has happened yet, so any choice is as good as another.
{% else %}
- Favor influential players and anyone whose behavior does not fit a Villager.
{% endif %}

```json
{
  "reasoning": "string",  // Why this player.
  "investigate": "string"  // One of: {{ options }}
}
```
"#;

const REMOVE: &str = r#"{% include "preamble" %}
TASK: It is night in round {{ round }}. Choose the player the Werewolves will remove.
{% if round == 0 %}
- Nothing has happened yet, so any choice is as good as another.
{% else %}
- Remove whoever threatens you most: players close to the truth, or those who may be the Seer or Doctor.
{% endif %}

```json
{
  "reasoning": "string",  // Why this player.
  "remove": "string"  // One of: {{ options }}
}
```
"#;

const PROTECT: &str = r#"{% include "preamble" %}
TASK: It is night in round {{ round }}. As the Doctor, choose one player to protect tonight.
{% if round == 0 %}
- Nothing has happened yet, so any choice is as good as another.
{% else %}
- Think about whom the Werewolves want gone. The Seer and you are likely targets.
{% endif %}

```json
{
  "reasoning": "string",  // Why this player.
  "protect": "string"  // One of: {{ options }}
}
```
"#;

const SUMMARIZE: &str = r#"{% include "preamble" %}
{% include "debate_so_far" %}
TASK: Write private notes on this round as {{ name }} the {{ role }}.
{% if role == "Werewolf" %}
- Note who suspects you or your partner, who is easy to sway, and who might hold a special role.
{% else %}
- Note claims and whether they fit what you know, contradictions, quiet players, and likely allies.
{% endif %}

```json
{
  "reasoning": "string",  // What is worth remembering and why.
  "summary": "string"  // A few sentences in the first person about as many players as you can.
}
```
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use moderator::Role;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table() -> TableSettings {
        TableSettings {
            num_players: 6,
            max_debate_turns: 8,
        }
    }

    fn wolf() -> Agent {
        let mut agent = Agent::new("Scott", Role::Werewolf, "m");
        agent.set_partner(Some("Hayley".into()));
        agent.begin_round(
            1,
            ["Derek", "Hayley", "Isaac", "Scott", "Tyler"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        agent
    }

    #[test]
    fn test_context_marks_self_and_counts_turns() {
        let mut agent = wolf();
        agent.view_mut().unwrap().record_utterance("Scott", "I trust Derek.");
        agent.view_mut().unwrap().record_utterance("Derek", "Thanks Scott.");
        let mut rng = StdRng::seed_from_u64(5);
        let ctx = PromptContext::for_agent(&agent, table(), &mut rng).unwrap();

        assert!(ctx.remaining_players.contains("Scott (You)"));
        assert_eq!(ctx.debate[0], "Scott (You): I trust Derek.");
        assert_eq!(ctx.debate[1], "Derek: Thanks Scott.");
        assert_eq!(ctx.debate_turns_left, 6);
        assert_eq!(ctx.num_villagers, 2);
        assert!(ctx.werewolf_context.contains("Hayley"));
    }

    #[test]
    fn test_context_requires_view() {
        let agent = Agent::new("Derek", Role::Seer, "m");
        let mut rng = StdRng::seed_from_u64(5);
        assert!(PromptContext::for_agent(&agent, table(), &mut rng).is_err());
    }

    #[test]
    fn test_every_action_renders() {
        let library = PromptLibrary::new().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = PromptContext::for_agent(&wolf(), table(), &mut rng)
            .unwrap()
            .with_options(&["Derek".into(), "Isaac".into()]);

        for action in Action::ALL {
            let prompt = library.render(action, &ctx).unwrap();
            assert!(prompt.contains("You are Scott"), "{action} lost the preamble");
            assert!(
                prompt.contains(&format!("\"{}\"", action.result_key())),
                "{action} does not ask for {}",
                action.result_key()
            );
        }
        let vote = library.render(Action::Vote, &ctx).unwrap();
        assert!(vote.contains("One of: Derek, Isaac"));
        assert!(vote.contains("Nobody has spoken yet."));
    }

    #[test]
    fn test_observations_rendered_when_present() {
        let library = PromptLibrary::new().unwrap();
        let mut agent = wolf();
        agent.add_observation("During the night, we decided to eliminate Tyler.").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = PromptContext::for_agent(&agent, table(), &mut rng).unwrap();
        let prompt = library.render(Action::Summarize, &ctx).unwrap();
        assert!(prompt.contains("YOUR PRIVATE NOTES:"));
        assert!(prompt.contains("Round 1:\n   - During the night, we decided to eliminate Tyler."));
    }

    #[test]
    fn test_schemas_name_reasoning_and_decision() {
        let library = PromptLibrary::new().unwrap();
        for action in Action::ALL {
            let schema = library.schema(action);
            assert!(schema.get("$schema").is_none());
            let required = schema["required"].as_array().unwrap();
            assert!(required.iter().any(|v| v == "reasoning"));
            assert!(required.iter().any(|v| v == action.result_key()));
        }
    }
}
