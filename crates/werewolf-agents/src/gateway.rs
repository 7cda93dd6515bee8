//! Decision gateway: one structured decision from the generation backend.
//!
//! Each call renders the action's prompt, then tries the backend up to
//! [`RetryPolicy::attempts`] times. An attempt counts only if its text
//! parses, carries the action's result field and (for constrained
//! actions) names one of the allowed options. Each failure raises the
//! temperature by a fixed step, clamped to the ceiling. Exhaustion is not
//! an error: the caller gets `value: None` plus a record of every failed
//! attempt and decides what that means for the game.

use std::sync::{Arc, LazyLock};

use moderator::{DecisionRecord, FAILED_ATTEMPT_SEPARATOR};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::GenerationBackend;
use crate::prompts::{Action, PromptContext, PromptLibrary};

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("fenced block regex should compile")
});

/// Attempt budget and temperature schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub temperature_step: f64,
    pub temperature_ceiling: f64,
    pub constrained_temperature: f64,
    pub open_temperature: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            temperature_step: 0.2,
            temperature_ceiling: 1.0,
            constrained_temperature: 0.5,
            open_temperature: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn base_temperature(&self, action: Action) -> f64 {
        if action.is_constrained() {
            self.constrained_temperature
        } else {
            self.open_temperature
        }
    }

    fn next_temperature(&self, current: f64) -> f64 {
        (current + self.temperature_step).min(self.temperature_ceiling)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to render {action} prompt: {source}")]
    Render {
        action: Action,
        #[source]
        source: minijinja::Error,
    },
}

/// Outcome of one gateway call.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The projected result field, `None` once every attempt failed.
    pub value: Option<Value>,
    pub record: DecisionRecord,
}

impl Decision {
    /// The value as trimmed text; numbers and booleans are stringified.
    pub fn text(&self) -> Option<String> {
        self.value
            .as_ref()
            .map(|v| value_text(v).trim().to_string())
    }
}

/// Why one attempt was rejected.
#[derive(Debug, Error)]
enum Rejection {
    #[error("response is not structured data")]
    Unparsable,
    #[error("response has no `{0}` field")]
    MissingField(&'static str),
    #[error("`{0}` is not an allowed option")]
    NotAllowed(String),
}

pub struct DecisionGateway {
    backend: Arc<dyn GenerationBackend>,
    prompts: PromptLibrary,
    policy: RetryPolicy,
}

impl DecisionGateway {
    pub fn new(backend: Arc<dyn GenerationBackend>, prompts: PromptLibrary, policy: RetryPolicy) -> Self {
        Self {
            backend,
            prompts,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Ask `model` for one decision.
    ///
    /// Only a prompt that cannot be rendered is an error. Backend failures
    /// and rejected answers consume attempts; a non-retriable backend
    /// error ends the loop early.
    pub async fn decide(
        &self,
        action: Action,
        model: &str,
        context: &PromptContext,
        allowed: Option<&[String]>,
    ) -> Result<Decision, GatewayError> {
        let prompt = self
            .prompts
            .render(action, context)
            .map_err(|source| GatewayError::Render { action, source })?;
        let schema = self.prompts.schema(action);

        let mut temperature = self.policy.base_temperature(action);
        let mut failed = Vec::new();

        for attempt in 1..=self.policy.attempts {
            match self.backend.generate(model, &prompt, schema, temperature).await {
                Ok(raw) => match evaluate(&raw, action.result_key(), allowed) {
                    Ok((parsed, value)) => {
                        debug!(%action, agent = %context.name, attempt, "Decision accepted");
                        return Ok(Decision {
                            value: Some(value),
                            record: DecisionRecord {
                                prompt,
                                raw_response: raw,
                                result: Some(parsed),
                            },
                        });
                    }
                    Err(rejection) => {
                        warn!(%action, agent = %context.name, attempt, temperature, %rejection, "Rejected response");
                        failed.push(raw);
                    }
                },
                Err(err) => {
                    warn!(%action, agent = %context.name, attempt, temperature, error = %err, "Generation failed");
                    let retriable = err.is_retriable();
                    failed.push(err.to_string());
                    if !retriable {
                        break;
                    }
                }
            }
            temperature = self.policy.next_temperature(temperature);
        }

        warn!(%action, agent = %context.name, attempts = failed.len(), "Decision exhausted");
        Ok(Decision {
            value: None,
            record: DecisionRecord {
                prompt,
                raw_response: failed.join(FAILED_ATTEMPT_SEPARATOR),
                result: None,
            },
        })
    }
}

/// Parse, project and validate one raw answer.
fn evaluate(
    raw: &str,
    key: &'static str,
    allowed: Option<&[String]>,
) -> Result<(Value, Value), Rejection> {
    let parsed = parse_structured(raw).ok_or(Rejection::Unparsable)?;
    let value = parsed
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or(Rejection::MissingField(key))?;

    if let Some(options) = allowed {
        let text = value_text(&value);
        let candidate = text.trim();
        if !options.iter().any(|o| o.trim() == candidate) {
            return Err(Rejection::NotAllowed(text));
        }
    }
    Ok((parsed, value))
}

/// Fenced block first, then the whole text. YAML parsing also accepts
/// JSON and tolerates the usual model sloppiness (trailing prose aside).
pub(crate) fn parse_structured(raw: &str) -> Option<Value> {
    let fenced = FENCED_BLOCK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    fenced
        .into_iter()
        .chain(std::iter::once(raw))
        .filter_map(|text| serde_yaml::from_str::<Value>(text.trim()).ok())
        .find(Value::is_object)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MockGenerationBackend};
    use crate::prompts::TableSettings;
    use moderator::{Agent, Role};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    fn context() -> PromptContext {
        let mut agent = Agent::new("Derek", Role::Villager, "flash");
        agent.begin_round(0, vec!["Derek".into(), "Scott".into(), "Tyler".into()]);
        let table = TableSettings {
            num_players: 6,
            max_debate_turns: 8,
        };
        PromptContext::for_agent(&agent, table, &mut StdRng::seed_from_u64(3)).unwrap()
    }

    fn gateway(mock: MockGenerationBackend) -> DecisionGateway {
        DecisionGateway::new(
            Arc::new(mock),
            PromptLibrary::new().unwrap(),
            RetryPolicy::default(),
        )
    }

    fn options() -> Vec<String> {
        vec!["Scott".into(), "Tyler".into()]
    }

    #[test]
    fn test_parse_prefers_fenced_block() {
        let raw = "Sure, here you go:\n```json\n{\"reasoning\": \"x\", \"vote\": \"Scott\"}\n```\nGood luck!";
        assert_eq!(parse_structured(raw).unwrap()["vote"], "Scott");
    }

    #[test]
    fn test_parse_whole_text_and_yaml() {
        assert_eq!(parse_structured("{\"bid\": 3}").unwrap()["bid"], 3);
        assert_eq!(parse_structured("reasoning: calm\nsay: hello").unwrap()["say"], "hello");
        assert!(parse_structured("I refuse to answer.").is_none());
    }

    #[test]
    fn test_evaluate_checks_allowed_options() {
        let allowed = options();
        let (_, value) = evaluate("{\"vote\": \" Tyler \"}", "vote", Some(&allowed)).unwrap();
        assert_eq!(value, " Tyler ");
        assert!(matches!(
            evaluate("{\"vote\": \"Derek\"}", "vote", Some(&allowed)),
            Err(Rejection::NotAllowed(_))
        ));
        assert!(matches!(
            evaluate("{\"reasoning\": \"hm\"}", "vote", None),
            Err(Rejection::MissingField("vote"))
        ));
    }

    #[test]
    fn test_numeric_bid_matches_string_option() {
        let bids: Vec<String> = (0..=4).map(|b| b.to_string()).collect();
        let (_, value) = evaluate("{\"bid\": 2}", "bid", Some(&bids)).unwrap();
        assert_eq!(value_text(&value), "2");
    }

    #[test]
    fn test_temperature_clamps_at_ceiling() {
        let policy = RetryPolicy::default();
        let mut t = policy.base_temperature(Action::Vote);
        assert_eq!(t, 0.5);
        for _ in 0..5 {
            t = policy.next_temperature(t);
        }
        assert_eq!(t, 1.0);
        assert_eq!(policy.base_temperature(Action::Debate), 1.0);
    }

    #[tokio::test]
    async fn test_unparsable_output_exhausts_after_budget() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(3)
            .returning(|_, _, _, _| Ok("I am not sure what to do.".to_string()));

        let decision = gateway(mock)
            .decide(Action::Vote, "flash", &context(), Some(&options()))
            .await
            .unwrap();

        assert!(decision.value.is_none());
        assert!(!decision.record.succeeded());
        assert_eq!(
            decision.record.raw_response.matches(FAILED_ATTEMPT_SEPARATOR).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_temperature_rises_between_attempts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate().times(3).returning(move |_, _, _, t| {
            let mut temps = log.lock().unwrap();
            temps.push(t);
            if temps.len() < 3 {
                Ok("{\"vote\": \"Nobody\"}".to_string())
            } else {
                Ok("{\"reasoning\": \"quiet\", \"vote\": \"Tyler\"}".to_string())
            }
        });

        let decision = gateway(mock)
            .decide(Action::Vote, "flash", &context(), Some(&options()))
            .await
            .unwrap();

        assert_eq!(decision.text().as_deref(), Some("Tyler"));
        assert_eq!(decision.record.reasoning(), Some("quiet"));
        let temps = seen.lock().unwrap().clone();
        assert_eq!(temps.len(), 3);
        assert!((temps[0] - 0.5).abs() < 1e-9);
        assert!((temps[1] - 0.7).abs() < 1e-9);
        assert!((temps[2] - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_free_text_accepts_any_parsed_value() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(1)
            .returning(|_, _, _, _| Ok("```json\n{\"reasoning\": \"r\", \"say\": \"Tyler is lying.\"}\n```".into()));

        let decision = gateway(mock)
            .decide(Action::Debate, "flash", &context(), None)
            .await
            .unwrap();
        assert_eq!(decision.text().as_deref(), Some("Tyler is lying."));
        assert!(decision.record.prompt.contains("You are Derek"));
    }

    #[tokio::test]
    async fn test_backend_errors_are_retried_and_recorded() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate().times(2).returning(move |_, _, _, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err(BackendError::RateLimited("gemini".into()))
            } else {
                Ok("{\"reasoning\": \"r\", \"vote\": \"Scott\"}".into())
            }
        });

        let decision = gateway(mock)
            .decide(Action::Vote, "flash", &context(), Some(&options()))
            .await
            .unwrap();
        assert_eq!(decision.text().as_deref(), Some("Scott"));
    }

    #[tokio::test]
    async fn test_missing_key_stops_retrying() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(1)
            .returning(|_, _, _, _| Err(BackendError::MissingApiKey("openai".into())));

        let decision = gateway(mock)
            .decide(Action::Summarize, "gpt-4o", &context(), None)
            .await
            .unwrap();
        assert!(decision.value.is_none());
        assert!(decision.record.raw_response.contains("API key not configured"));
    }
}
