//! LLM-driven Werewolf agents.
//!
//! Built on the deterministic rules in the `moderator` crate:
//!
//! - [`backend`]: the generation capability and its HTTP providers
//! - [`prompts`]: action templates, response schemas and prompt context
//! - [`gateway`]: retrying, validating wrapper around one generation call
//! - [`player`]: per-agent decision operations
//! - [`game_master`]: the async round driver with bounded fan-out
//! - [`runner`]: run, resume and evaluation drivers
//! - [`config`]: TOML + environment configuration

pub mod backend;
pub mod config;
pub mod game_master;
pub mod gateway;
pub mod player;
pub mod prompts;
pub mod runner;

pub use backend::{BackendError, GenerationBackend, RoutedBackend};
pub use config::{GameConfig, ProviderConfig};
pub use game_master::{GameMaster, GameMasterError, GameSettings};
pub use gateway::{Decision, DecisionGateway, GatewayError, RetryPolicy};
pub use player::{DecisionOutcome, DecisionRequest};
pub use prompts::{Action, PromptContext, PromptError, PromptLibrary, TableSettings};
pub use runner::{EvalRecord, GameReport, ResumeReport, Runner};
