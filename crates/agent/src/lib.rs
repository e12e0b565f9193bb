//! Language-model side of schemata.
//!
//! - `llm` - the narrow `LlmClient` gateway trait, its error taxonomy and a
//!   scripted client for tests and offline runs
//! - `providers` - OpenAI-compatible (OpenAI, Ollama) and Anthropic clients
//! - `prompt` - renders the prompt for each attempt, including corrections
//! - `orchestrator` - the validate / generate / correct loop behind every
//!   completion request
//!
//! The model never decides whether its own output is acceptable: every reply
//! is checked against the application's output schema before it is returned.

pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod providers;

pub use llm::{GatewayError, LlmClient, ScriptedLlmClient};
pub use orchestrator::{
    CompletionOrchestrator, CompletionOutcome, CompletionRequest, LogStatus, OrchestratorSettings,
};
pub use providers::build_client;
