//! Completion Orchestrator: validates input, calls the model, validates its
//! output and drives the bounded correction loop.
//!
//! One run walks `INPUT_CHECK -> GENERATE -> OUTPUT_CHECK`, then either
//! succeeds, loops back to `GENERATE` with a correction context, or fails once
//! `max_attempts` model calls have been rejected. Transport retries happen
//! inside a single `GENERATE` step and never consume correction attempts.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use schemata_core::config::AppConfig;
use schemata_core::domain::application::ApplicationId;
use schemata_core::domain::interaction::Sender;
use schemata_core::errors::{ApplicationError, DomainError};
use schemata_core::schema::{validate, Violation};
use schemata_db::repositories::{ApplicationRepository, InteractionLogRepository};

use crate::llm::{GatewayError, LlmClient};
use crate::prompt::{CorrectionContext, PromptRenderer};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_attempts: u32,
    pub transport_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_attempts: 3, transport_retries: 2, retry_backoff: Duration::from_millis(250) }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.completion.max_attempts.max(1),
            transport_retries: config.llm.max_retries,
            retry_backoff: Duration::from_millis(config.completion.retry_backoff_ms),
        }
    }

    fn backoff_for(&self, retry: u32, error: &GatewayError) -> Duration {
        error.retry_after().unwrap_or(self.retry_backoff * retry).min(MAX_BACKOFF)
    }
}

#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub application_id: ApplicationId,
    pub input: Value,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogStatus {
    Recorded,
    /// The output was returned but its `ai` log entry could not be written.
    Degraded { reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOutcome {
    pub output: Value,
    pub attempts: u32,
    pub log_status: LogStatus,
}

/// One model call and its verdict; lives only for the duration of a run.
#[derive(Clone, Debug)]
pub struct CompletionAttempt {
    pub index: u32,
    pub prompt: String,
    pub raw_output: String,
    pub parsed: Option<Value>,
    pub violations: Vec<Violation>,
}

impl CompletionAttempt {
    fn evaluate(index: u32, prompt: String, raw_output: String, output_schema: &Value) -> Self {
        let (parsed, violations) = match decode_output(&raw_output) {
            Ok(value) => {
                let violations = validate(&value, output_schema);
                (Some(value), violations)
            }
            Err(violation) => (None, vec![violation]),
        };
        Self { index, prompt, raw_output, parsed, violations }
    }

    pub fn is_conformant(&self) -> bool {
        self.parsed.is_some() && self.violations.is_empty()
    }

    fn failure_record(&self) -> Value {
        json!({"raw_output": self.raw_output, "violations": self.violations})
    }
}

pub struct CompletionOrchestrator {
    applications: Arc<dyn ApplicationRepository>,
    interactions: Arc<dyn InteractionLogRepository>,
    llm: Arc<dyn LlmClient>,
    renderer: PromptRenderer,
    settings: OrchestratorSettings,
}

impl CompletionOrchestrator {
    pub fn new(
        applications: Arc<dyn ApplicationRepository>,
        interactions: Arc<dyn InteractionLogRepository>,
        llm: Arc<dyn LlmClient>,
        settings: OrchestratorSettings,
    ) -> Result<Self, ApplicationError> {
        Ok(Self { applications, interactions, llm, renderer: PromptRenderer::new()?, settings })
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome, ApplicationError> {
        let CompletionRequest { application_id, input, correlation_id } = request;
        let application = self.applications.get(&application_id).await?;

        let input_violations = validate(&input, &application.definition.input_schema);
        if !input_violations.is_empty() {
            info!(
                event_name = "completion.input_rejected",
                correlation_id = %correlation_id,
                application_id = %application_id,
                violations = input_violations.len(),
                "input does not match the application's input schema"
            );
            return Err(DomainError::InputValidation(input_violations).into());
        }

        self.interactions.append(&application_id, Sender::User, input.clone()).await?;

        let mut correction: Option<CorrectionContext> = None;
        let mut last_attempt: Option<CompletionAttempt> = None;

        for index in 1..=self.settings.max_attempts {
            let prompt =
                self.renderer.render(&application.definition, &input, correction.as_ref())?;
            debug!(
                event_name = "completion.attempt_started",
                correlation_id = %correlation_id,
                application_id = %application_id,
                attempt = index,
                "calling language model"
            );

            let raw_output = match self.generate(&prompt, &correlation_id).await {
                Ok(raw_output) => raw_output,
                Err(error) => {
                    warn!(
                        event_name = "completion.gateway_failed",
                        correlation_id = %correlation_id,
                        application_id = %application_id,
                        attempt = index,
                        error = %error,
                        "language model call failed"
                    );
                    if let Some(attempt) = &last_attempt {
                        self.record_failure(&application_id, attempt, &correlation_id).await;
                    }
                    return Err(ApplicationError::Integration(format!(
                        "language model call failed: {error}"
                    )));
                }
            };

            let attempt = CompletionAttempt::evaluate(
                index,
                prompt,
                raw_output,
                &application.definition.output_schema,
            );

            if attempt.is_conformant() {
                let output = attempt.parsed.unwrap_or(Value::Null);
                let log_status = match self
                    .interactions
                    .append(&application_id, Sender::Ai, output.clone())
                    .await
                {
                    Ok(_) => LogStatus::Recorded,
                    Err(error) => {
                        warn!(
                            event_name = "completion.log_degraded",
                            correlation_id = %correlation_id,
                            application_id = %application_id,
                            error = %error,
                            "output returned without its interaction log entry"
                        );
                        LogStatus::Degraded { reason: error.to_string() }
                    }
                };
                info!(
                    event_name = "completion.succeeded",
                    correlation_id = %correlation_id,
                    application_id = %application_id,
                    attempts = index,
                    "completion conforms to output schema"
                );
                return Ok(CompletionOutcome { output, attempts: index, log_status });
            }

            info!(
                event_name = "completion.output_rejected",
                correlation_id = %correlation_id,
                application_id = %application_id,
                attempt = index,
                violations = attempt.violations.len(),
                "model output does not match the output schema"
            );
            correction =
                Some(CorrectionContext::new(attempt.violations.clone(), &attempt.raw_output));
            last_attempt = Some(attempt);
        }

        let Some(attempt) = last_attempt else {
            return Err(ApplicationError::Configuration(
                "completion.max_attempts must allow at least one attempt".to_string(),
            ));
        };

        self.record_failure(&application_id, &attempt, &correlation_id).await;
        warn!(
            event_name = "completion.exhausted",
            correlation_id = %correlation_id,
            application_id = %application_id,
            attempts = attempt.index,
            "correction budget exhausted"
        );
        Err(DomainError::OutputValidation {
            attempts: attempt.index,
            violations: attempt.violations,
            last_output: attempt.raw_output,
        }
        .into())
    }

    /// One GENERATE step: the same prompt is resent on retryable gateway
    /// failures, up to `transport_retries` extra calls.
    async fn generate(&self, prompt: &str, correlation_id: &str) -> Result<String, GatewayError> {
        let mut retry = 0;
        loop {
            match self.llm.complete(prompt).await {
                Ok(raw_output) => return Ok(raw_output),
                Err(error) if error.is_retryable() && retry < self.settings.transport_retries => {
                    retry += 1;
                    let delay = self.settings.backoff_for(retry, &error);
                    warn!(
                        event_name = "completion.transport_retry",
                        correlation_id = %correlation_id,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying language model call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn record_failure(
        &self,
        application_id: &ApplicationId,
        attempt: &CompletionAttempt,
        correlation_id: &str,
    ) {
        if let Err(error) =
            self.interactions.append(application_id, Sender::Ai, attempt.failure_record()).await
        {
            warn!(
                event_name = "completion.log_degraded",
                correlation_id = %correlation_id,
                application_id = %application_id,
                error = %error,
                "rejected output could not be logged"
            );
        }
    }
}

/// Parses a model reply, tolerating a surrounding Markdown code fence.
pub fn decode_output(raw_output: &str) -> Result<Value, Violation> {
    serde_json::from_str(strip_code_fence(raw_output))
        .map_err(|err| Violation::invalid_json(err.to_string()))
}

/// Returns the body of the first Markdown code fence in the reply, or the
/// trimmed reply when it has none. Prose around the fence is ignored.
pub fn strip_code_fence(raw_output: &str) -> &str {
    let trimmed = raw_output.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let rest = &trimmed[open + 3..];
    // drop the info string (`json`, `JSON`, ...) that directly follows the fence
    let body = match rest.find(char::is_whitespace) {
        Some(end) if rest[..end].chars().all(|c| c.is_ascii_alphanumeric()) => &rest[end..],
        _ => rest,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use schemata_core::schema::ViolationKind;

    use super::{decode_output, strip_code_fence, OrchestratorSettings};
    use crate::llm::GatewayError;

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```\n"), "[1, 2]");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```true```"), "true");
    }

    #[test]
    fn prose_around_a_fenced_reply_is_ignored() {
        assert_eq!(
            decode_output("```json\n{\"a\": 1}\n```\nHope this helps!"),
            Ok(json!({"a": 1}))
        );
        assert_eq!(
            decode_output("Here it is: ```json {\"sentiment\": \"positive\"}``` Enjoy."),
            Ok(json!({"sentiment": "positive"}))
        );
        assert_eq!(decode_output("Sure.\n\n```\n[1, 2]\n```"), Ok(json!([1, 2])));
    }

    #[test]
    fn unparseable_output_becomes_an_invalid_json_violation() {
        let violation = decode_output("Sure! Here is the JSON you asked for").expect_err("invalid");
        assert_eq!(violation.kind, ViolationKind::InvalidJson);
        assert_eq!(violation.path, "$");

        assert_eq!(decode_output("```json\n{\"ok\": true}\n```"), Ok(json!({"ok": true})));
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let settings = OrchestratorSettings {
            max_attempts: 3,
            transport_retries: 2,
            retry_backoff: Duration::from_millis(250),
        };
        let transport = GatewayError::Transport { message: "reset".to_string(), retryable: true };
        assert_eq!(settings.backoff_for(1, &transport), Duration::from_millis(250));
        assert_eq!(settings.backoff_for(2, &transport), Duration::from_millis(500));

        let limited = GatewayError::RateLimited {
            message: "busy".to_string(),
            retry_after: Some(Duration::from_secs(120)),
        };
        assert_eq!(settings.backoff_for(1, &limited), Duration::from_secs(30));
    }
}
