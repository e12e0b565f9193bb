use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use schemata_agent::{
    CompletionOrchestrator, CompletionOutcome, CompletionRequest, GatewayError, LlmClient,
    LogStatus, OrchestratorSettings, ScriptedLlmClient,
};
use schemata_core::domain::application::{Application, ApplicationDefinition, ApplicationId};
use schemata_core::domain::interaction::{InteractionEntry, Sender};
use schemata_core::errors::{ApplicationError, DomainError};
use schemata_core::schema::ViolationKind;
use schemata_db::repositories::{
    ApplicationRepository, InMemoryApplicationStore, InteractionLogRepository, RepositoryError,
};

fn sentiment_definition() -> ApplicationDefinition {
    ApplicationDefinition {
        prompt_template: "You are an advanced sentiment analysis tool. Classify the review."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {"review_text": {"type": "string"}},
            "required": ["review_text"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {
                "sentiment": {"type": "string", "enum": ["positive", "neutral", "negative"]},
                "confidence": {"type": "number"}
            },
            "required": ["sentiment", "confidence"]
        }),
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_attempts: 3,
        transport_retries: 2,
        retry_backoff: Duration::from_millis(1),
    }
}

struct Harness {
    store: Arc<InMemoryApplicationStore>,
    llm: Arc<ScriptedLlmClient>,
    orchestrator: CompletionOrchestrator,
    application: Application,
}

impl Harness {
    async fn new(llm: ScriptedLlmClient) -> Self {
        let store = Arc::new(InMemoryApplicationStore::default());
        let llm = Arc::new(llm);
        let application = store.create(sentiment_definition()).await.expect("create application");
        let orchestrator =
            CompletionOrchestrator::new(store.clone(), store.clone(), llm.clone(), settings())
                .expect("orchestrator");
        Self { store, llm, orchestrator, application }
    }

    async fn run(&self, input: Value) -> Result<CompletionOutcome, ApplicationError> {
        self.orchestrator
            .complete(CompletionRequest {
                application_id: self.application.id.clone(),
                input,
                correlation_id: "test-correlation".to_string(),
            })
            .await
    }

    async fn log(&self) -> Vec<InteractionEntry> {
        self.store.list(&self.application.id).await.expect("list log")
    }
}

#[tokio::test]
async fn conformant_first_reply_succeeds_with_two_log_entries() {
    let harness = Harness::new(ScriptedLlmClient::with_replies([
        r#"{"sentiment": "positive", "confidence": 0.97}"#,
    ]))
    .await;

    let outcome = harness.run(json!({"review_text": "Absolutely love it"})).await.expect("success");

    assert_eq!(outcome.output, json!({"sentiment": "positive", "confidence": 0.97}));
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.log_status, LogStatus::Recorded);
    assert_eq!(harness.llm.calls(), 1);

    let log = harness.log().await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].sender, Sender::User);
    assert_eq!(log[0].message, json!({"review_text": "Absolutely love it"}));
    assert_eq!(log[1].sender, Sender::Ai);
    assert_eq!(log[1].message, outcome.output);
}

#[tokio::test]
async fn rejected_reply_is_corrected_on_the_next_attempt() {
    let harness = Harness::new(ScriptedLlmClient::with_replies([
        r#"{"sentiment": "great"}"#,
        "```json\n{\"sentiment\": \"positive\", \"confidence\": 0.8}\n```",
    ]))
    .await;

    let outcome = harness.run(json!({"review_text": "Nice"})).await.expect("converges");

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.output, json!({"sentiment": "positive", "confidence": 0.8}));

    let prompts = harness.llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Problems found"));
    assert!(prompts[1].contains("Your previous response was rejected."));
    assert!(prompts[1].contains(r#"{"sentiment": "great"}"#));
    assert!(prompts[1].contains("$.confidence: missing required field"));
    assert!(prompts[1].contains("$.sentiment: expected one of"));

    let log = harness.log().await;
    assert_eq!(log.len(), 2, "exactly one user and one ai entry");
    assert_eq!(log[1].message, outcome.output);
}

#[tokio::test]
async fn exhausted_budget_reports_final_violations() {
    let harness = Harness::new(ScriptedLlmClient::with_replies([
        "I think it is positive",
        r#"{"sentiment": "positive"}"#,
        r#"{"sentiment": "positive", "confidence": "high"}"#,
    ]))
    .await;

    let error = harness.run(json!({"review_text": "Fine"})).await.expect_err("exhausted");
    match error {
        ApplicationError::Domain(DomainError::OutputValidation {
            attempts,
            violations,
            last_output,
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_output, r#"{"sentiment": "positive", "confidence": "high"}"#);
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].path, "$.confidence");
            assert_eq!(violations[0].kind, ViolationKind::TypeMismatch);
        }
        other => panic!("expected output validation failure, got {other:?}"),
    }
    assert_eq!(harness.llm.calls(), 3);

    let log = harness.log().await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].sender, Sender::Ai);
    assert_eq!(log[1].message["raw_output"], r#"{"sentiment": "positive", "confidence": "high"}"#);
    assert_eq!(log[1].message["violations"][0]["kind"], "type_mismatch");
}

#[tokio::test]
async fn invalid_input_never_reaches_the_model() {
    let harness = Harness::new(ScriptedLlmClient::with_replies(["{}"])).await;

    let error = harness.run(json!({})).await.expect_err("input rejected");
    match error {
        ApplicationError::Domain(DomainError::InputValidation(violations)) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].path, "$.review_text");
            assert_eq!(violations[0].kind, ViolationKind::MissingField);
        }
        other => panic!("expected input validation failure, got {other:?}"),
    }
    assert_eq!(harness.llm.calls(), 0);
    assert!(harness.log().await.is_empty());
}

#[tokio::test]
async fn unknown_application_is_not_found() {
    let harness = Harness::new(ScriptedLlmClient::default()).await;
    let missing = ApplicationId("does-not-exist".to_string());

    let error = harness
        .orchestrator
        .complete(CompletionRequest {
            application_id: missing.clone(),
            input: json!({"review_text": "x"}),
            correlation_id: "c".to_string(),
        })
        .await
        .expect_err("not found");

    assert_eq!(error, ApplicationError::Domain(DomainError::ApplicationNotFound(missing)));
    assert_eq!(harness.llm.calls(), 0);
}

#[tokio::test]
async fn transport_failures_are_retried_with_the_same_prompt() {
    let harness = Harness::new(ScriptedLlmClient::new([
        Err(GatewayError::Transport { message: "connection reset".to_string(), retryable: true }),
        Err(GatewayError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_millis(1)),
        }),
        Ok(r#"{"sentiment": "neutral", "confidence": 0.5}"#.to_string()),
    ]))
    .await;

    let outcome = harness.run(json!({"review_text": "It arrived"})).await.expect("recovers");

    assert_eq!(outcome.attempts, 1, "transport retries do not consume attempts");
    let prompts = harness.llm.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts.iter().all(|prompt| prompt == &prompts[0]));
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let harness = Harness::new(ScriptedLlmClient::new([Err(GatewayError::Authentication {
        message: "invalid api key".to_string(),
    })]))
    .await;

    let error = harness.run(json!({"review_text": "x"})).await.expect_err("fatal");

    assert!(matches!(
        error,
        ApplicationError::Integration(ref message) if message.contains("invalid api key")
    ));
    assert_eq!(harness.llm.calls(), 1);
    let log = harness.log().await;
    assert_eq!(log.len(), 1, "only the user entry is recorded");
}

#[tokio::test]
async fn fatal_gateway_error_after_a_reply_logs_that_reply() {
    let harness = Harness::new(ScriptedLlmClient::new([
        Ok("not json at all".to_string()),
        Err(GatewayError::Provider {
            status: 400,
            message: "context length exceeded".to_string(),
            retryable: false,
        }),
    ]))
    .await;

    let error = harness.run(json!({"review_text": "x"})).await.expect_err("fatal");
    assert!(matches!(error, ApplicationError::Integration(_)));

    let log = harness.log().await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].message["raw_output"], "not json at all");
    assert_eq!(log[1].message["violations"][0]["kind"], "invalid_json");
}

#[tokio::test]
async fn exhausted_transport_retries_become_integration_failure() {
    let transient = || {
        Err(GatewayError::Provider {
            status: 503,
            message: "overloaded".to_string(),
            retryable: true,
        })
    };
    let harness =
        Harness::new(ScriptedLlmClient::new([transient(), transient(), transient()])).await;

    let error = harness.run(json!({"review_text": "x"})).await.expect_err("gives up");

    assert!(matches!(error, ApplicationError::Integration(_)));
    assert_eq!(harness.llm.calls(), 3, "one call plus two retries");
}

/// Delegates to an in-memory store but refuses `ai` entries.
struct AiLogOutage {
    inner: Arc<InMemoryApplicationStore>,
}

#[async_trait]
impl InteractionLogRepository for AiLogOutage {
    async fn append(
        &self,
        application_id: &ApplicationId,
        sender: Sender,
        message: Value,
    ) -> Result<InteractionEntry, RepositoryError> {
        match sender {
            Sender::Ai => Err(RepositoryError::Decode("log volume is read-only".to_string())),
            Sender::User => self.inner.append(application_id, sender, message).await,
        }
    }

    async fn list(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<InteractionEntry>, RepositoryError> {
        self.inner.list(application_id).await
    }
}

#[tokio::test]
async fn log_failure_after_success_is_a_degraded_success() {
    let store = Arc::new(InMemoryApplicationStore::default());
    let application = store.create(sentiment_definition()).await.expect("create");
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::with_replies([
        r#"{"sentiment": "negative", "confidence": 0.9}"#,
    ]));
    let orchestrator = CompletionOrchestrator::new(
        store.clone(),
        Arc::new(AiLogOutage { inner: store.clone() }),
        llm,
        settings(),
    )
    .expect("orchestrator");

    let outcome = orchestrator
        .complete(CompletionRequest {
            application_id: application.id.clone(),
            input: json!({"review_text": "Broke after a day"}),
            correlation_id: "c".to_string(),
        })
        .await
        .expect("output still returned");

    assert_eq!(outcome.output["sentiment"], "negative");
    assert!(matches!(
        outcome.log_status,
        LogStatus::Degraded { ref reason } if reason.contains("read-only")
    ));
    assert_eq!(store.list(&application.id).await.expect("list").len(), 1);
}

/// Answers after a delay, echoing the `review-<n>` index of the input back as
/// `confidence: n.5`, and records how many calls overlapped.
#[derive(Default)]
struct SlowGateway {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl LlmClient for SlowGateway {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let index: String = prompt
            .split("review-")
            .nth(1)
            .map(|rest| rest.chars().take_while(char::is_ascii_digit).collect())
            .unwrap_or_default();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!(r#"{{"sentiment": "positive", "confidence": {index}.5}}"#))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_keep_each_user_entry_before_its_reply() {
    const REQUESTS: usize = 8;

    let store = Arc::new(InMemoryApplicationStore::default());
    let application = store.create(sentiment_definition()).await.expect("create");
    let gateway = Arc::new(SlowGateway::default());
    let orchestrator = Arc::new(
        CompletionOrchestrator::new(store.clone(), store.clone(), gateway.clone(), settings())
            .expect("orchestrator"),
    );

    let handles: Vec<_> = (0..REQUESTS)
        .map(|index| {
            let orchestrator = orchestrator.clone();
            let application_id = application.id.clone();
            tokio::spawn(async move {
                orchestrator
                    .complete(CompletionRequest {
                        application_id,
                        input: json!({"review_text": format!("review-{index}")}),
                        correlation_id: format!("concurrent-{index}"),
                    })
                    .await
            })
        })
        .collect();
    for (index, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await.expect("task joins").expect("completion succeeds");
        assert_eq!(outcome.output["confidence"], json!(index as f64 + 0.5));
    }

    assert!(gateway.max_in_flight.load(Ordering::SeqCst) > 1, "gateway calls overlap");

    let log = store.list(&application.id).await.expect("list");
    assert_eq!(log.len(), REQUESTS * 2);
    for index in 0..REQUESTS {
        let user = log
            .iter()
            .position(|entry| {
                entry.sender == Sender::User
                    && entry.message["review_text"] == format!("review-{index}")
            })
            .expect("user entry recorded");
        let ai = log
            .iter()
            .position(|entry| {
                entry.sender == Sender::Ai
                    && entry.message["confidence"] == json!(index as f64 + 0.5)
            })
            .expect("ai entry recorded");
        assert!(user < ai, "request {index}: user entry at {user} must precede ai entry at {ai}");
    }
}

/// Never answers.
#[derive(Default)]
struct StalledGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for StalledGateway {
    async fn complete(&self, _prompt: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Err(GatewayError::Transport { message: "unreachable".to_string(), retryable: false })
    }
}

#[tokio::test]
async fn dropped_completion_leaves_only_the_user_entry() {
    let store = Arc::new(InMemoryApplicationStore::default());
    let application = store.create(sentiment_definition()).await.expect("create");
    let gateway = Arc::new(StalledGateway::default());
    let orchestrator =
        CompletionOrchestrator::new(store.clone(), store.clone(), gateway.clone(), settings())
            .expect("orchestrator");

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        orchestrator.complete(CompletionRequest {
            application_id: application.id.clone(),
            input: json!({"review_text": "Left hanging"}),
            correlation_id: "dropped".to_string(),
        }),
    )
    .await;

    assert!(outcome.is_err(), "the completion future is dropped before the gateway answers");
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

    let log = store.list(&application.id).await.expect("list");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].sender, Sender::User);
    assert_eq!(log[0].message, json!({"review_text": "Left hanging"}));
}
