use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends one prompt and returns the model's raw text reply.
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport failure: {message}")]
    Transport { message: String, retryable: bool },
    #[error("rate limited by provider: {message}")]
    RateLimited { message: String, retry_after: Option<Duration> },
    #[error("provider returned status {status}: {message}")]
    Provider { status: u16, message: String, retryable: bool },
    #[error("provider rejected credentials: {message}")]
    Authentication { message: String },
    #[error("provider response could not be read: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } | Self::Provider { retryable, .. } => *retryable,
            Self::RateLimited { .. } | Self::InvalidResponse(_) => true,
            Self::Authentication { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Replays a fixed script of replies and records every prompt it receives.
/// Once the script runs out each call fails with a non-retryable transport error.
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, GatewayError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<String, GatewayError>>,
    {
        Self { script: Mutex::new(script.into_iter().collect()), prompts: Mutex::new(Vec::new()) }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|reply| Ok(reply.into())))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());

        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(GatewayError::Transport {
                    message: "scripted replies exhausted".to_string(),
                    retryable: false,
                })
            })
    }
}
