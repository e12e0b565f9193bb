use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::application::ApplicationId;
use crate::schema::Violation;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid application definition: {}", .0.join("; "))]
    InvalidDefinition(Vec<String>),
    #[error("input failed schema validation with {} violation(s)", .0.len())]
    InputValidation(Vec<Violation>),
    #[error("model output failed schema validation after {attempts} attempt(s)")]
    OutputValidation { attempts: u32, violations: Vec<Violation>, last_output: String },
    #[error("application `{0}` not found")]
    ApplicationNotFound(ApplicationId),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unprocessable request ({kind}): {message}")]
    Unprocessable { kind: &'static str, message: String, detail: Value, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unprocessable { .. } => {
                "The request could not be processed. Check the reported problems and try again."
            }
            Self::NotFound { .. } => "Application not found",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unprocessable { .. } => 422,
            Self::NotFound { .. } => 404,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unprocessable { kind, .. } => kind,
            Self::NotFound { .. } => "not_found",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unprocessable { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Structured detail for the response body; violation lists and definition
    /// problems for 422s, `null` otherwise.
    pub fn detail(&self) -> Value {
        match self {
            Self::Unprocessable { detail, .. } => detail.clone(),
            _ => Value::Null,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvalidDefinition(problems)) => {
                Self::Unprocessable {
                    kind: "invalid_application",
                    message: "application definition is invalid".to_owned(),
                    detail: json!(problems),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::Domain(DomainError::InputValidation(violations)) => {
                Self::Unprocessable {
                    kind: "input_validation",
                    message: "input does not match the application's input schema".to_owned(),
                    detail: json!(violations),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::Domain(DomainError::OutputValidation {
                attempts,
                violations,
                last_output,
            }) => Self::Unprocessable {
                kind: "output_validation",
                message: format!(
                    "model output did not match the output schema after {attempts} attempt(s)"
                ),
                detail: json!({
                    "attempts": attempts,
                    "violations": violations,
                    "last_output": last_output,
                }),
                correlation_id: unassigned(),
            },
            ApplicationError::Domain(DomainError::ApplicationNotFound(id)) => Self::NotFound {
                message: format!("application `{id}` not found"),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}
