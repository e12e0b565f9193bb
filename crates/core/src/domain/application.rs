use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::DomainError;
use crate::schema::definition::{check_input_schema, check_output_schema};
use crate::schema::json_type_name;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The immutable triple an application is registered with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDefinition {
    pub prompt_template: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub definition: ApplicationDefinition,
    pub created_at: DateTime<Utc>,
}

impl ApplicationDefinition {
    /// Builds a definition from a creation request body
    /// (`{prompt_config, input_schema, output_schema}`), reporting every
    /// problem found rather than the first one.
    pub fn from_request(body: &Value) -> Result<Self, DomainError> {
        let Some(fields) = body.as_object() else {
            return Err(DomainError::InvalidDefinition(vec![format!(
                "request body must be a JSON object, found {}",
                json_type_name(body)
            )]));
        };

        let mut problems = Vec::new();

        let prompt_template = match fields.get("prompt_config") {
            Some(Value::String(raw)) if raw.trim().is_empty() => {
                problems.push("prompt_config cannot be empty or just whitespace".to_string());
                None
            }
            Some(Value::String(raw)) => Some(raw.trim().to_string()),
            Some(other) => {
                problems.push(format!(
                    "prompt_config must be a string, found {}",
                    json_type_name(other)
                ));
                None
            }
            None => {
                problems.push(missing_field("prompt_config"));
                None
            }
        };

        let input_schema = match fields.get("input_schema") {
            Some(schema) => {
                problems.extend(check_input_schema(schema));
                Some(schema.clone())
            }
            None => {
                problems.push(missing_field("input_schema"));
                None
            }
        };

        let output_schema = match fields.get("output_schema") {
            Some(schema) => {
                problems.extend(check_output_schema(schema));
                Some(schema.clone())
            }
            None => {
                problems.push(missing_field("output_schema"));
                None
            }
        };

        match (prompt_template, input_schema, output_schema) {
            (Some(prompt_template), Some(input_schema), Some(output_schema))
                if problems.is_empty() =>
            {
                Ok(Self { prompt_template, input_schema, output_schema })
            }
            _ => Err(DomainError::InvalidDefinition(problems)),
        }
    }
}

impl Application {
    pub fn new(definition: ApplicationDefinition) -> Self {
        Self { id: ApplicationId::generate(), definition, created_at: Utc::now() }
    }
}

fn missing_field(name: &str) -> String {
    format!("missing required field: '{name}'")
}
