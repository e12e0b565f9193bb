use serde_json::Value;
use tera::{Context, Tera};

use schemata_core::domain::application::ApplicationDefinition;
use schemata_core::errors::ApplicationError;
use schemata_core::schema::Violation;

const TEMPLATE_NAME: &str = "completion.txt";
const PREVIOUS_OUTPUT_LIMIT: usize = 2_000;

const COMPLETION_TEMPLATE: &str = r#"{{ objective }}

User message:
{{ input }}

The user message conforms to this JSON schema:
{{ input_schema }}

Respond in JSON format. The response must be a single JSON object matching this schema; do not add any preamble, explanation or Markdown:
{{ output_schema }}
{% if problems %}
Your previous response was rejected.

Previous response:
{{ previous_output }}

Problems found:
{% for problem in problems %}- {{ problem }}
{% endfor %}
Return a corrected JSON object that fixes every problem listed above.
{% endif %}"#;

/// What the next attempt needs to know about the rejected one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrectionContext {
    pub violations: Vec<Violation>,
    pub previous_output: String,
}

impl CorrectionContext {
    pub fn new(violations: Vec<Violation>, raw_output: &str) -> Self {
        Self { violations, previous_output: truncate(raw_output, PREVIOUS_OUTPUT_LIMIT) }
    }

    pub fn problems(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

pub struct PromptRenderer {
    tera: Tera,
}

impl PromptRenderer {
    pub fn new() -> Result<Self, ApplicationError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, COMPLETION_TEMPLATE).map_err(|err| {
            ApplicationError::Configuration(format!("completion template is invalid: {err}"))
        })?;
        Ok(Self { tera })
    }

    /// Renders the full prompt for one attempt. `{{input}}` and
    /// `{{corrections}}` in the application's own template are substituted
    /// literally; the application text is never interpreted as a template.
    pub fn render(
        &self,
        definition: &ApplicationDefinition,
        input: &Value,
        correction: Option<&CorrectionContext>,
    ) -> Result<String, ApplicationError> {
        let input_text = input.to_string();
        let problems = correction.map(CorrectionContext::problems).unwrap_or_default();

        let objective = definition
            .prompt_template
            .replace("{{ input }}", &input_text)
            .replace("{{input}}", &input_text)
            .replace("{{ corrections }}", &problems.join("\n"))
            .replace("{{corrections}}", &problems.join("\n"));

        let mut context = Context::new();
        context.insert("objective", &objective);
        context.insert("input", &input_text);
        context.insert("input_schema", &pretty(&definition.input_schema));
        context.insert("output_schema", &pretty(&definition.output_schema));
        context.insert("problems", &problems);
        context.insert(
            "previous_output",
            &correction.map(|previous| previous.previous_output.as_str()).unwrap_or_default(),
        );

        self.tera.render(TEMPLATE_NAME, &context).map_err(|err| {
            ApplicationError::Configuration(format!("prompt rendering failed: {err}"))
        })
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
