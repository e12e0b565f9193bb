use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use schemata_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Renders the effective configuration, one `key = value (source: ...)` line
/// per field. Secrets are never printed.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let fields: Vec<(&str, String, Vec<&str>)> = vec![
        (
            "database.backend",
            config.database.backend.as_str().to_string(),
            vec!["SCHEMATA_DATABASE_BACKEND"],
        ),
        ("database.url", config.database.url.clone(), vec!["SCHEMATA_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            vec!["SCHEMATA_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            vec!["SCHEMATA_DATABASE_TIMEOUT_SECS"],
        ),
        ("llm.provider", config.llm.provider.as_str().to_string(), vec!["SCHEMATA_LLM_PROVIDER"]),
        ("llm.model", config.llm.model.clone(), vec!["SCHEMATA_LLM_MODEL"]),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            vec!["SCHEMATA_LLM_BASE_URL"],
        ),
        ("llm.api_key", llm_api_key.to_string(), vec!["SCHEMATA_LLM_API_KEY"]),
        (
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            vec!["SCHEMATA_LLM_TIMEOUT_SECS"],
        ),
        ("llm.max_retries", config.llm.max_retries.to_string(), vec!["SCHEMATA_LLM_MAX_RETRIES"]),
        (
            "completion.max_attempts",
            config.completion.max_attempts.to_string(),
            vec!["SCHEMATA_COMPLETION_MAX_ATTEMPTS"],
        ),
        (
            "completion.retry_backoff_ms",
            config.completion.retry_backoff_ms.to_string(),
            vec!["SCHEMATA_COMPLETION_RETRY_BACKOFF_MS"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            vec!["SCHEMATA_SERVER_BIND_ADDRESS"],
        ),
        ("server.port", config.server.port.to_string(), vec!["SCHEMATA_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            vec!["SCHEMATA_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            vec!["SCHEMATA_LOGGING_LEVEL", "SCHEMATA_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            vec!["SCHEMATA_LOGGING_FORMAT", "SCHEMATA_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .iter()
            .map(|(key, value, env_keys)| render_line(key, value, source(key, env_keys))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("schemata.toml"), PathBuf::from("config/schemata.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
