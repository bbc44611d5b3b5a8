use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use stocky_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let doc = file_doc.as_ref();
    let path = file_path.as_deref();

    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        line("database.url", &config.database.url, &["STOCKY_DATABASE_URL", "DATABASE_URL"], doc, path),
        line(
            "database.max_connections",
            &config.database.max_connections.to_string(),
            &["STOCKY_DATABASE_MAX_CONNECTIONS"],
            doc,
            path,
        ),
        line(
            "database.timeout_secs",
            &config.database.timeout_secs.to_string(),
            &["STOCKY_DATABASE_TIMEOUT_SECS"],
            doc,
            path,
        ),
        line("llm.model", &config.llm.model, &["STOCKY_LLM_MODEL"], doc, path),
        line("llm.base_url", &config.llm.base_url, &["STOCKY_LLM_BASE_URL"], doc, path),
        line("llm.api_key", api_key, &["STOCKY_LLM_API_KEY"], doc, path),
        line(
            "llm.timeout_secs",
            &config.llm.timeout_secs.to_string(),
            &["STOCKY_LLM_TIMEOUT_SECS"],
            doc,
            path,
        ),
        line(
            "llm.max_retries",
            &config.llm.max_retries.to_string(),
            &["STOCKY_LLM_MAX_RETRIES"],
            doc,
            path,
        ),
        line(
            "agent.confirmation",
            config.agent.confirmation.as_str(),
            &["STOCKY_AGENT_CONFIRMATION"],
            doc,
            path,
        ),
        line(
            "agent.max_tool_rounds",
            &config.agent.max_tool_rounds.to_string(),
            &["STOCKY_AGENT_MAX_TOOL_ROUNDS"],
            doc,
            path,
        ),
        line("agent.trace", &config.agent.trace.to_string(), &["STOCKY_AGENT_TRACE"], doc, path),
        line(
            "logging.level",
            &config.logging.level,
            &["STOCKY_LOGGING_LEVEL", "STOCKY_LOG_LEVEL"],
            doc,
            path,
        ),
        line(
            "logging.format",
            &format!("{:?}", config.logging.format),
            &["STOCKY_LOGGING_FORMAT", "STOCKY_LOG_FORMAT"],
            doc,
            path,
        ),
    ];

    lines.join("\n")
}

fn line(
    key: &str,
    value: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let source = field_source(key, env_keys, config_file_doc, config_file_path);
    format!("- {key} = {value} (source: {source})")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("stocky.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/stocky.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

/// Env keys are listed highest-precedence first, matching the loader.
fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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
