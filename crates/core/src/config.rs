use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().map(|key| !key.expose_secret().trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub confirmation: ConfirmationPolicy,
    pub max_tool_rounds: u32,
    pub trace: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// How many confirmations the composite forecast-then-plan directive takes:
/// one per specialist stage, or a single gate covering both stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    #[default]
    PerSpecialist,
    Single,
}

impl ConfirmationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerSpecialist => "per_specialist",
            Self::Single => "single",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub confirmation: Option<ConfirmationPolicy>,
    pub trace: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://stocky.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            agent: AgentConfig {
                confirmation: ConfirmationPolicy::PerSpecialist,
                max_tool_rounds: 8,
                trace: false,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ConfirmationPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per_specialist" | "per-specialist" => Ok(Self::PerSpecialist),
            "single" => Ok(Self::Single),
            other => Err(ConfigError::Validation(format!(
                "unsupported confirmation policy `{other}` (expected per_specialist|single)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("stocky.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(confirmation) = agent.confirmation {
                self.agent.confirmation = confirmation;
            }
            if let Some(max_tool_rounds) = agent.max_tool_rounds {
                self.agent.max_tool_rounds = max_tool_rounds;
            }
            if let Some(trace) = agent.trace {
                self.agent.trace = trace;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Hosted deployments expose the connection string as a bare
        // DATABASE_URL; its presence is what flips the backend family. The
        // prefixed variable still wins when both are set.
        if let Some(value) = read_env("DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("STOCKY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("STOCKY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("STOCKY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("STOCKY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("STOCKY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STOCKY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STOCKY_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("STOCKY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("STOCKY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("STOCKY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("STOCKY_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("STOCKY_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("STOCKY_AGENT_CONFIRMATION") {
            self.agent.confirmation = value.parse()?;
        }
        if let Some(value) = read_env("STOCKY_AGENT_MAX_TOOL_ROUNDS") {
            self.agent.max_tool_rounds = parse_u32("STOCKY_AGENT_MAX_TOOL_ROUNDS", &value)?;
        }
        if let Some(value) = read_env("STOCKY_AGENT_TRACE") {
            self.agent.trace = parse_bool("STOCKY_AGENT_TRACE", &value)?;
        }

        let log_level = read_env("STOCKY_LOGGING_LEVEL").or_else(|| read_env("STOCKY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STOCKY_LOGGING_FORMAT").or_else(|| read_env("STOCKY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(confirmation) = overrides.confirmation {
            self.agent.confirmation = confirmation;
        }
        if let Some(trace) = overrides.trace {
            self.agent.trace = trace;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("stocky.toml"), PathBuf::from("config/stocky.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` references so config files can point at ambient secrets
/// (`api_key = "${OPENAI_API_KEY}"`) instead of embedding them.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ConfigError::UnterminatedInterpolation);
        };
        let key = &after[..end];
        let value = env::var(key)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    let postgres_url = url.starts_with("postgres://") || url.starts_with("postgresql://");
    if !sqlite_url && !postgres_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, `:memory:`) or a postgres URL (`postgres://...`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    let base_url = llm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_tool_rounds == 0 || agent.max_tool_rounds > 32 {
        return Err(ConfigError::Validation(
            "agent.max_tool_rounds must be in range 1..=32".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    confirmation: Option<ConfirmationPolicy>,
    max_tool_rounds: Option<u32>,
    trace: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, ConfirmationPolicy, LoadOptions};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    const MANAGED_VARS: &[&str] = &[
        "DATABASE_URL",
        "STOCKY_DATABASE_URL",
        "STOCKY_DATABASE_MAX_CONNECTIONS",
        "STOCKY_DATABASE_TIMEOUT_SECS",
        "STOCKY_LLM_API_KEY",
        "STOCKY_LLM_BASE_URL",
        "STOCKY_LLM_MODEL",
        "STOCKY_LLM_TIMEOUT_SECS",
        "STOCKY_LLM_MAX_RETRIES",
        "STOCKY_AGENT_CONFIRMATION",
        "STOCKY_AGENT_MAX_TOOL_ROUNDS",
        "STOCKY_AGENT_TRACE",
        "STOCKY_LOGGING_LEVEL",
        "STOCKY_LOG_LEVEL",
        "STOCKY_LOGGING_FORMAT",
        "STOCKY_LOG_FORMAT",
        "TEST_OPENAI_KEY",
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], run: F) {
        let _guard = match env_lock().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        run();
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        with_env(&[], || {
            let config = AppConfig::load(LoadOptions::default()).expect("defaults validate");
            assert_eq!(config.database.url, "sqlite://stocky.db");
            assert_eq!(config.llm.model, "gpt-4o");
            assert_eq!(config.agent.confirmation, ConfirmationPolicy::PerSpecialist);
            assert!(!config.agent.trace);
            assert!(!config.llm.has_api_key());
        });
    }

    #[test]
    fn file_patch_overrides_defaults() {
        with_env(&[], || {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join("stocky.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite::memory:"

[agent]
confirmation = "single"
max_tool_rounds = 4
"#,
            )
            .expect("write config file");

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .expect("file patch loads");

            assert_eq!(config.database.url, "sqlite::memory:");
            assert_eq!(config.agent.confirmation, ConfirmationPolicy::Single);
            assert_eq!(config.agent.max_tool_rounds, 4);
            assert_eq!(config.llm.model, "gpt-4o");
        });
    }

    #[test]
    fn env_interpolation_resolves_secret_references() {
        with_env(&[("TEST_OPENAI_KEY", "sk-test-123")], || {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join("stocky.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_OPENAI_KEY}"
"#,
            )
            .expect("write config file");

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .expect("interpolated patch loads");

            let key = config.llm.api_key.expect("api key present");
            assert_eq!(key.expose_secret(), "sk-test-123");
        });
    }

    #[test]
    fn ambient_database_url_flips_the_backend() {
        with_env(&[("DATABASE_URL", "postgres://stocky:pw@localhost/stocky")], || {
            let config = AppConfig::load(LoadOptions::default()).expect("postgres url validates");
            assert!(config.database.url.starts_with("postgres://"));
        });
    }

    #[test]
    fn prefixed_database_url_beats_the_ambient_one() {
        with_env(
            &[
                ("DATABASE_URL", "postgres://stocky:pw@localhost/stocky"),
                ("STOCKY_DATABASE_URL", "sqlite::memory:"),
            ],
            || {
                let config = AppConfig::load(LoadOptions::default()).expect("load succeeds");
                assert_eq!(config.database.url, "sqlite::memory:");
            },
        );
    }

    #[test]
    fn cli_overrides_beat_env() {
        with_env(&[("STOCKY_AGENT_TRACE", "false")], || {
            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    trace: Some(true),
                    database_url: Some("sqlite::memory:".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .expect("overrides load");

            assert!(config.agent.trace);
            assert_eq!(config.database.url, "sqlite::memory:");
        });
    }

    #[test]
    fn malformed_env_values_are_rejected() {
        with_env(&[("STOCKY_DATABASE_MAX_CONNECTIONS", "plenty")], || {
            let error = AppConfig::load(LoadOptions::default()).unwrap_err();
            assert!(matches!(error, ConfigError::InvalidEnvOverride { .. }), "got {error:?}");
        });
    }

    #[test]
    fn unknown_database_scheme_fails_validation() {
        with_env(&[("STOCKY_DATABASE_URL", "mysql://localhost/stocky")], || {
            let error = AppConfig::load(LoadOptions::default()).unwrap_err();
            assert!(matches!(error, ConfigError::Validation(_)), "got {error:?}");
        });
    }

    #[test]
    fn unknown_confirmation_policy_is_rejected() {
        with_env(&[("STOCKY_AGENT_CONFIRMATION", "triple")], || {
            let error = AppConfig::load(LoadOptions::default()).unwrap_err();
            assert!(matches!(error, ConfigError::Validation(_)), "got {error:?}");
        });
    }
}
