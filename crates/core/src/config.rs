use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// How many days ahead upcoming-leave reminders look.
    pub reminder_days: u32,
    /// Reload-and-retry budget when a quota row changes under a write.
    pub commit_retries: u32,
    pub allow_past_start: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { reminder_days: 2, commit_retries: 3, allow_past_start: false }
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
    pub server_port: Option<u16>,
    pub reminder_days: Option<u32>,
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
                url: "sqlite://leaveflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            workflow: WorkflowConfig::default(),
        }
    }
}

impl FromStr for LogFormat {
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("leaveflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// File values replace defaults field by field.
    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
        }
        if let Some(server) = patch.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.port, server.port);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }
        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
        if let Some(workflow) = patch.workflow {
            set(&mut self.workflow.reminder_days, workflow.reminder_days);
            set(&mut self.workflow.commit_retries, workflow.commit_retries);
            set(&mut self.workflow.allow_past_start, workflow.allow_past_start);
        }
    }

    /// `LEAVEFLOW_<SECTION>_<FIELD>` variables; blank values are ignored.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        set(&mut self.database.url, env_value(&["LEAVEFLOW_DATABASE_URL"])?);
        set(
            &mut self.database.max_connections,
            env_value(&["LEAVEFLOW_DATABASE_MAX_CONNECTIONS"])?,
        );
        set(&mut self.database.timeout_secs, env_value(&["LEAVEFLOW_DATABASE_TIMEOUT_SECS"])?);

        set(&mut self.server.bind_address, env_value(&["LEAVEFLOW_SERVER_BIND_ADDRESS"])?);
        set(&mut self.server.port, env_value(&["LEAVEFLOW_SERVER_PORT"])?);
        set(
            &mut self.server.graceful_shutdown_secs,
            env_value(&["LEAVEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"])?,
        );

        set(
            &mut self.logging.level,
            env_value(&["LEAVEFLOW_LOGGING_LEVEL", "LEAVEFLOW_LOG_LEVEL"])?,
        );
        set(
            &mut self.logging.format,
            env_value(&["LEAVEFLOW_LOGGING_FORMAT", "LEAVEFLOW_LOG_FORMAT"])?,
        );

        set(&mut self.workflow.reminder_days, env_value(&["LEAVEFLOW_WORKFLOW_REMINDER_DAYS"])?);
        set(
            &mut self.workflow.commit_retries,
            env_value(&["LEAVEFLOW_WORKFLOW_COMMIT_RETRIES"])?,
        );
        set(
            &mut self.workflow.allow_past_start,
            env_value(&["LEAVEFLOW_WORKFLOW_ALLOW_PAST_START"])?,
        );
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.server.port, overrides.server_port);
        set(&mut self.workflow.reminder_days, overrides.reminder_days);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_workflow(&self.workflow)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leaveflow.toml"), PathBuf::from("config/leaveflow.toml")]
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

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.reminder_days > 365 {
        return Err(ConfigError::Validation(
            "workflow.reminder_days must be in range 0..=365".to_string(),
        ));
    }

    if workflow.commit_retries > 20 {
        return Err(ConfigError::Validation(
            "workflow.commit_retries must be in range 0..=20".to_string(),
        ));
    }

    Ok(())
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// First non-blank variable among `keys` (aliases in priority order), parsed as `T`.
fn env_value<T: FromStr>(keys: &[&str]) -> Result<Option<T>, ConfigError> {
    let Some((key, raw)) = keys.iter().find_map(|key| {
        env::var(key).ok().filter(|value| !value.trim().is_empty()).map(|value| (*key, value))
    }) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    workflow: Option<WorkflowPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    reminder_days: Option<u32>,
    commit_retries: Option<u32>,
    allow_past_start: Option<bool>,
}
