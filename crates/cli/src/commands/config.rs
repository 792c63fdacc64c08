use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leaveflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

pub fn run(options: LoadOptions) -> CommandResult {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries = [
        (
            "database.url",
            config.database.url.clone(),
            source("database.url", &["LEAVEFLOW_DATABASE_URL"]),
        ),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            source("database.max_connections", &["LEAVEFLOW_DATABASE_MAX_CONNECTIONS"]),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            source("database.timeout_secs", &["LEAVEFLOW_DATABASE_TIMEOUT_SECS"]),
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            source("server.bind_address", &["LEAVEFLOW_SERVER_BIND_ADDRESS"]),
        ),
        (
            "server.port",
            config.server.port.to_string(),
            source("server.port", &["LEAVEFLOW_SERVER_PORT"]),
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            source("server.graceful_shutdown_secs", &["LEAVEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"]),
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            source("logging.level", &["LEAVEFLOW_LOGGING_LEVEL", "LEAVEFLOW_LOG_LEVEL"]),
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            source("logging.format", &["LEAVEFLOW_LOGGING_FORMAT", "LEAVEFLOW_LOG_FORMAT"]),
        ),
        (
            "workflow.reminder_days",
            config.workflow.reminder_days.to_string(),
            source("workflow.reminder_days", &["LEAVEFLOW_WORKFLOW_REMINDER_DAYS"]),
        ),
        (
            "workflow.commit_retries",
            config.workflow.commit_retries.to_string(),
            source("workflow.commit_retries", &["LEAVEFLOW_WORKFLOW_COMMIT_RETRIES"]),
        ),
        (
            "workflow.allow_past_start",
            config.workflow.allow_past_start.to_string(),
            source("workflow.allow_past_start", &["LEAVEFLOW_WORKFLOW_ALLOW_PAST_START"]),
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.into_iter().map(|(key, value, source)| render_line(key, &value, source)));

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn detect_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then_some(path);
    }

    let root = PathBuf::from("leaveflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/leaveflow.toml");
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
