use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use leaveflow_cli::commands::{config, doctor, migrate, reminders, seed};
use leaveflow_core::config::LoadOptions;
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("LEAVEFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied 2 pending migration(s)");
    });
}

#[test]
fn migrate_rejects_non_sqlite_database_url() {
    with_env(&[("LEAVEFLOW_DATABASE_URL", "postgres://localhost/leaveflow")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_twice_reports_schema_up_to_date() {
    let database = TempDatabase::new("migrate");
    with_env(&[("LEAVEFLOW_DATABASE_URL", database.url.as_str())], || {
        assert_eq!(migrate::run(LoadOptions::default()).exit_code, 0);

        let second = migrate::run(LoadOptions::default());
        let payload = parse_payload(&second.output);
        assert_eq!(second.exit_code, 0);
        assert_eq!(payload["message"], "schema already up to date");
    });
}

#[test]
fn seed_reports_loaded_directory_counts() {
    with_env(&[("LEAVEFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        assert_eq!(
            payload["message"],
            "demo directory loaded: 2 department(s), 6 employee(s), 3 leave type(s)"
        );
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let database = TempDatabase::new("seed");
    with_env(&[("LEAVEFLOW_DATABASE_URL", database.url.as_str())], || {
        let first = seed::run(LoadOptions::default());
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);

        let second = seed::run(LoadOptions::default());
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn reminders_succeed_when_nothing_is_approved() {
    let database = TempDatabase::new("reminders");
    with_env(&[("LEAVEFLOW_DATABASE_URL", database.url.as_str())], || {
        assert_eq!(seed::run(LoadOptions::default()).exit_code, 0);

        let result = reminders::run(LoadOptions::default(), Some(5));
        assert_eq!(result.exit_code, 0, "expected reminder run success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "reminders");
        assert_eq!(payload["message"], "no approved leave starts within 5 day(s)");
    });
}

#[test]
fn reminders_default_to_configured_window() {
    with_env(
        &[
            ("LEAVEFLOW_DATABASE_URL", "sqlite::memory:"),
            ("LEAVEFLOW_WORKFLOW_REMINDER_DAYS", "4"),
        ],
        || {
            let result = reminders::run(LoadOptions::default(), None);
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["message"], "no approved leave starts within 4 day(s)");
        },
    );
}

#[test]
fn reminders_return_config_failure_for_bad_window() {
    with_env(&[("LEAVEFLOW_WORKFLOW_REMINDER_DAYS", "soon")], || {
        let result = reminders::run(LoadOptions::default(), None);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_after_migration() {
    let database = TempDatabase::new("doctor");
    with_env(&[("LEAVEFLOW_DATABASE_URL", database.url.as_str())], || {
        assert_eq!(migrate::run(LoadOptions::default()).exit_code, 0);

        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        let names: Vec<&str> = report["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(
            names,
            [
                "config_validation",
                "database_connectivity",
                "migration_status",
                "leave_types_configured"
            ]
        );
    });
}

#[test]
fn doctor_flags_pending_migrations() {
    let database = TempDatabase::new("doctor-pending");
    with_env(&[("LEAVEFLOW_DATABASE_URL", database.url.as_str())], || {
        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][2]["status"], "fail");
        assert_eq!(report["checks"][3]["status"], "skipped");
    });
}

#[test]
fn config_attributes_env_sources() {
    with_env(
        &[
            ("LEAVEFLOW_DATABASE_URL", "sqlite::memory:"),
            ("LEAVEFLOW_LOG_LEVEL", "debug"),
        ],
        || {
            let result = config::run(LoadOptions::default());
            assert_eq!(result.exit_code, 0);
            assert!(result.output.contains(
                "- database.url = sqlite::memory: (source: env (LEAVEFLOW_DATABASE_URL))"
            ));
            assert!(result
                .output
                .contains("- logging.level = debug (source: env (LEAVEFLOW_LOG_LEVEL))"));
            assert!(result.output.contains("- workflow.reminder_days = 2 (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

struct TempDatabase {
    path: PathBuf,
    url: String,
}

impl TempDatabase {
    fn new(label: &str) -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock").as_nanos();
        let path = env::temp_dir().join(format!(
            "leaveflow-cli-{label}-{}-{nanos}-{}.db",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let url = format!("sqlite://{}", path.display());
        Self { path, url }
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "LEAVEFLOW_DATABASE_URL",
        "LEAVEFLOW_DATABASE_MAX_CONNECTIONS",
        "LEAVEFLOW_DATABASE_TIMEOUT_SECS",
        "LEAVEFLOW_SERVER_BIND_ADDRESS",
        "LEAVEFLOW_SERVER_PORT",
        "LEAVEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEAVEFLOW_LOGGING_LEVEL",
        "LEAVEFLOW_LOGGING_FORMAT",
        "LEAVEFLOW_LOG_LEVEL",
        "LEAVEFLOW_LOG_FORMAT",
        "LEAVEFLOW_WORKFLOW_REMINDER_DAYS",
        "LEAVEFLOW_WORKFLOW_COMMIT_RETRIES",
        "LEAVEFLOW_WORKFLOW_ALLOW_PAST_START",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    // A private in-memory database exists per connection; keep the pool to one.
    env::set_var("LEAVEFLOW_DATABASE_MAX_CONNECTIONS", "1");
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
