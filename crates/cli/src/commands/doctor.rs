use leaveflow_core::config::{AppConfig, LoadOptions};
use leaveflow_core::workflow::Directory;
use leaveflow_db::{connect_with_config, migrations, SqlLeaveStore};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] =
    ["database_connectivity", "migration_status", "leave_types_configured"];

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(
                DATABASE_CHECKS
                    .into_iter()
                    .map(|name| DoctorCheck::skipped(name, "configuration did not load")),
            );
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("migration_status", "no runtime was available"),
                DoctorCheck::skipped("leave_types_configured", "no runtime was available"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("migration_status", "the database was unreachable"),
                    DoctorCheck::skipped("leave_types_configured", "the database was unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        )];

        let known = migrations::known_versions();
        let migrated = match migrations::applied_versions(&pool).await {
            Ok(applied) if applied == known => {
                checks.push(DoctorCheck::pass(
                    "migration_status",
                    format!("all {} migration(s) applied", known.len()),
                ));
                true
            }
            Ok(applied) => {
                let pending: Vec<String> = known
                    .iter()
                    .filter(|version| !applied.contains(version))
                    .map(i64::to_string)
                    .collect();
                checks.push(DoctorCheck::fail(
                    "migration_status",
                    format!(
                        "pending migration(s): {}; run `leaveflow migrate`",
                        pending.join(", ")
                    ),
                ));
                false
            }
            Err(error) => {
                checks.push(DoctorCheck::fail(
                    "migration_status",
                    format!("failed to read migration history: {error}"),
                ));
                false
            }
        };

        if migrated {
            let store = SqlLeaveStore::new(pool.clone());
            checks.push(match store.leave_types().await {
                Ok(leave_types) if leave_types.is_empty() => {
                    DoctorCheck::fail("leave_types_configured", "no leave types configured")
                }
                Ok(leave_types) => {
                    let codes: Vec<&str> =
                        leave_types.iter().map(|leave_type| leave_type.code.0.as_str()).collect();
                    DoctorCheck::pass("leave_types_configured", codes.join(", "))
                }
                Err(error) => DoctorCheck::fail("leave_types_configured", error.to_string()),
            });
        } else {
            checks.push(DoctorCheck::skipped(
                "leave_types_configured",
                "the schema is not up to date",
            ));
        }

        pool.close().await;
        checks
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
