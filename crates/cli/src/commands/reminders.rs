use std::sync::Arc;

use chrono::Utc;

use leaveflow_core::config::LoadOptions;
use leaveflow_core::{LeaveService, TracingAuditSink, TracingNotifier};
use leaveflow_db::{connect_with_config, migrations, SqlLeaveStore};

use crate::commands::{prepare, CommandResult, StepFailure};

/// Dispatches upcoming-leave reminders for approved requests starting within `days` (the
/// configured `workflow.reminder_days` when omitted).
pub fn run(options: LoadOptions, days: Option<u32>) -> CommandResult {
    let (config, runtime) = match prepare("reminders", options) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let window = days.unwrap_or(config.workflow.reminder_days);
    let correlation_id = format!("cli-reminders-{}", Utc::now().timestamp_millis());

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let service = LeaveService::new(
            Arc::new(SqlLeaveStore::new(pool.clone())),
            Arc::new(TracingNotifier),
            Arc::new(TracingAuditSink),
            config.workflow,
        );
        let reminded = service
            .send_upcoming_reminders(&correlation_id, Some(window))
            .await
            .map_err(|error| ("reminder_dispatch", error.to_string(), 7u8))?;
        pool.close().await;
        Ok::<_, StepFailure>(reminded)
    });

    match result {
        Ok(reminded) => {
            let ids: Vec<&str> = reminded.iter().map(|id| id.0.as_str()).collect();
            let message = if ids.is_empty() {
                format!("no approved leave starts within {window} day(s)")
            } else {
                format!(
                    "sent {} reminder(s) for leave starting within {window} day(s): {}",
                    ids.len(),
                    ids.join(", ")
                )
            };
            CommandResult::success("reminders", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("reminders", error_class, message, exit_code)
        }
    }
}
