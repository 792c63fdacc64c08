use leaveflow_core::config::LoadOptions;
use leaveflow_db::{connect_with_config, migrations, DemoDirectory, SqlLeaveStore};

use crate::commands::{prepare, CommandResult, StepFailure};

pub fn run(options: LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("seed", options) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store = SqlLeaveStore::new(pool.clone());
        let seeded = DemoDirectory::load(&store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoDirectory::verify(&store)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if !verification.passed {
            return Err(("seed_verification", verification_message(&verification.errors), 6u8));
        }
        Ok::<_, StepFailure>(seeded)
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "demo directory loaded: {} department(s), {} employee(s), {} leave type(s)",
                seeded.departments, seeded.employees, seeded.leave_types
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(errors: &[String]) -> String {
    if errors.is_empty() {
        return "Some seed data failed to load".to_string();
    }
    format!("Seed verification failed: {}", errors.join("; "))
}
