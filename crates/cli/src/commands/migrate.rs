use eivs_core::config::LoadOptions;
use eivs_db::{connect_from_config, migrations};
use tracing::info;

use crate::commands::{load_config, runtime, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), Failure>(())
    });

    match result {
        Ok(()) => {
            info!(event_name = "cli.migrate.completed", "catalog migrations applied");
            CommandResult::success("migrate", "applied pending migrations")
        }
        Err(failure) => CommandResult::from_failure("migrate", failure),
    }
}
