use eivs_core::config::LoadOptions;
use eivs_db::{connect_from_config, migrations, DemoSeed, SeedOptions, SqlRuleCatalog};
use tracing::info;

use crate::commands::{load_config, runtime, CommandResult, Failure};

struct SeedOutput {
    tenants: Vec<String>,
    intents: usize,
    rules: usize,
    customers: usize,
    customer_db: String,
}

/// Migrates the catalog, creates the demo customer database, and loads the
/// demo tenants. Safe to repeat.
pub fn run(options: LoadOptions, customer_db: Option<String>) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let seed_options = customer_db
        .map(|customer_db_address| SeedOptions { customer_db_address })
        .unwrap_or_default();

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let customers = DemoSeed::create_customer_database(&seed_options.customer_db_address)
            .await
            .map_err(|error| ("customer_db", error.to_string(), 5u8))?;

        let catalog = SqlRuleCatalog::new(pool.clone());
        let seeded = DemoSeed::load(&catalog, &seed_options)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoSeed::verify(&catalog)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;

        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err((
                "seed_verification",
                format!("seed verification failed for checks: {}", failed_checks.join(", ")),
                6u8,
            ));
        }

        Ok::<SeedOutput, Failure>(SeedOutput {
            tenants: seeded.tenants,
            intents: seeded.intents,
            rules: seeded.rules,
            customers,
            customer_db: seed_options.customer_db_address.clone(),
        })
    });

    match result {
        Ok(output) => {
            info!(
                event_name = "cli.seed.completed",
                tenants = output.tenants.len(),
                rules = output.rules,
                "demo catalog seeded"
            );
            CommandResult::success(
                "seed",
                format!(
                    "seeded tenants [{}]: {} intents, {} rules; {} customers in {}",
                    output.tenants.join(", "),
                    output.intents,
                    output.rules,
                    output.customers,
                    output.customer_db
                ),
            )
        }
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}
