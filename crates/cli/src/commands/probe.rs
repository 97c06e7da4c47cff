use std::sync::Arc;

use eivs_adapters::default_adapter_set;
use eivs_core::config::LoadOptions;
use eivs_core::{IntentValidator, RuleEvaluator, TenantId};
use eivs_db::{connect_from_config, SqlRuleCatalog};
use tracing::info;

use crate::commands::{load_config, runtime, CommandResult};

/// Resolves a tenant's datasource configuration and checks that its adapter
/// can reach it.
pub fn run(options: LoadOptions, tenant: String, config_name: String) -> CommandResult {
    let config = match load_config("probe", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("probe") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let tenant_id = TenantId::new(tenant.trim());
    let result = runtime.block_on(async {
        let adapters = default_adapter_set(&config.http)
            .map_err(|error| ("adapter_init", error.to_string(), 3u8))?;
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let evaluator =
            RuleEvaluator::new(adapters).with_adapter_timeout(config.engine.adapter_timeout());
        let catalog = Arc::new(SqlRuleCatalog::new(pool.clone()));
        let validator = IntentValidator::new(catalog, evaluator);
        let report = validator
            .probe(&tenant_id, &config_name)
            .await
            .map_err(|error| ("probe_failed", error.to_string(), 1u8));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => {
            info!(
                event_name = "cli.probe.completed",
                tenant_id = %tenant_id,
                config_name = %report.config_name,
                latency_ms = report.latency_ms,
                "datasource reachable"
            );
            CommandResult::report("probe", 0, &report)
        }
        Err(failure) => CommandResult::from_failure("probe", failure),
    }
}
