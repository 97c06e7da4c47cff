use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::Args;
use eivs_adapters::default_adapter_set;
use eivs_core::config::{AppConfig, LoadOptions};
use eivs_core::{
    CandidateRecord, EvaluationPolicy, IntentId, IntentValidator, OverallStatus, RuleEvaluator,
    TenantId, ValidationRequest, Verdict,
};
use eivs_db::{connect_from_config, CatalogStore, SqlRuleCatalog};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::{load_config, runtime, CommandResult, Failure};

#[derive(Clone, Debug, Default, Args)]
pub struct ValidateArgs {
    #[arg(long, help = "Tenant whose rule catalog is evaluated")]
    pub tenant: String,
    #[arg(long, help = "Intent id or intent code")]
    pub intent: String,
    #[arg(long, help = "Candidate record as a JSON object, or @path to a JSON file")]
    pub record: String,
    #[arg(long, help = "stop_on_first_failure or evaluate_all (defaults to engine.default_policy)")]
    pub policy: Option<String>,
    #[arg(long, help = "Only run rules in this language plus `multi` rules")]
    pub language: Option<String>,
    #[arg(long, help = "Correlation id attached to logs and the report")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    command: &'static str,
    status: &'static str,
    tenant_id: String,
    intent_id: i64,
    correlation_id: String,
    evaluated_at: String,
    verdict: Verdict,
}

pub fn run(options: LoadOptions, args: ValidateArgs) -> CommandResult {
    let config = match load_config("validate", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let (record, policy) = match parse_input(&args, &config) {
        Ok(parsed) => parsed,
        Err(error) => {
            return CommandResult::failure("validate", "invalid_input", format!("{error:#}"), 7)
        }
    };

    let runtime = match runtime("validate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let tenant_id = TenantId::new(args.tenant.trim());
    let result = runtime.block_on(async {
        let adapters = default_adapter_set(&config.http)
            .map_err(|error| ("adapter_init", error.to_string(), 3u8))?;
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let catalog = Arc::new(SqlRuleCatalog::new(pool.clone()));

        let intent_id = resolve_intent(catalog.as_ref(), &tenant_id, &args.intent)
            .await
            .map_err(|error| ("invalid_input", format!("{error:#}"), 7u8))?;

        let evaluator = RuleEvaluator::new(adapters)
            .with_adapter_timeout(config.engine.adapter_timeout())
            .with_retry(config.engine.retry_policy());
        let validator = IntentValidator::new(catalog, evaluator)
            .with_max_concurrency(config.engine.max_concurrency);

        let mut request = ValidationRequest::new(tenant_id.clone(), intent_id, record, policy);
        if let Some(language) = &args.language {
            request = request.with_language(language.clone());
        }
        if let Some(correlation_id) = &args.correlation_id {
            request = request.with_correlation_id(correlation_id.clone());
        }

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let verdict = validator.validate(&request, &cancel).await;
        watcher.abort();
        pool.close().await;

        Ok::<(ValidationRequest, Verdict), Failure>((request, verdict))
    });

    let (request, verdict) = match result {
        Ok(evaluated) => evaluated,
        Err(failure) => return CommandResult::from_failure("validate", failure),
    };

    info!(
        event_name = "cli.validate.completed",
        correlation_id = %request.correlation_id,
        tenant_id = %request.tenant_id,
        intent_id = %request.intent_id,
        overall_status = ?verdict.overall_status,
        "validation finished"
    );

    let passed = verdict.overall_status == OverallStatus::Pass;
    let report = ValidationReport {
        command: "validate",
        status: if passed { "ok" } else { "rejected" },
        tenant_id: request.tenant_id.as_str().to_string(),
        intent_id: request.intent_id.0,
        correlation_id: request.correlation_id,
        evaluated_at: Utc::now().to_rfc3339(),
        verdict,
    };
    CommandResult::report("validate", if passed { 0 } else { 1 }, &report)
}

fn parse_input(
    args: &ValidateArgs,
    config: &AppConfig,
) -> anyhow::Result<(CandidateRecord, EvaluationPolicy)> {
    if args.tenant.trim().is_empty() {
        return Err(anyhow!("tenant must not be empty"));
    }

    let record = parse_record(&args.record)?;
    let policy = match &args.policy {
        Some(raw) => raw.parse::<EvaluationPolicy>().map_err(|error| anyhow!(error))?,
        None => config.engine.default_policy,
    };

    Ok((record, policy))
}

fn parse_record(raw: &str) -> anyhow::Result<CandidateRecord> {
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read record file `{path}`"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("record must be a JSON object of field values")
}

async fn resolve_intent(
    catalog: &SqlRuleCatalog,
    tenant_id: &TenantId,
    raw: &str,
) -> anyhow::Result<IntentId> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(IntentId(id));
    }

    let intent = catalog
        .find_intent_by_code(tenant_id, raw)
        .await
        .with_context(|| format!("failed to look up intent `{raw}`"))?;
    intent
        .map(|intent| intent.id)
        .ok_or_else(|| anyhow!("tenant `{tenant_id}` has no intent with code `{raw}`"))
}
