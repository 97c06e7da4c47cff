//! Intent validation: load the tenant's ordered rule set, run each rule, and
//! fold the outcomes into one [`Verdict`].

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::probe_with_timeout;
use crate::catalog::RuleCatalog;
use crate::domain::datasource::DatasourceKind;
use crate::domain::intent::IntentId;
use crate::domain::record::CandidateRecord;
use crate::domain::rule::ValidationRule;
use crate::domain::tenant::TenantId;
use crate::domain::verdict::{EvaluationPolicy, RuleOutcome, RuleStatus, Verdict};
use crate::errors::{AdapterError, EngineError};
use crate::evaluator::RuleEvaluator;
use crate::isolation::TenantView;
use crate::resolver::{
    ConnectionResolver, CredentialDecryptor, LookupTarget, PassthroughDecryptor, ResolutionScope,
};

#[derive(Clone, Debug)]
pub struct ValidationRequest {
    pub tenant_id: TenantId,
    pub intent_id: IntentId,
    pub record: CandidateRecord,
    pub policy: EvaluationPolicy,
    /// Restricts the rule set to this language plus `multi` rules.
    pub language: Option<String>,
    pub correlation_id: String,
}

impl ValidationRequest {
    pub fn new(
        tenant_id: TenantId,
        intent_id: IntentId,
        record: CandidateRecord,
        policy: EvaluationPolicy,
    ) -> Self {
        Self {
            tenant_id,
            intent_id,
            record,
            policy,
            language: None,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub config_name: String,
    pub kind: DatasourceKind,
    pub latency_ms: u64,
}

/// Resolved lookup target, or the outcome that replaces evaluation when
/// resolution failed.
type Prepared = Result<Option<LookupTarget>, RuleOutcome>;

pub struct IntentValidator<C: ?Sized> {
    catalog: Arc<C>,
    evaluator: RuleEvaluator,
    decryptor: Arc<dyn CredentialDecryptor>,
    max_concurrency: usize,
}

impl<C> IntentValidator<C>
where
    C: RuleCatalog + ?Sized,
{
    pub fn new(catalog: Arc<C>, evaluator: RuleEvaluator) -> Self {
        Self { catalog, evaluator, decryptor: Arc::new(PassthroughDecryptor), max_concurrency: 1 }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    /// Upper bound on concurrently running rules under `evaluate_all`.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub async fn validate_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
        record: &CandidateRecord,
        policy: EvaluationPolicy,
    ) -> Verdict {
        let request = ValidationRequest::new(tenant_id.clone(), intent_id, record.clone(), policy);
        self.validate(&request, &CancellationToken::new()).await
    }

    /// Always returns a verdict. Cancelling `cancel` drops in-flight adapter
    /// calls and marks every unevaluated rule as cancelled.
    pub async fn validate(
        &self,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Verdict {
        let started = Instant::now();
        let view = TenantView::new(request.tenant_id.clone(), self.catalog.as_ref());

        info!(
            event_name = "engine.validation.started",
            correlation_id = %request.correlation_id,
            tenant_id = %request.tenant_id,
            intent_id = %request.intent_id,
            policy = request.policy.as_str(),
            "intent validation started"
        );

        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Verdict::cancelled(),
            loaded = self.load_rules(&view, request) => loaded,
        };
        let rules = match loaded {
            Ok(rules) => rules,
            Err(detail) => {
                warn!(
                    event_name = "engine.validation.rules_unavailable",
                    correlation_id = %request.correlation_id,
                    tenant_id = %request.tenant_id,
                    intent_id = %request.intent_id,
                    error = %detail,
                    "rule set could not be loaded"
                );
                return Verdict::unavailable(detail);
            }
        };

        let verdict = match request.policy {
            EvaluationPolicy::EvaluateAll if self.max_concurrency > 1 => {
                self.run_concurrent(&view, &rules, &request.record, cancel).await
            }
            policy => self.run_sequential(&view, &rules, &request.record, policy, cancel).await,
        };

        info!(
            event_name = "engine.validation.completed",
            correlation_id = %request.correlation_id,
            tenant_id = %request.tenant_id,
            intent_id = %request.intent_id,
            overall_status = ?verdict.overall_status,
            rules_evaluated = verdict.outcomes.len(),
            rules_not_run = verdict.rules_not_run,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "intent validation completed"
        );
        verdict
    }

    /// Resolves `config_name` for the tenant and asks the matching adapter for a
    /// reachability check.
    pub async fn probe(
        &self,
        tenant_id: &TenantId,
        config_name: &str,
    ) -> Result<ProbeReport, EngineError> {
        let view = TenantView::new(tenant_id.clone(), self.catalog.as_ref());
        let resolver = ConnectionResolver::new(&view, self.decryptor.as_ref());
        let connection = resolver.resolve(config_name).await?;

        let kind = DatasourceKind::for_protocol(&connection.protocol).ok_or_else(|| {
            AdapterError::Unsupported(format!("protocol `{}` has no adapter", connection.protocol))
        })?;
        let adapter = self.evaluator.adapters().get(kind)?;

        let started = Instant::now();
        probe_with_timeout(adapter.as_ref(), &connection, self.evaluator.adapter_timeout())
            .await?;

        Ok(ProbeReport {
            config_name: connection.config_name,
            kind,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn load_rules(
        &self,
        view: &TenantView<'_, C>,
        request: &ValidationRequest,
    ) -> Result<Vec<ValidationRule>, String> {
        view.active_tenant().await.map_err(|error| error.to_string())?;
        let mut rules =
            view.active_rules(request.intent_id).await.map_err(|error| error.to_string())?;

        rules.retain(|rule| rule.applies_to_language(request.language.as_deref()));
        rules.sort_by(ValidationRule::execution_order);
        Ok(rules)
    }

    async fn run_sequential(
        &self,
        view: &TenantView<'_, C>,
        rules: &[ValidationRule],
        record: &CandidateRecord,
        policy: EvaluationPolicy,
        cancel: &CancellationToken,
    ) -> Verdict {
        let mut scope = ResolutionScope::new(view, self.decryptor.as_ref());
        let mut outcomes = Vec::with_capacity(rules.len());
        let mut rules_not_run = 0;

        for (index, rule) in rules.iter().enumerate() {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.run_rule(&mut scope, rule, record) => Some(outcome),
            };
            let Some(outcome) = step else {
                outcomes.extend(rules[index..].iter().map(RuleOutcome::cancelled));
                break;
            };

            let stop = policy == EvaluationPolicy::StopOnFirstFailure
                && outcome.status != RuleStatus::Pass;
            outcomes.push(outcome);
            if stop {
                rules_not_run = rules.len() - index - 1;
                break;
            }
        }

        Verdict::from_outcomes(outcomes, rules_not_run)
    }

    /// Targets are resolved up front in execution order, then evaluations run
    /// with bounded concurrency. `buffered` yields in submission order, so the
    /// outcome list keeps priority order regardless of completion order.
    async fn run_concurrent(
        &self,
        view: &TenantView<'_, C>,
        rules: &[ValidationRule],
        record: &CandidateRecord,
        cancel: &CancellationToken,
    ) -> Verdict {
        let mut scope = ResolutionScope::new(view, self.decryptor.as_ref());
        let mut prepared: Vec<Prepared> = Vec::with_capacity(rules.len());

        for rule in rules {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                target = self.prepare(&mut scope, rule) => Some(target),
            };
            match step {
                Some(target) => prepared.push(target),
                None => {
                    return Verdict::from_outcomes(
                        rules.iter().map(RuleOutcome::cancelled).collect(),
                        0,
                    );
                }
            }
        }

        let evaluations = rules.iter().zip(prepared).map(|(rule, prepared)| async move {
            match prepared {
                Ok(target) => self.evaluator.evaluate(rule, record, target.as_ref()).await,
                Err(outcome) => outcome,
            }
        });
        let mut pending = stream::iter(evaluations).buffered(self.max_concurrency);
        let mut outcomes = Vec::with_capacity(rules.len());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcomes.extend(rules[outcomes.len()..].iter().map(RuleOutcome::cancelled));
                    break;
                }
                next = pending.next() => match next {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }

        Verdict::from_outcomes(outcomes, 0)
    }

    async fn run_rule(
        &self,
        scope: &mut ResolutionScope<'_, '_, C>,
        rule: &ValidationRule,
        record: &CandidateRecord,
    ) -> RuleOutcome {
        match self.prepare(scope, rule).await {
            Ok(target) => self.evaluator.evaluate(rule, record, target.as_ref()).await,
            Err(outcome) => outcome,
        }
    }

    async fn prepare(
        &self,
        scope: &mut ResolutionScope<'_, '_, C>,
        rule: &ValidationRule,
    ) -> Prepared {
        if !rule.requires_lookup() {
            return Ok(None);
        }
        match scope.target_for(rule).await {
            Ok(target) => Ok(Some(target)),
            Err(error) => Err(RuleOutcome::error(rule, &EngineError::from(error))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::adapter::{AdapterSet, DatasourceAdapter, ResultSet, Row};
    use crate::catalog::RuleCatalog;
    use crate::domain::datasource::{
        AuthDescriptor, Datasource, DatasourceConfig, DatasourceId, DatasourceKind,
    };
    use crate::domain::intent::IntentId;
    use crate::domain::record::CandidateRecord;
    use crate::domain::rule::{ConditionTemplate, RuleId, RuleType, Severity, ValidationRule};
    use crate::domain::tenant::{Tenant, TenantId};
    use crate::domain::verdict::{EvaluationPolicy, OverallStatus, RuleStatus};
    use crate::errors::{AdapterError, CatalogError, ErrorKind};
    use crate::evaluator::RuleEvaluator;
    use crate::renderer::ConcreteQuery;
    use crate::resolver::ConnectionDescriptor;

    use super::{IntentValidator, ValidationRequest};

    /// Answers by keyword in the statement: `pass` → one row, `fail` → none,
    /// `error` → connection failure, `hang` → never.
    struct KeywordAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DatasourceAdapter for KeywordAdapter {
        fn kind(&self) -> DatasourceKind {
            DatasourceKind::Relational
        }

        async fn execute(
            &self,
            _connection: &ConnectionDescriptor,
            query: &ConcreteQuery,
        ) -> Result<ResultSet, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let statement = query.positional_statement();
            if statement.contains("hang") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if statement.contains("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if statement.contains("error") {
                return Err(AdapterError::ConnectionFailed("refused".to_string()));
            }
            if statement.contains("fail") {
                return Ok(ResultSet::empty());
            }
            Ok(ResultSet::from_rows(vec![Row::from([("id".to_string(), json!(1))])]))
        }

        async fn probe(&self, _connection: &ConnectionDescriptor) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct StaticCatalog {
        tenants: Vec<Tenant>,
        rules: Vec<ValidationRule>,
        datasources: HashMap<i64, Datasource>,
        configs: Vec<DatasourceConfig>,
        broken: bool,
        config_reads: AtomicUsize,
    }

    #[async_trait]
    impl RuleCatalog for StaticCatalog {
        async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>, CatalogError> {
            Ok(self.tenants.iter().find(|tenant| &tenant.id == tenant_id).cloned())
        }

        async fn get_active_rules_by_intent(
            &self,
            tenant_id: &TenantId,
            intent_id: IntentId,
        ) -> Result<Vec<ValidationRule>, CatalogError> {
            if self.broken {
                return Err(CatalogError("database is locked".to_string()));
            }
            Ok(self
                .rules
                .iter()
                .filter(|rule| &rule.tenant_id == tenant_id && rule.intent_id == intent_id)
                .cloned()
                .collect())
        }

        async fn get_datasource(
            &self,
            _tenant_id: &TenantId,
            datasource_id: DatasourceId,
        ) -> Result<Option<Datasource>, CatalogError> {
            Ok(self.datasources.get(&datasource_id.0).cloned())
        }

        async fn get_datasource_config(
            &self,
            tenant_id: &TenantId,
            name: &str,
        ) -> Result<Option<DatasourceConfig>, CatalogError> {
            self.config_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .configs
                .iter()
                .find(|config| &config.tenant_id == tenant_id && config.name == name)
                .cloned())
        }
    }

    fn tenant(id: &str) -> Tenant {
        Tenant { id: TenantId::new(id), display_name: id.to_string(), active: true }
    }

    fn datasource(id: i64, tenant: &str) -> Datasource {
        Datasource {
            id: DatasourceId(id),
            tenant_id: TenantId::new(tenant),
            name: "customers".to_string(),
            kind: DatasourceKind::Relational,
            connection_key: "customer_db".to_string(),
            active: true,
        }
    }

    fn config(tenant: &str) -> DatasourceConfig {
        DatasourceConfig {
            tenant_id: TenantId::new(tenant),
            name: "customer_db".to_string(),
            protocol: "sqlite".to_string(),
            driver_family: "sqlite".to_string(),
            base_address: "sqlite::memory:".to_string(),
            auth: AuthDescriptor::none(),
            extra: serde_json::Map::new(),
            active: true,
        }
    }

    fn rule(id: i64, priority: i32, behaviour: &str) -> ValidationRule {
        ValidationRule {
            id: RuleId(id),
            tenant_id: TenantId::new("acme"),
            intent_id: IntentId(1),
            datasource_id: DatasourceId(1),
            code: format!("R{id}"),
            name: format!("rule {id}"),
            language_code: "multi".to_string(),
            target_field: "sender_email".to_string(),
            rule_type: RuleType::Exists,
            condition: Some(ConditionTemplate::new(
                format!("SELECT 1 /* {behaviour} */ WHERE email = {{{{sender_email}}}}"),
                ["sender_email"],
            )),
            priority,
            severity: Severity::Critical,
            active: true,
        }
    }

    fn catalog(rules: Vec<ValidationRule>) -> StaticCatalog {
        StaticCatalog {
            tenants: vec![tenant("acme"), tenant("globex")],
            rules,
            datasources: HashMap::from([(1, datasource(1, "acme")), (2, datasource(2, "globex"))]),
            configs: vec![config("acme"), config("globex")],
            ..StaticCatalog::default()
        }
    }

    fn validator(catalog: StaticCatalog) -> (IntentValidator<StaticCatalog>, Arc<KeywordAdapter>) {
        let adapter = Arc::new(KeywordAdapter { calls: AtomicUsize::new(0) });
        let evaluator = RuleEvaluator::new(AdapterSet::new().with_adapter(adapter.clone()));
        (IntentValidator::new(Arc::new(catalog), evaluator), adapter)
    }

    fn record() -> CandidateRecord {
        CandidateRecord::new().with_field("sender_email", "ops@acme.test")
    }

    async fn run(
        validator: &IntentValidator<StaticCatalog>,
        policy: EvaluationPolicy,
    ) -> crate::domain::verdict::Verdict {
        validator.validate_intent(&TenantId::new("acme"), IntentId(1), &record(), policy).await
    }

    fn ids(verdict: &crate::domain::verdict::Verdict) -> Vec<i64> {
        verdict.outcomes.iter().map(|outcome| outcome.rule_id.0).collect()
    }

    #[tokio::test]
    async fn inactive_rules_yield_a_vacuous_pass() {
        let mut inactive = rule(1, 10, "pass");
        inactive.active = false;
        let (validator, adapter) = validator(catalog(vec![inactive]));

        let verdict = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(verdict.overall_status, OverallStatus::Pass);
        assert!(verdict.outcomes.is_empty());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn outcomes_follow_priority_then_rule_id() {
        let (validator, _) = validator(catalog(vec![
            rule(1, 30, "pass"),
            rule(2, 10, "pass"),
            rule(3, 20, "pass"),
            rule(4, 20, "pass"),
        ]));

        let verdict = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(ids(&verdict), vec![2, 3, 4, 1]);
    }

    #[tokio::test]
    async fn stop_on_first_failure_short_circuits() {
        let (validator, adapter) =
            validator(catalog(vec![rule(1, 1, "pass"), rule(2, 2, "fail"), rule(3, 3, "pass")]));

        let verdict = run(&validator, EvaluationPolicy::StopOnFirstFailure).await;

        assert_eq!(verdict.overall_status, OverallStatus::Fail);
        assert_eq!(ids(&verdict), vec![1, 2]);
        assert_eq!(verdict.failures().count(), 1);
        assert_eq!(verdict.rules_not_run, 1);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_on_first_failure_also_stops_on_error() {
        let (validator, _) = validator(catalog(vec![rule(1, 1, "error"), rule(2, 2, "pass")]));

        let verdict = run(&validator, EvaluationPolicy::StopOnFirstFailure).await;

        assert_eq!(verdict.overall_status, OverallStatus::Error);
        assert_eq!(verdict.rules_not_run, 1);
    }

    #[tokio::test]
    async fn evaluate_all_lets_fail_dominate_error() {
        let (validator, _) =
            validator(catalog(vec![rule(1, 1, "pass"), rule(2, 2, "error"), rule(3, 3, "fail")]));

        let verdict = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(verdict.overall_status, OverallStatus::Fail);
        assert_eq!(
            verdict.outcomes.iter().map(|outcome| outcome.status).collect::<Vec<_>>(),
            vec![RuleStatus::Pass, RuleStatus::Error, RuleStatus::Fail]
        );
        assert_eq!(verdict.rules_not_run, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_evaluation_reports_in_priority_order() {
        let (validator, adapter) = validator(catalog(vec![
            rule(1, 1, "slow pass"),
            rule(2, 2, "fail"),
            rule(3, 3, "pass"),
        ]));
        let validator = validator.with_max_concurrency(3);

        let verdict = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(ids(&verdict), vec![1, 2, 3]);
        assert_eq!(verdict.overall_status, OverallStatus::Fail);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connections_are_resolved_once_per_call() {
        let (validator, _) = validator(catalog(vec![rule(1, 1, "pass"), rule(2, 2, "pass")]));
        let first = run(&validator, EvaluationPolicy::EvaluateAll).await;
        assert!(first.is_pass());

        let catalog = validator.catalog.clone();
        assert_eq!(catalog.config_reads.load(Ordering::SeqCst), 1);

        run(&validator, EvaluationPolicy::EvaluateAll).await;
        assert_eq!(catalog.config_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn foreign_datasource_reference_is_not_found() {
        let mut foreign = rule(1, 1, "pass");
        foreign.datasource_id = DatasourceId(2);
        let (validator, adapter) = validator(catalog(vec![foreign]));

        let verdict = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(verdict.overall_status, OverallStatus::Error);
        assert_eq!(verdict.outcomes[0].error_kind, Some(ErrorKind::NotFound));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn other_tenants_intent_has_no_rules() {
        let (validator, _) = validator(catalog(vec![rule(1, 1, "fail")]));

        let verdict = validator
            .validate_intent(
                &TenantId::new("globex"),
                IntentId(1),
                &record(),
                EvaluationPolicy::EvaluateAll,
            )
            .await;

        assert!(verdict.is_pass());
        assert!(verdict.outcomes.is_empty());
    }

    #[tokio::test]
    async fn unknown_tenant_yields_error_verdict() {
        let (validator, _) = validator(catalog(vec![rule(1, 1, "pass")]));

        let verdict = validator
            .validate_intent(
                &TenantId::new("initech"),
                IntentId(1),
                &record(),
                EvaluationPolicy::EvaluateAll,
            )
            .await;

        assert_eq!(verdict.overall_status, OverallStatus::Error);
        assert!(verdict.detail.as_deref().is_some_and(|detail| detail.starts_with("NotFound")));
    }

    #[tokio::test]
    async fn catalog_failure_still_returns_a_verdict() {
        let mut broken = catalog(vec![rule(1, 1, "pass")]);
        broken.broken = true;
        let (validator, _) = validator(broken);

        let verdict = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(verdict.overall_status, OverallStatus::Error);
        assert!(verdict.outcomes.is_empty());
        assert!(verdict.detail.as_deref().is_some_and(|detail| detail.contains("locked")));
    }

    #[tokio::test]
    async fn language_filter_keeps_matching_and_multi_rules() {
        let mut german = rule(1, 1, "pass");
        german.language_code = "de".to_string();
        let mut french = rule(2, 2, "fail");
        french.language_code = "fr".to_string();
        let shared = rule(3, 3, "pass");
        let (validator, _) = validator(catalog(vec![german, french, shared]));

        let request = ValidationRequest::new(
            TenantId::new("acme"),
            IntentId(1),
            record(),
            EvaluationPolicy::EvaluateAll,
        )
        .with_language("de");
        let verdict = validator.validate(&request, &CancellationToken::new()).await;

        assert_eq!(ids(&verdict), vec![1, 3]);
        assert!(verdict.is_pass());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_marks_remaining_rules() {
        let (validator, _) =
            validator(catalog(vec![rule(1, 1, "pass"), rule(2, 2, "hang"), rule(3, 3, "pass")]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = ValidationRequest::new(
            TenantId::new("acme"),
            IntentId(1),
            record(),
            EvaluationPolicy::StopOnFirstFailure,
        );
        let verdict = validator.validate(&request, &cancel).await;

        assert_eq!(verdict.overall_status, OverallStatus::Cancelled);
        assert_eq!(ids(&verdict), vec![1, 2, 3]);
        assert_eq!(verdict.outcomes[0].status, RuleStatus::Pass);
        for outcome in &verdict.outcomes[1..] {
            assert_eq!(outcome.status, RuleStatus::Error);
            assert_eq!(outcome.detail, "Cancelled");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_reaches_concurrent_evaluations() {
        let (validator, _) = validator(catalog(vec![rule(1, 1, "hang"), rule(2, 2, "pass")]));
        let validator = validator.with_max_concurrency(2);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = ValidationRequest::new(
            TenantId::new("acme"),
            IntentId(1),
            record(),
            EvaluationPolicy::EvaluateAll,
        );
        let verdict = validator.validate(&request, &cancel).await;

        assert_eq!(verdict.overall_status, OverallStatus::Cancelled);
        assert!(verdict.outcomes.iter().all(|outcome| outcome.is_cancelled()));
    }

    #[tokio::test]
    async fn already_cancelled_call_runs_nothing() {
        let (validator, adapter) = validator(catalog(vec![rule(1, 1, "pass")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = ValidationRequest::new(
            TenantId::new("acme"),
            IntentId(1),
            record(),
            EvaluationPolicy::EvaluateAll,
        );
        let verdict = validator.validate(&request, &cancel).await;

        assert_eq!(verdict.overall_status, OverallStatus::Cancelled);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_verdicts() {
        let (validator, _) =
            validator(catalog(vec![rule(1, 1, "pass"), rule(2, 2, "error"), rule(3, 3, "fail")]));

        let first = run(&validator, EvaluationPolicy::EvaluateAll).await;
        let second = run(&validator, EvaluationPolicy::EvaluateAll).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn probe_resolves_config_and_checks_the_adapter() {
        let (validator, _) = validator(catalog(Vec::new()));

        let report =
            validator.probe(&TenantId::new("acme"), "customer_db").await.expect("probe");
        assert_eq!(report.kind, DatasourceKind::Relational);

        let missing = validator.probe(&TenantId::new("acme"), "ledger_db").await;
        assert_eq!(missing.map_err(|error| error.kind()), Err(ErrorKind::NotFound));
    }
}
