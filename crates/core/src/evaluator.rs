//! Single-rule evaluation: render → execute → interpret.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{execute_with_retry, AdapterSet, ResultSet, RetryPolicy};
use crate::domain::record::{scalar_text, CandidateRecord};
use crate::domain::rule::{ExpectedValue, RuleType, ValidationRule};
use crate::domain::verdict::RuleOutcome;
use crate::errors::{EngineError, RenderError};
use crate::renderer::render;
use crate::resolver::LookupTarget;

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Pass/fail decision plus a human-readable reason. Errors are carried
/// separately as [`EngineError`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleCheck {
    pub passed: bool,
    pub detail: String,
}

impl RuleCheck {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self { passed: true, detail: detail.into() }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self { passed: false, detail: detail.into() }
    }
}

pub struct CustomRuleContext<'a> {
    pub rule: &'a ValidationRule,
    pub record: &'a CandidateRecord,
    pub params: &'a Value,
    /// Present only when the rule declares a condition template.
    pub rows: Option<&'a ResultSet>,
}

/// Extension point for `custom` rule types, dispatched by tag.
pub trait CustomRule: Send + Sync {
    fn tag(&self) -> &str;

    fn check(&self, context: CustomRuleContext<'_>) -> Result<RuleCheck, EngineError>;
}

#[derive(Clone, Default)]
pub struct CustomRuleRegistry {
    rules: HashMap<String, Arc<dyn CustomRule>>,
}

impl CustomRuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RowCountRule));
        registry
    }

    pub fn register(&mut self, rule: Arc<dyn CustomRule>) {
        self.rules.insert(rule.tag().to_string(), rule);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn CustomRule>> {
        self.rules.get(tag).cloned()
    }
}

/// `row_count`: passes when the lookup row count lies in `[min, max]`.
/// `min` defaults to 1, `max` is unbounded when absent.
pub struct RowCountRule;

impl CustomRule for RowCountRule {
    fn tag(&self) -> &str {
        "row_count"
    }

    fn check(&self, context: CustomRuleContext<'_>) -> Result<RuleCheck, EngineError> {
        let rows = context.rows.ok_or_else(|| {
            EngineError::InvalidRule("row_count requires a condition template".to_string())
        })?;
        let min = bound(context.params, "min")?.unwrap_or(1);
        let max = bound(context.params, "max")?;

        let count = rows.len() as u64;
        let within = count >= min && max.map_or(true, |max| count <= max);
        let range = match max {
            Some(max) => format!("[{min}, {max}]"),
            None => format!("[{min}, ∞)"),
        };

        if within {
            Ok(RuleCheck::pass(format!("{count} row(s) within {range}")))
        } else {
            Ok(RuleCheck::fail(format!("{count} row(s) outside {range}")))
        }
    }
}

fn bound(params: &Value, key: &str) -> Result<Option<u64>, EngineError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            EngineError::InvalidRule(format!("row_count `{key}` must be a non-negative integer"))
        }),
    }
}

#[derive(Clone)]
pub struct RuleEvaluator {
    adapters: AdapterSet,
    custom_rules: CustomRuleRegistry,
    adapter_timeout: Duration,
    retry: RetryPolicy,
}

impl RuleEvaluator {
    pub fn new(adapters: AdapterSet) -> Self {
        Self {
            adapters,
            custom_rules: CustomRuleRegistry::with_builtin_rules(),
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_custom_rule(mut self, rule: Arc<dyn CustomRule>) -> Self {
        self.custom_rules.register(rule);
        self
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn adapter_timeout(&self) -> Duration {
        self.adapter_timeout
    }

    /// `target` must be supplied when [`ValidationRule::requires_lookup`] holds.
    pub async fn evaluate(
        &self,
        rule: &ValidationRule,
        record: &CandidateRecord,
        target: Option<&LookupTarget>,
    ) -> RuleOutcome {
        let outcome = match self.check(rule, record, target).await {
            Ok(check) if check.passed => RuleOutcome::pass(rule, check.detail),
            Ok(check) => RuleOutcome::fail(rule, check.detail),
            Err(error) => RuleOutcome::error(rule, &error),
        };

        debug!(
            event_name = "engine.rule.evaluated",
            tenant_id = %rule.tenant_id,
            rule_id = %rule.id,
            rule_code = %rule.code,
            rule_type = rule.rule_type.name(),
            status = ?outcome.status,
            "rule evaluated"
        );
        outcome
    }

    async fn check(
        &self,
        rule: &ValidationRule,
        record: &CandidateRecord,
        target: Option<&LookupTarget>,
    ) -> Result<RuleCheck, EngineError> {
        match &rule.rule_type {
            RuleType::Exists => {
                let rows = self.lookup(rule, record, target).await?;
                if rows.is_empty() {
                    Ok(RuleCheck::fail("lookup returned no rows"))
                } else {
                    Ok(RuleCheck::pass(format!("lookup returned {} row(s)", rows.len())))
                }
            }
            RuleType::Equals { column, expected, case_insensitive } => {
                let expected = expected_text(expected, record)?;
                let rows = self.lookup(rule, record, target).await?;
                let Some(row) = rows.single() else {
                    return Ok(RuleCheck::fail(format!(
                        "expected exactly one row, lookup returned {}",
                        rows.len()
                    )));
                };
                let Some(actual) = row.get(column).and_then(scalar_text) else {
                    return Ok(RuleCheck::fail(format!("column `{column}` has no scalar value")));
                };

                let matched = if *case_insensitive {
                    actual.to_lowercase() == expected.to_lowercase()
                } else {
                    actual.as_bytes() == expected.as_bytes()
                };
                if matched {
                    Ok(RuleCheck::pass(format!("`{column}` equals `{expected}`")))
                } else {
                    Ok(RuleCheck::fail(format!("`{column}` is `{actual}`, expected `{expected}`")))
                }
            }
            RuleType::Regex { pattern } => {
                let regex = Regex::new(pattern).map_err(|error| {
                    EngineError::InvalidRule(format!("pattern does not compile: {error}"))
                })?;
                let value = target_text(rule, record)?;
                let context = match rule.condition {
                    Some(_) => Some(self.lookup(rule, record, target).await?),
                    None => None,
                };

                let matched = regex.is_match(&value);
                let suffix = context
                    .map(|rows| format!(" ({} context row(s))", rows.len()))
                    .unwrap_or_default();
                if matched {
                    Ok(RuleCheck::pass(format!("`{}` matches pattern{suffix}", rule.target_field)))
                } else {
                    Ok(RuleCheck::fail(format!(
                        "`{}` does not match pattern{suffix}",
                        rule.target_field
                    )))
                }
            }
            RuleType::Custom { tag, params } => {
                let custom = self
                    .custom_rules
                    .get(tag)
                    .ok_or_else(|| EngineError::UnsupportedRuleType(tag.clone()))?;
                let rows = match rule.condition {
                    Some(_) => Some(self.lookup(rule, record, target).await?),
                    None => None,
                };
                custom.check(CustomRuleContext { rule, record, params, rows: rows.as_ref() })
            }
        }
    }

    async fn lookup(
        &self,
        rule: &ValidationRule,
        record: &CandidateRecord,
        target: Option<&LookupTarget>,
    ) -> Result<ResultSet, EngineError> {
        let condition = rule.condition.as_ref().ok_or_else(|| {
            EngineError::InvalidRule(format!(
                "`{}` rule has no condition template",
                rule.rule_type.name()
            ))
        })?;
        let target = target.ok_or_else(|| {
            EngineError::InvalidRule("no datasource connection resolved for lookup".to_string())
        })?;

        let query = render(condition, record)?;
        let adapter = self.adapters.get(target.kind)?;
        let rows = execute_with_retry(
            adapter.as_ref(),
            &target.connection,
            &query,
            self.adapter_timeout,
            self.retry,
        )
        .await?;
        Ok(rows)
    }
}

fn expected_text(
    expected: &ExpectedValue,
    record: &CandidateRecord,
) -> Result<String, EngineError> {
    match expected {
        ExpectedValue::Literal(text) => Ok(text.clone()),
        ExpectedValue::Field(field) => field_text(record, field),
    }
}

fn target_text(rule: &ValidationRule, record: &CandidateRecord) -> Result<String, EngineError> {
    field_text(record, &rule.target_field)
}

fn field_text(record: &CandidateRecord, field: &str) -> Result<String, EngineError> {
    let value = record
        .value(field)
        .ok_or_else(|| RenderError::MissingField { field: field.to_string() })?;
    let text = scalar_text(value)
        .ok_or_else(|| RenderError::UnsupportedValue { field: field.to_string() })?;
    Ok(text)
}
