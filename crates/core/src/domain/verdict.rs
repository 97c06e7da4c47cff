use serde::{Deserialize, Serialize};

use crate::domain::rule::{RuleId, Severity, ValidationRule};
use crate::errors::{EngineError, ErrorKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPolicy {
    StopOnFirstFailure,
    #[default]
    EvaluateAll,
}

impl EvaluationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopOnFirstFailure => "stop_on_first_failure",
            Self::EvaluateAll => "evaluate_all",
        }
    }
}

impl std::str::FromStr for EvaluationPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stop_on_first_failure" | "stop" | "fail_fast" => Ok(Self::StopOnFirstFailure),
            "evaluate_all" | "all" => Ok(Self::EvaluateAll),
            other => Err(format!(
                "unsupported evaluation policy `{other}` (expected stop_on_first_failure|evaluate_all)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Pass,
    Fail,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pass,
    Fail,
    Error,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: RuleId,
    pub rule_code: String,
    pub severity: Severity,
    pub status: RuleStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RuleOutcome {
    pub fn pass(rule: &ValidationRule, detail: impl Into<String>) -> Self {
        Self::new(rule, RuleStatus::Pass, detail.into(), None)
    }

    pub fn fail(rule: &ValidationRule, detail: impl Into<String>) -> Self {
        Self::new(rule, RuleStatus::Fail, detail.into(), None)
    }

    pub fn error(rule: &ValidationRule, error: &EngineError) -> Self {
        Self::new(rule, RuleStatus::Error, error.to_string(), Some(error.kind()))
    }

    pub fn cancelled(rule: &ValidationRule) -> Self {
        Self::error(rule, &EngineError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }

    fn new(
        rule: &ValidationRule,
        status: RuleStatus,
        detail: String,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self {
            rule_id: rule.id,
            rule_code: rule.code.clone(),
            severity: rule.severity,
            status,
            detail,
            error_kind,
        }
    }
}

/// Aggregate result of one intent evaluation. Outcomes are always in
/// execution order (priority, then rule id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub overall_status: OverallStatus,
    pub outcomes: Vec<RuleOutcome>,
    pub rules_not_run: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Verdict {
    pub fn from_outcomes(outcomes: Vec<RuleOutcome>, rules_not_run: usize) -> Self {
        let overall_status = aggregate_status(&outcomes);
        Self { overall_status, outcomes, rules_not_run, detail: None }
    }

    /// Verdict for a call that could not load its rule set at all.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            overall_status: OverallStatus::Error,
            outcomes: Vec::new(),
            rules_not_run: 0,
            detail: Some(detail.into()),
        }
    }

    /// Verdict for a call cancelled before any rule was loaded.
    pub fn cancelled() -> Self {
        Self {
            overall_status: OverallStatus::Cancelled,
            outcomes: Vec::new(),
            rules_not_run: 0,
            detail: Some(EngineError::Cancelled.to_string()),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.overall_status == OverallStatus::Pass
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.status != RuleStatus::Pass)
    }
}

/// Cancelled beats everything; otherwise Fail dominates Error dominates Pass.
/// An empty outcome list is a vacuous pass.
pub fn aggregate_status(outcomes: &[RuleOutcome]) -> OverallStatus {
    if outcomes.iter().any(RuleOutcome::is_cancelled) {
        return OverallStatus::Cancelled;
    }
    if outcomes.iter().any(|outcome| outcome.status == RuleStatus::Fail) {
        return OverallStatus::Fail;
    }
    if outcomes.iter().any(|outcome| outcome.status == RuleStatus::Error) {
        return OverallStatus::Error;
    }
    OverallStatus::Pass
}
