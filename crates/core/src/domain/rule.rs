use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::datasource::DatasourceId;
use crate::domain::intent::IntentId;
use crate::domain::tenant::TenantId;

pub const MULTI_LANGUAGE: &str = "multi";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Critical,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }
}

/// Where an `equals` rule takes its expected value from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedValue {
    Literal(String),
    Field(String),
}

/// Closed set of rule semantics. `Custom` is the only extension point and is
/// dispatched by tag at evaluation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleType {
    Exists,
    Equals {
        column: String,
        expected: ExpectedValue,
        #[serde(default)]
        case_insensitive: bool,
    },
    Regex {
        pattern: String,
    },
    Custom {
        tag: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl RuleType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Equals { .. } => "equals",
            Self::Regex { .. } => "regex",
            Self::Custom { .. } => "custom",
        }
    }
}

/// Statement skeleton with `{{field}}` tokens plus the declared list of record
/// fields those tokens may reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTemplate {
    pub statement: String,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

impl ConditionTemplate {
    pub fn new<I, S>(statement: impl Into<String>, placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statement: statement.into(),
            placeholders: placeholders.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: RuleId,
    pub tenant_id: TenantId,
    pub intent_id: IntentId,
    pub datasource_id: DatasourceId,
    pub code: String,
    pub name: String,
    pub language_code: String,
    pub target_field: String,
    pub rule_type: RuleType,
    pub condition: Option<ConditionTemplate>,
    pub priority: i32,
    pub severity: Severity,
    pub active: bool,
}

impl ValidationRule {
    /// Whether evaluation goes through the datasource. `regex` only does so
    /// when a condition template supplies datasource-backed context.
    pub fn requires_lookup(&self) -> bool {
        match self.rule_type {
            RuleType::Exists | RuleType::Equals { .. } => true,
            RuleType::Regex { .. } | RuleType::Custom { .. } => self.condition.is_some(),
        }
    }

    pub fn applies_to_language(&self, language: Option<&str>) -> bool {
        match language {
            None => true,
            Some(language) => {
                self.language_code.eq_ignore_ascii_case(MULTI_LANGUAGE)
                    || self.language_code.eq_ignore_ascii_case(language.trim())
            }
        }
    }

    /// Evaluation order: priority ascending, then rule id ascending.
    pub fn execution_order(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| self.id.cmp(&other.id))
    }
}
