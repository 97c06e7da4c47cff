use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable classification carried on error outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MissingField,
    MalformedTemplate,
    UnsupportedValue,
    ConnectionFailed,
    Timeout,
    Malformed,
    Unsupported,
    UnsupportedRuleType,
    InvalidRule,
    Cancelled,
    Catalog,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("MissingField: record has no value for `{field}`")]
    MissingField { field: String },
    #[error("MalformedTemplate: {0}")]
    Malformed(String),
    #[error("UnsupportedValue: field `{field}` is not a scalar")]
    UnsupportedValue { field: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("ConnectionFailed: {0}")]
    ConnectionFailed(String),
    #[error("Timeout: no response within {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("Malformed: {0}")]
    Malformed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Transient failures an opt-in retry policy may repeat.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionFailed(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("catalog failure: {0}")]
pub struct CatalogError(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Absent, inactive, or owned by another tenant.
    #[error("NotFound: {entity} `{key}`")]
    NotFound { entity: &'static str, key: String },
    #[error("InvalidRule: {0}")]
    InvalidReference(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("UnsupportedRuleType: no custom rule registered for tag `{0}`")]
    UnsupportedRuleType(String),
    #[error("InvalidRule: {0}")]
    InvalidRule(String),
    #[error("Cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolve(ResolveError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Resolve(ResolveError::InvalidReference(_)) => ErrorKind::InvalidRule,
            Self::Resolve(ResolveError::Catalog(_)) => ErrorKind::Catalog,
            Self::Render(RenderError::MissingField { .. }) => ErrorKind::MissingField,
            Self::Render(RenderError::Malformed(_)) => ErrorKind::MalformedTemplate,
            Self::Render(RenderError::UnsupportedValue { .. }) => ErrorKind::UnsupportedValue,
            Self::Adapter(AdapterError::ConnectionFailed(_)) => ErrorKind::ConnectionFailed,
            Self::Adapter(AdapterError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Adapter(AdapterError::Malformed(_)) => ErrorKind::Malformed,
            Self::Adapter(AdapterError::Unsupported(_)) => ErrorKind::Unsupported,
            Self::UnsupportedRuleType(_) => ErrorKind::UnsupportedRuleType,
            Self::InvalidRule(_) => ErrorKind::InvalidRule,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
