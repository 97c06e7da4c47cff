pub mod adapter;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod evaluator;
pub mod isolation;
pub mod orchestrator;
pub mod renderer;
pub mod resolver;

pub use adapter::{AdapterSet, DatasourceAdapter, ResultSet, RetryPolicy, Row};
pub use catalog::RuleCatalog;
pub use domain::datasource::{
    AuthDescriptor, AuthKind, Datasource, DatasourceConfig, DatasourceId, DatasourceKind,
};
pub use domain::intent::{Intent, IntentId};
pub use domain::record::CandidateRecord;
pub use domain::rule::{
    ConditionTemplate, ExpectedValue, RuleId, RuleType, Severity, ValidationRule,
};
pub use domain::tenant::{Tenant, TenantId};
pub use domain::verdict::{EvaluationPolicy, OverallStatus, RuleOutcome, RuleStatus, Verdict};
pub use errors::{
    AdapterError, CatalogError, EngineError, ErrorKind, RenderError, ResolveError,
};
pub use evaluator::{CustomRule, CustomRuleContext, CustomRuleRegistry, RuleCheck, RuleEvaluator};
pub use orchestrator::{IntentValidator, ProbeReport, ValidationRequest};
pub use renderer::{render, ConcreteQuery, ParamValue, QueryParam, QuerySegment};
pub use resolver::{
    ConnectionDescriptor, ConnectionResolver, CredentialDecryptor, LookupTarget,
    PassthroughDecryptor,
};
