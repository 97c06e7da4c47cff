use async_trait::async_trait;
use thiserror::Error;

use eivs_core::domain::datasource::{Datasource, DatasourceConfig};
use eivs_core::domain::intent::{Intent, IntentId};
use eivs_core::domain::rule::ValidationRule;
use eivs_core::domain::tenant::{Tenant, TenantId};
use eivs_core::{CatalogError, RuleCatalog};

pub mod catalog;
pub mod memory;

pub use catalog::SqlRuleCatalog;
pub use memory::InMemoryRuleCatalog;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("tenant mismatch: {entity} belongs to `{owner}`, not `{tenant_id}`")]
    TenantMismatch { entity: &'static str, owner: TenantId, tenant_id: TenantId },
}

impl From<RepositoryError> for CatalogError {
    fn from(error: RepositoryError) -> Self {
        CatalogError(error.to_string())
    }
}

/// Write side of the catalog, used by seeding and operator tooling. The engine
/// itself only ever sees [`RuleCatalog`].
#[async_trait]
pub trait CatalogStore: RuleCatalog {
    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError>;

    async fn save_intent(&self, intent: Intent) -> Result<(), RepositoryError>;

    async fn find_intent_by_code(
        &self,
        tenant_id: &TenantId,
        code: &str,
    ) -> Result<Option<Intent>, RepositoryError>;

    async fn save_datasource(&self, datasource: Datasource) -> Result<(), RepositoryError>;

    async fn save_datasource_config(&self, config: DatasourceConfig)
        -> Result<(), RepositoryError>;

    /// The rule's tenant must own the referenced intent.
    async fn save_rule(&self, rule: ValidationRule) -> Result<(), RepositoryError>;

    /// Removes the intent and every rule indexed under it as one unit. Returns
    /// `false` when the tenant owns no such intent.
    async fn delete_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
    ) -> Result<bool, RepositoryError>;

    /// `max(priority) + 1` over the intent's rules in `language_code`, or `1`
    /// when there are none.
    async fn next_execution_order(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
        language_code: &str,
    ) -> Result<i32, RepositoryError>;
}
