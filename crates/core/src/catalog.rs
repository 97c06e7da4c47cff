//! Read-only entity ports the engine depends on. Implementations are supplied by
//! the persistence layer; every method takes the caller's tenant identity and
//! must conjoin it into its lookup predicate.

use async_trait::async_trait;

use crate::domain::datasource::{Datasource, DatasourceConfig, DatasourceId};
use crate::domain::intent::IntentId;
use crate::domain::rule::ValidationRule;
use crate::domain::tenant::{Tenant, TenantId};
use crate::errors::CatalogError;

#[async_trait]
pub trait RuleCatalog: Send + Sync {
    async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>, CatalogError>;

    /// Active rules of an active intent, `tenant = T AND intent = X`, ordered by
    /// priority then rule id.
    async fn get_active_rules_by_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
    ) -> Result<Vec<ValidationRule>, CatalogError>;

    async fn get_datasource(
        &self,
        tenant_id: &TenantId,
        datasource_id: DatasourceId,
    ) -> Result<Option<Datasource>, CatalogError>;

    async fn get_datasource_config(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<DatasourceConfig>, CatalogError>;
}
