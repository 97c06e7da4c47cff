//! Tenant isolation guard.
//!
//! [`TenantView`] pins one tenant identity to a catalog so that no lookup can be
//! issued without it, and re-checks the tenant of everything the catalog hands
//! back. Anything owned by another tenant is dropped and reported as absent.

use tracing::warn;

use crate::catalog::RuleCatalog;
use crate::domain::datasource::{Datasource, DatasourceConfig, DatasourceId};
use crate::domain::intent::{Intent, IntentId};
use crate::domain::rule::ValidationRule;
use crate::domain::tenant::{Tenant, TenantId};
use crate::errors::{CatalogError, ResolveError};

pub trait TenantScoped {
    fn tenant_id(&self) -> &TenantId;
}

impl TenantScoped for Intent {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

impl TenantScoped for Datasource {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

impl TenantScoped for DatasourceConfig {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

impl TenantScoped for ValidationRule {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

pub fn admit<T: TenantScoped>(tenant_id: &TenantId, entity: Option<T>) -> Option<T> {
    match entity {
        Some(entity) if entity.tenant_id() == tenant_id => Some(entity),
        Some(entity) => {
            warn!(
                event_name = "engine.isolation.cross_tenant_entity_dropped",
                tenant_id = %tenant_id,
                owner_tenant_id = %entity.tenant_id(),
                "catalog returned an entity owned by another tenant"
            );
            None
        }
        None => None,
    }
}

pub fn admit_all<T: TenantScoped>(tenant_id: &TenantId, entities: Vec<T>) -> Vec<T> {
    entities.into_iter().filter_map(|entity| admit(tenant_id, Some(entity))).collect()
}

/// Catalog access bound to a single tenant for the lifetime of one call.
pub struct TenantView<'a, C: ?Sized> {
    tenant_id: TenantId,
    catalog: &'a C,
}

impl<'a, C> TenantView<'a, C>
where
    C: RuleCatalog + ?Sized,
{
    pub fn new(tenant_id: TenantId, catalog: &'a C) -> Self {
        Self { tenant_id, catalog }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub async fn active_tenant(&self) -> Result<Tenant, ResolveError> {
        match self.catalog.get_tenant(&self.tenant_id).await? {
            Some(tenant) if tenant.id == self.tenant_id && tenant.active => Ok(tenant),
            _ => Err(ResolveError::NotFound { entity: "tenant", key: self.tenant_id.to_string() }),
        }
    }

    pub async fn active_rules(
        &self,
        intent_id: IntentId,
    ) -> Result<Vec<ValidationRule>, CatalogError> {
        let rules = self.catalog.get_active_rules_by_intent(&self.tenant_id, intent_id).await?;
        Ok(admit_all(&self.tenant_id, rules)
            .into_iter()
            .filter(|rule| rule.active && rule.intent_id == intent_id)
            .collect())
    }

    pub async fn datasource(
        &self,
        datasource_id: DatasourceId,
    ) -> Result<Datasource, ResolveError> {
        let found = self.catalog.get_datasource(&self.tenant_id, datasource_id).await?;
        admit(&self.tenant_id, found).filter(|datasource| datasource.active).ok_or_else(|| {
            ResolveError::NotFound { entity: "datasource", key: datasource_id.to_string() }
        })
    }

    pub async fn datasource_config(&self, name: &str) -> Result<DatasourceConfig, ResolveError> {
        let found = self.catalog.get_datasource_config(&self.tenant_id, name).await?;
        admit(&self.tenant_id, found).filter(|config| config.active).ok_or_else(|| {
            ResolveError::NotFound { entity: "datasource_config", key: name.to_string() }
        })
    }
}
