use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use eivs_core::domain::datasource::{Datasource, DatasourceConfig, DatasourceId};
use eivs_core::domain::intent::{Intent, IntentId};
use eivs_core::domain::rule::{RuleId, ValidationRule};
use eivs_core::domain::tenant::{Tenant, TenantId};
use eivs_core::{CatalogError, RuleCatalog};

use super::{CatalogStore, RepositoryError};

#[derive(Default)]
struct CatalogState {
    tenants: HashMap<TenantId, Tenant>,
    intents: HashMap<IntentId, Intent>,
    datasources: HashMap<DatasourceId, Datasource>,
    configs: HashMap<(TenantId, String), DatasourceConfig>,
    /// Rules indexed by owning intent.
    rules: HashMap<IntentId, BTreeMap<RuleId, ValidationRule>>,
}

/// Catalog held behind a single lock, so a write that spans several tables
/// (such as removing an intent with its rules) is observed atomically.
#[derive(Default)]
pub struct InMemoryRuleCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryRuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleCatalog for InMemoryRuleCatalog {
    async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>, CatalogError> {
        let state = self.state.read().await;
        Ok(state.tenants.get(tenant_id).cloned())
    }

    async fn get_active_rules_by_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
    ) -> Result<Vec<ValidationRule>, CatalogError> {
        let state = self.state.read().await;
        let intent_active = state
            .intents
            .get(&intent_id)
            .is_some_and(|intent| &intent.tenant_id == tenant_id && intent.active);
        if !intent_active {
            return Ok(Vec::new());
        }

        let mut rules: Vec<ValidationRule> = state
            .rules
            .get(&intent_id)
            .map(|rules| {
                rules
                    .values()
                    .filter(|rule| &rule.tenant_id == tenant_id && rule.active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rules.sort_by(|left, right| left.execution_order(right));
        Ok(rules)
    }

    async fn get_datasource(
        &self,
        tenant_id: &TenantId,
        datasource_id: DatasourceId,
    ) -> Result<Option<Datasource>, CatalogError> {
        let state = self.state.read().await;
        Ok(state
            .datasources
            .get(&datasource_id)
            .filter(|datasource| &datasource.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_datasource_config(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<DatasourceConfig>, CatalogError> {
        let state = self.state.read().await;
        Ok(state.configs.get(&(tenant_id.clone(), name.to_string())).cloned())
    }
}

#[async_trait]
impl CatalogStore for InMemoryRuleCatalog {
    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    async fn save_intent(&self, intent: Intent) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.intents.get(&intent.id) {
            if existing.tenant_id != intent.tenant_id {
                return Err(RepositoryError::TenantMismatch {
                    entity: "intent",
                    owner: existing.tenant_id.clone(),
                    tenant_id: intent.tenant_id,
                });
            }
        }
        state.intents.insert(intent.id, intent);
        Ok(())
    }

    async fn find_intent_by_code(
        &self,
        tenant_id: &TenantId,
        code: &str,
    ) -> Result<Option<Intent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .intents
            .values()
            .find(|intent| &intent.tenant_id == tenant_id && intent.code == code)
            .cloned())
    }

    async fn save_datasource(&self, datasource: Datasource) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.datasources.get(&datasource.id) {
            if existing.tenant_id != datasource.tenant_id {
                return Err(RepositoryError::TenantMismatch {
                    entity: "datasource",
                    owner: existing.tenant_id.clone(),
                    tenant_id: datasource.tenant_id,
                });
            }
        }
        state.datasources.insert(datasource.id, datasource);
        Ok(())
    }

    async fn save_datasource_config(
        &self,
        config: DatasourceConfig,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.configs.insert((config.tenant_id.clone(), config.name.clone()), config);
        Ok(())
    }

    async fn save_rule(&self, rule: ValidationRule) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let existing_owner = state
            .rules
            .values()
            .find_map(|rules| rules.get(&rule.id))
            .map(|existing| existing.tenant_id.clone());
        if let Some(owner) = existing_owner.filter(|owner| owner != &rule.tenant_id) {
            return Err(RepositoryError::TenantMismatch {
                entity: "rule",
                owner,
                tenant_id: rule.tenant_id,
            });
        }

        match state.intents.get(&rule.intent_id) {
            Some(intent) if intent.tenant_id == rule.tenant_id => {}
            Some(intent) => {
                return Err(RepositoryError::TenantMismatch {
                    entity: "intent",
                    owner: intent.tenant_id.clone(),
                    tenant_id: rule.tenant_id,
                })
            }
            None => {
                return Err(RepositoryError::Decode(format!(
                    "rule {} references unknown intent {}",
                    rule.id, rule.intent_id
                )))
            }
        }

        // A rule moved to another intent leaves its old index.
        for rules in state.rules.values_mut() {
            rules.remove(&rule.id);
        }
        state.rules.entry(rule.intent_id).or_default().insert(rule.id, rule);
        Ok(())
    }

    async fn delete_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let owned =
            state.intents.get(&intent_id).is_some_and(|intent| &intent.tenant_id == tenant_id);
        if !owned {
            return Ok(false);
        }
        state.intents.remove(&intent_id);
        state.rules.remove(&intent_id);
        Ok(true)
    }

    async fn next_execution_order(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
        language_code: &str,
    ) -> Result<i32, RepositoryError> {
        let state = self.state.read().await;
        let max = state.rules.get(&intent_id).and_then(|rules| {
            rules
                .values()
                .filter(|rule| &rule.tenant_id == tenant_id && rule.language_code == language_code)
                .map(|rule| rule.priority)
                .max()
        });
        Ok(max.map_or(1, |max| max.saturating_add(1)))
    }
}
