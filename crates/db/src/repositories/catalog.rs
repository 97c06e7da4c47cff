use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::Row;
use tracing::debug;

use eivs_core::domain::datasource::{
    AuthDescriptor, AuthKind, Datasource, DatasourceConfig, DatasourceId, DatasourceKind,
};
use eivs_core::domain::intent::{Intent, IntentId};
use eivs_core::domain::rule::{ConditionTemplate, RuleId, RuleType, Severity, ValidationRule};
use eivs_core::domain::tenant::{Tenant, TenantId};
use eivs_core::{CatalogError, RuleCatalog};

use super::{CatalogStore, RepositoryError};
use crate::DbPool;

const RULE_COLUMNS: &str = "r.id, r.tenant_id, r.intent_id, r.datasource_id, r.rule_code,
    r.rule_name, r.language_code, r.target_field, r.rule_type_json, r.condition_json,
    r.priority, r.severity, r.active";

/// SQLite-backed catalog. Every predicate is conjoined with the caller's
/// tenant id.
#[derive(Clone)]
pub struct SqlRuleCatalog {
    pool: DbPool,
}

impl SqlRuleCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_tenant(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let display_name: String = decode(row.try_get("display_name"))?;
    let active: bool = decode(row.try_get("active"))?;

    Ok(Tenant { id: TenantId(id), display_name, active })
}

fn row_to_intent(row: &sqlx::sqlite::SqliteRow) -> Result<Intent, RepositoryError> {
    let id: i64 = decode(row.try_get("id"))?;
    let tenant_id: String = decode(row.try_get("tenant_id"))?;
    let code: String = decode(row.try_get("code"))?;
    let display_name: String = decode(row.try_get("display_name"))?;
    let active: bool = decode(row.try_get("active"))?;

    Ok(Intent { id: IntentId(id), tenant_id: TenantId(tenant_id), code, display_name, active })
}

fn row_to_datasource(row: &sqlx::sqlite::SqliteRow) -> Result<Datasource, RepositoryError> {
    let id: i64 = decode(row.try_get("id"))?;
    let tenant_id: String = decode(row.try_get("tenant_id"))?;
    let name: String = decode(row.try_get("name"))?;
    let kind_str: String = decode(row.try_get("kind"))?;
    let connection_key: String = decode(row.try_get("connection_key"))?;
    let active: bool = decode(row.try_get("active"))?;

    let kind = DatasourceKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown datasource kind `{kind_str}`")))?;

    Ok(Datasource {
        id: DatasourceId(id),
        tenant_id: TenantId(tenant_id),
        name,
        kind,
        connection_key,
        active,
    })
}

fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<DatasourceConfig, RepositoryError> {
    let tenant_id: String = decode(row.try_get("tenant_id"))?;
    let name: String = decode(row.try_get("name"))?;
    let protocol: String = decode(row.try_get("protocol"))?;
    let driver_family: String = decode(row.try_get("driver_family"))?;
    let base_address: String = decode(row.try_get("base_address"))?;
    let auth_kind_str: String = decode(row.try_get("auth_kind"))?;
    let credential: Option<String> = decode(row.try_get("credential"))?;
    let extra_json: String = decode(row.try_get("extra_json"))?;
    let active: bool = decode(row.try_get("active"))?;

    let kind = AuthKind::parse(&auth_kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown auth kind `{auth_kind_str}`")))?;
    let extra = match serde_json::from_str(&extra_json)
        .map_err(|e| RepositoryError::Decode(format!("extra_json for `{name}`: {e}")))?
    {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        _ => {
            return Err(RepositoryError::Decode(format!(
                "extra_json for `{name}` must be a JSON object"
            )))
        }
    };

    Ok(DatasourceConfig {
        tenant_id: TenantId(tenant_id),
        name,
        protocol,
        driver_family,
        base_address,
        auth: AuthDescriptor { kind, credential: credential.map(SecretString::from) },
        extra,
        active,
    })
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ValidationRule, RepositoryError> {
    let id: i64 = decode(row.try_get("id"))?;
    let tenant_id: String = decode(row.try_get("tenant_id"))?;
    let intent_id: i64 = decode(row.try_get("intent_id"))?;
    let datasource_id: i64 = decode(row.try_get("datasource_id"))?;
    let code: String = decode(row.try_get("rule_code"))?;
    let name: String = decode(row.try_get("rule_name"))?;
    let language_code: String = decode(row.try_get("language_code"))?;
    let target_field: String = decode(row.try_get("target_field"))?;
    let rule_type_json: String = decode(row.try_get("rule_type_json"))?;
    let condition_json: Option<String> = decode(row.try_get("condition_json"))?;
    let priority: i32 = decode(row.try_get("priority"))?;
    let severity_str: String = decode(row.try_get("severity"))?;
    let active: bool = decode(row.try_get("active"))?;

    let rule_type: RuleType = serde_json::from_str(&rule_type_json)
        .map_err(|e| RepositoryError::Decode(format!("rule {id} rule_type_json: {e}")))?;
    let condition: Option<ConditionTemplate> = condition_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("rule {id} condition_json: {e}")))?;
    let severity = Severity::parse(&severity_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown severity `{severity_str}`")))?;

    Ok(ValidationRule {
        id: RuleId(id),
        tenant_id: TenantId(tenant_id),
        intent_id: IntentId(intent_id),
        datasource_id: DatasourceId(datasource_id),
        code,
        name,
        language_code,
        target_field,
        rule_type,
        condition,
        priority,
        severity,
        active,
    })
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("{what}: {e}")))
}

#[async_trait]
impl RuleCatalog for SqlRuleCatalog {
    async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>, CatalogError> {
        let row = sqlx::query("SELECT id, display_name, active FROM tenants WHERE id = ?")
            .bind(tenant_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_tenant).transpose()?)
    }

    async fn get_active_rules_by_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
    ) -> Result<Vec<ValidationRule>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS}
             FROM validation_rules r
             JOIN intents i ON i.id = r.intent_id AND i.tenant_id = r.tenant_id
             WHERE r.tenant_id = ?1 AND r.intent_id = ?2 AND r.active = 1 AND i.active = 1
             ORDER BY r.priority ASC, r.id ASC"
        ))
        .bind(tenant_id.as_str())
        .bind(intent_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let rules = rows.iter().map(row_to_rule).collect::<Result<Vec<_>, _>>()?;
        debug!(
            event_name = "db.catalog.rules_loaded",
            tenant_id = %tenant_id,
            intent_id = intent_id.0,
            rule_count = rules.len(),
            "loaded active rules"
        );
        Ok(rules)
    }

    async fn get_datasource(
        &self,
        tenant_id: &TenantId,
        datasource_id: DatasourceId,
    ) -> Result<Option<Datasource>, CatalogError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, kind, connection_key, active
             FROM datasources WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id.as_str())
        .bind(datasource_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_datasource).transpose()?)
    }

    async fn get_datasource_config(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<DatasourceConfig>, CatalogError> {
        let row = sqlx::query(
            "SELECT tenant_id, name, protocol, driver_family, base_address, auth_kind,
                    credential, extra_json, active
             FROM datasource_configs WHERE tenant_id = ? AND name = ?",
        )
        .bind(tenant_id.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_config).transpose()?)
    }
}

#[async_trait]
impl CatalogStore for SqlRuleCatalog {
    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenants (id, display_name, active) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 active = excluded.active",
        )
        .bind(tenant.id.as_str())
        .bind(&tenant.display_name)
        .bind(tenant.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_intent(&self, intent: Intent) -> Result<(), RepositoryError> {
        let owner: Option<String> = sqlx::query_scalar("SELECT tenant_id FROM intents WHERE id = ?")
            .bind(intent.id.0)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(owner) = owner.filter(|owner| owner != intent.tenant_id.as_str()) {
            return Err(RepositoryError::TenantMismatch {
                entity: "intent",
                owner: TenantId(owner),
                tenant_id: intent.tenant_id,
            });
        }

        sqlx::query(
            "INSERT INTO intents (id, tenant_id, code, display_name, active) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 display_name = excluded.display_name,
                 active = excluded.active",
        )
        .bind(intent.id.0)
        .bind(intent.tenant_id.as_str())
        .bind(&intent.code)
        .bind(&intent.display_name)
        .bind(intent.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_intent_by_code(
        &self,
        tenant_id: &TenantId,
        code: &str,
    ) -> Result<Option<Intent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, code, display_name, active
             FROM intents WHERE tenant_id = ? AND code = ?",
        )
        .bind(tenant_id.as_str())
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_intent).transpose()
    }

    async fn save_datasource(&self, datasource: Datasource) -> Result<(), RepositoryError> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT tenant_id FROM datasources WHERE id = ?")
                .bind(datasource.id.0)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(owner) = owner.filter(|owner| owner != datasource.tenant_id.as_str()) {
            return Err(RepositoryError::TenantMismatch {
                entity: "datasource",
                owner: TenantId(owner),
                tenant_id: datasource.tenant_id,
            });
        }

        sqlx::query(
            "INSERT INTO datasources (id, tenant_id, name, kind, connection_key, active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 kind = excluded.kind,
                 connection_key = excluded.connection_key,
                 active = excluded.active",
        )
        .bind(datasource.id.0)
        .bind(datasource.tenant_id.as_str())
        .bind(&datasource.name)
        .bind(datasource.kind.as_str())
        .bind(&datasource.connection_key)
        .bind(datasource.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_datasource_config(
        &self,
        config: DatasourceConfig,
    ) -> Result<(), RepositoryError> {
        let extra_json = encode(&config.extra, "extra_json")?;
        let credential = config.auth.credential.as_ref().map(|secret| secret.expose_secret());

        sqlx::query(
            "INSERT INTO datasource_configs (
                 tenant_id, name, protocol, driver_family,
                 base_address, auth_kind, credential, extra_json, active
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, name) DO UPDATE SET
                 protocol = excluded.protocol,
                 driver_family = excluded.driver_family,
                 base_address = excluded.base_address,
                 auth_kind = excluded.auth_kind,
                 credential = excluded.credential,
                 extra_json = excluded.extra_json,
                 active = excluded.active",
        )
        .bind(config.tenant_id.as_str())
        .bind(&config.name)
        .bind(&config.protocol)
        .bind(&config.driver_family)
        .bind(&config.base_address)
        .bind(config.auth.kind.as_str())
        .bind(credential)
        .bind(extra_json)
        .bind(config.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_rule(&self, rule: ValidationRule) -> Result<(), RepositoryError> {
        let rule_owner: Option<String> =
            sqlx::query_scalar("SELECT tenant_id FROM validation_rules WHERE id = ?")
                .bind(rule.id.0)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(owner) = rule_owner.filter(|owner| owner != rule.tenant_id.as_str()) {
            return Err(RepositoryError::TenantMismatch {
                entity: "rule",
                owner: TenantId(owner),
                tenant_id: rule.tenant_id,
            });
        }

        let intent_owner: Option<String> =
            sqlx::query_scalar("SELECT tenant_id FROM intents WHERE id = ?")
                .bind(rule.intent_id.0)
                .fetch_optional(&self.pool)
                .await?;
        match intent_owner {
            Some(owner) if owner == rule.tenant_id.as_str() => {}
            Some(owner) => {
                return Err(RepositoryError::TenantMismatch {
                    entity: "intent",
                    owner: TenantId(owner),
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

        let rule_type_json = encode(&rule.rule_type, "rule_type_json")?;
        let condition_json =
            rule.condition.as_ref().map(|c| encode(c, "condition_json")).transpose()?;

        sqlx::query(
            "INSERT INTO validation_rules (id, tenant_id, intent_id, datasource_id, rule_code,
                                           rule_name, language_code, target_field, rule_type_json,
                                           condition_json, priority, severity, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 intent_id = excluded.intent_id,
                 datasource_id = excluded.datasource_id,
                 rule_code = excluded.rule_code,
                 rule_name = excluded.rule_name,
                 language_code = excluded.language_code,
                 target_field = excluded.target_field,
                 rule_type_json = excluded.rule_type_json,
                 condition_json = excluded.condition_json,
                 priority = excluded.priority,
                 severity = excluded.severity,
                 active = excluded.active",
        )
        .bind(rule.id.0)
        .bind(rule.tenant_id.as_str())
        .bind(rule.intent_id.0)
        .bind(rule.datasource_id.0)
        .bind(&rule.code)
        .bind(&rule.name)
        .bind(&rule.language_code)
        .bind(&rule.target_field)
        .bind(rule_type_json)
        .bind(condition_json)
        .bind(rule.priority)
        .bind(rule.severity.as_str())
        .bind(rule.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_intent(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let rules_removed =
            sqlx::query("DELETE FROM validation_rules WHERE tenant_id = ? AND intent_id = ?")
                .bind(tenant_id.as_str())
                .bind(intent_id.0)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        let intents_removed = sqlx::query("DELETE FROM intents WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.as_str())
            .bind(intent_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        debug!(
            event_name = "db.catalog.intent_deleted",
            tenant_id = %tenant_id,
            intent_id = intent_id.0,
            rules_removed,
            "intent removed with its rules"
        );
        Ok(intents_removed > 0)
    }

    async fn next_execution_order(
        &self,
        tenant_id: &TenantId,
        intent_id: IntentId,
        language_code: &str,
    ) -> Result<i32, RepositoryError> {
        let max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(priority) FROM validation_rules
             WHERE tenant_id = ? AND intent_id = ? AND language_code = ?",
        )
        .bind(tenant_id.as_str())
        .bind(intent_id.0)
        .bind(language_code)
        .fetch_one(&self.pool)
        .await?;

        Ok(max.map_or(1, |max| max.saturating_add(1)))
    }
}
