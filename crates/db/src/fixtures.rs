//! Deterministic demo catalog: tenant `acme` with a `support` intent whose
//! rules look senders up in a `customer_db` SQLite database, plus a second
//! tenant `globex` used to exercise isolation.

use std::str::FromStr;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};

use eivs_core::domain::datasource::{
    AuthDescriptor, Datasource, DatasourceConfig, DatasourceId, DatasourceKind,
};
use eivs_core::domain::intent::{Intent, IntentId};
use eivs_core::domain::rule::{
    ConditionTemplate, ExpectedValue, RuleId, RuleType, Severity, ValidationRule, MULTI_LANGUAGE,
};
use eivs_core::domain::tenant::{Tenant, TenantId};

use crate::repositories::{CatalogStore, RepositoryError};

pub const DEMO_TENANT: &str = "acme";
pub const OTHER_TENANT: &str = "globex";
pub const SUPPORT_INTENT: IntentId = IntentId(1);
pub const OTHER_SUPPORT_INTENT: IntentId = IntentId(2);
pub const CUSTOMER_DB: &str = "customer_db";

const SENDER_LOOKUP: &str = "SELECT email, status FROM customers WHERE email = {{sender_email}}";

const DEMO_CUSTOMERS: &[(&str, &str)] =
    &[("ops@acme.test", "active"), ("billing@acme.test", "suspended")];

#[derive(Clone, Debug)]
pub struct SeedOptions {
    /// Base address stored in the seeded `customer_db` configs.
    pub customer_db_address: String,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self { customer_db_address: "sqlite://acme_customers.db".to_string() }
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub tenants: Vec<String>,
    pub intents: usize,
    pub rules: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

pub struct DemoSeed;

impl DemoSeed {
    /// Writes the demo catalog. Every write is an upsert, so loading twice
    /// leaves the same state.
    pub async fn load<S>(store: &S, options: &SeedOptions) -> Result<SeedResult, RepositoryError>
    where
        S: CatalogStore + ?Sized,
    {
        let tenants = [tenant(DEMO_TENANT, "Acme Corp"), tenant(OTHER_TENANT, "Globex Industries")];
        let intents = [
            intent(SUPPORT_INTENT, DEMO_TENANT, "support", "Support request"),
            intent(OTHER_SUPPORT_INTENT, OTHER_TENANT, "support", "Support request"),
        ];
        let rules = demo_rules();

        for tenant in &tenants {
            store.save_tenant(tenant.clone()).await?;
        }
        for intent in &intents {
            store.save_intent(intent.clone()).await?;
        }
        for (id, owner) in [(1, DEMO_TENANT), (2, OTHER_TENANT)] {
            store.save_datasource(customer_datasource(id, owner)).await?;
            store
                .save_datasource_config(customer_config(owner, &options.customer_db_address))
                .await?;
        }
        for rule in &rules {
            store.save_rule(rule.clone()).await?;
        }

        Ok(SeedResult {
            tenants: tenants.iter().map(|tenant| tenant.id.to_string()).collect(),
            intents: intents.len(),
            rules: rules.len(),
        })
    }

    /// Checks the demo catalog through the read ports the engine uses.
    pub async fn verify<S>(store: &S) -> Result<VerificationResult, RepositoryError>
    where
        S: CatalogStore + ?Sized,
    {
        let acme = TenantId::new(DEMO_TENANT);
        let globex = TenantId::new(OTHER_TENANT);
        let mut checks = Vec::new();

        let tenant = store.get_tenant(&acme).await?;
        checks.push(("tenant-acme", tenant.is_some_and(|tenant| tenant.active)));

        let acme_rules =
            store.get_active_rules_by_intent(&acme, SUPPORT_INTENT).await?;
        checks.push(("acme-support-rules", acme_rules.len() == 4));
        let ordered = acme_rules.iter().map(|rule| rule.id.0).collect::<Vec<_>>();
        checks.push(("acme-support-order", ordered == [3, 1, 2, 4]));

        let leaked = store
            .get_active_rules_by_intent(&globex, SUPPORT_INTENT)
            .await?;
        checks.push(("globex-cannot-see-acme-rules", leaked.is_empty()));

        let config = store.get_datasource_config(&acme, CUSTOMER_DB).await?;
        checks.push(("acme-customer-db-config", config.is_some()));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Creates the SQLite customer database the seeded configs point at.
    pub async fn create_customer_database(address: &str) -> Result<usize, RepositoryError> {
        let mut conn =
            SqliteConnectOptions::from_str(address)?.create_if_missing(true).connect().await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS customers (
                 email TEXT PRIMARY KEY NOT NULL,
                 status TEXT NOT NULL
             )",
        )
        .execute(&mut conn)
        .await?;
        for (email, status) in DEMO_CUSTOMERS {
            sqlx::query(
                "INSERT INTO customers (email, status) VALUES (?, ?)
                 ON CONFLICT(email) DO UPDATE SET status = excluded.status",
            )
            .bind(*email)
            .bind(*status)
            .execute(&mut conn)
            .await?;
        }
        conn.close().await?;

        Ok(DEMO_CUSTOMERS.len())
    }
}

fn tenant(id: &str, display_name: &str) -> Tenant {
    Tenant { id: TenantId::new(id), display_name: display_name.to_string(), active: true }
}

fn intent(id: IntentId, owner: &str, code: &str, display_name: &str) -> Intent {
    Intent {
        id,
        tenant_id: TenantId::new(owner),
        code: code.to_string(),
        display_name: display_name.to_string(),
        active: true,
    }
}

fn customer_datasource(id: i64, owner: &str) -> Datasource {
    Datasource {
        id: DatasourceId(id),
        tenant_id: TenantId::new(owner),
        name: "customers".to_string(),
        kind: DatasourceKind::Relational,
        connection_key: CUSTOMER_DB.to_string(),
        active: true,
    }
}

fn customer_config(owner: &str, address: &str) -> DatasourceConfig {
    DatasourceConfig {
        tenant_id: TenantId::new(owner),
        name: CUSTOMER_DB.to_string(),
        protocol: "sqlite".to_string(),
        driver_family: "sqlite".to_string(),
        base_address: address.to_string(),
        auth: AuthDescriptor::none(),
        extra: serde_json::Map::new(),
        active: true,
    }
}

fn demo_rules() -> Vec<ValidationRule> {
    let sender_lookup = || Some(ConditionTemplate::new(SENDER_LOOKUP, ["sender_email"]));
    let rule = |id: i64, owner: &str, intent_id: IntentId, code: &str, name: &str| ValidationRule {
        id: RuleId(id),
        tenant_id: TenantId::new(owner),
        intent_id,
        datasource_id: DatasourceId(if owner == DEMO_TENANT { 1 } else { 2 }),
        code: code.to_string(),
        name: name.to_string(),
        language_code: MULTI_LANGUAGE.to_string(),
        target_field: "sender_email".to_string(),
        rule_type: RuleType::Exists,
        condition: sender_lookup(),
        priority: 10,
        severity: Severity::Critical,
        active: true,
    };

    vec![
        rule(1, DEMO_TENANT, SUPPORT_INTENT, "known_sender", "Sender is a known customer"),
        ValidationRule {
            rule_type: RuleType::Equals {
                column: "status".to_string(),
                expected: ExpectedValue::Literal("active".to_string()),
                case_insensitive: true,
            },
            priority: 20,
            ..rule(2, DEMO_TENANT, SUPPORT_INTENT, "account_active", "Customer account is active")
        },
        ValidationRule {
            rule_type: RuleType::Regex {
                pattern: r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$".to_string(),
            },
            condition: None,
            priority: 5,
            severity: Severity::Warning,
            ..rule(3, DEMO_TENANT, SUPPORT_INTENT, "sender_format", "Sender address is well formed")
        },
        ValidationRule {
            rule_type: RuleType::Regex { pattern: r"(?i)@acme\.test$".to_string() },
            condition: None,
            language_code: "de".to_string(),
            priority: 30,
            severity: Severity::Warning,
            ..rule(4, DEMO_TENANT, SUPPORT_INTENT, "corporate_domain", "Corporate sender domain")
        },
        rule(5, OTHER_TENANT, OTHER_SUPPORT_INTENT, "known_sender", "Sender is a known customer"),
    ]
}
