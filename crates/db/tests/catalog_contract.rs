use eivs_core::domain::rule::MULTI_LANGUAGE;
use eivs_core::{
    AuthDescriptor, AuthKind, ConditionTemplate, Datasource, DatasourceConfig, DatasourceId,
    DatasourceKind, Intent, IntentId, RuleCatalog, RuleId, RuleType, Severity, Tenant, TenantId,
    ValidationRule,
};
use eivs_db::{
    connect_with_settings, migrations, CatalogStore, InMemoryRuleCatalog, RepositoryError,
    SqlRuleCatalog,
};
use secrecy::{ExposeSecret, SecretString};

async fn sql_catalog() -> SqlRuleCatalog {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    SqlRuleCatalog::new(pool)
}

async fn base<S: CatalogStore + ?Sized>(store: &S) {
    for (tenant, intent, datasource) in [("acme", 1, 1), ("globex", 2, 2)] {
        store
            .save_tenant(Tenant {
                id: TenantId::new(tenant),
                display_name: tenant.to_string(),
                active: true,
            })
            .await
            .expect("tenant");
        store
            .save_intent(Intent {
                id: IntentId(intent),
                tenant_id: TenantId::new(tenant),
                code: "support".to_string(),
                display_name: "Support".to_string(),
                active: true,
            })
            .await
            .expect("intent");
        store
            .save_datasource(Datasource {
                id: DatasourceId(datasource),
                tenant_id: TenantId::new(tenant),
                name: "customers".to_string(),
                kind: DatasourceKind::Relational,
                connection_key: "customer_db".to_string(),
                active: true,
            })
            .await
            .expect("datasource");
    }
}

fn rule(id: i64, tenant: &str, intent: i64, priority: i32) -> ValidationRule {
    ValidationRule {
        id: RuleId(id),
        tenant_id: TenantId::new(tenant),
        intent_id: IntentId(intent),
        datasource_id: DatasourceId(intent),
        code: format!("rule_{id}"),
        name: format!("Rule {id}"),
        language_code: MULTI_LANGUAGE.to_string(),
        target_field: "sender_email".to_string(),
        rule_type: RuleType::Exists,
        condition: Some(ConditionTemplate::new(
            "SELECT 1 FROM customers WHERE email = {{sender_email}}",
            ["sender_email"],
        )),
        priority,
        severity: Severity::Critical,
        active: true,
    }
}

async fn rules_are_ordered_and_tenant_scoped<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    store.save_rule(rule(1, "acme", 1, 30)).await.expect("r1");
    store.save_rule(rule(2, "acme", 1, 10)).await.expect("r2");
    store.save_rule(rule(3, "acme", 1, 20)).await.expect("r3");
    store.save_rule(rule(4, "acme", 1, 10)).await.expect("r4");
    let mut inactive = rule(5, "acme", 1, 1);
    inactive.active = false;
    store.save_rule(inactive).await.expect("r5");

    let acme = store
        .get_active_rules_by_intent(&TenantId::new("acme"), IntentId(1))
        .await
        .expect("acme rules");
    let ids: Vec<i64> = acme.iter().map(|rule| rule.id.0).collect();
    assert_eq!(ids, vec![2, 4, 3, 1]);

    let leaked = store
        .get_active_rules_by_intent(&TenantId::new("globex"), IntentId(1))
        .await
        .expect("globex view");
    assert!(leaked.is_empty());

    let foreign_datasource =
        store.get_datasource(&TenantId::new("globex"), DatasourceId(1)).await.expect("lookup");
    assert!(foreign_datasource.is_none());
}

async fn inactive_intent_hides_its_rules<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    store.save_rule(rule(1, "acme", 1, 10)).await.expect("rule");
    store
        .save_intent(Intent {
            id: IntentId(1),
            tenant_id: TenantId::new("acme"),
            code: "support".to_string(),
            display_name: "Support".to_string(),
            active: false,
        })
        .await
        .expect("deactivate");

    let rules = store
        .get_active_rules_by_intent(&TenantId::new("acme"), IntentId(1))
        .await
        .expect("rules");
    assert!(rules.is_empty());
}

async fn rules_cannot_attach_to_foreign_intents<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;

    let result = store.save_rule(rule(9, "globex", 1, 10)).await;

    assert!(matches!(result, Err(RepositoryError::TenantMismatch { .. })));
}

async fn rule_ids_stay_with_their_tenant<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    store.save_rule(rule(20, "globex", 2, 10)).await.expect("globex rule");

    let takeover = store.save_rule(rule(20, "acme", 1, 10)).await;
    assert!(matches!(takeover, Err(RepositoryError::TenantMismatch { entity: "rule", .. })));

    let globex = store
        .get_active_rules_by_intent(&TenantId::new("globex"), IntentId(2))
        .await
        .expect("globex rules");
    assert_eq!(globex.len(), 1);
    assert_eq!(globex[0].tenant_id, TenantId::new("globex"));
    assert_eq!(globex[0].code, "rule_20");
    let acme = store
        .get_active_rules_by_intent(&TenantId::new("acme"), IntentId(1))
        .await
        .expect("acme rules");
    assert!(acme.is_empty());
}

async fn resaving_a_rule_moves_it_to_the_new_intent<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    store
        .save_intent(Intent {
            id: IntentId(3),
            tenant_id: TenantId::new("acme"),
            code: "billing".to_string(),
            display_name: "Billing".to_string(),
            active: true,
        })
        .await
        .expect("second intent");
    store.save_rule(rule(10, "acme", 1, 10)).await.expect("rule under intent 1");

    let mut moved = rule(10, "acme", 3, 10);
    moved.datasource_id = DatasourceId(1);
    store.save_rule(moved).await.expect("rule under intent 3");

    let acme = TenantId::new("acme");
    let old = store.get_active_rules_by_intent(&acme, IntentId(1)).await.expect("intent 1");
    let new = store.get_active_rules_by_intent(&acme, IntentId(3)).await.expect("intent 3");
    assert!(old.is_empty());
    assert_eq!(new.iter().map(|rule| rule.id.0).collect::<Vec<_>>(), vec![10]);
    assert_eq!(new[0].intent_id, IntentId(3));
}

async fn deleting_an_intent_removes_its_rules<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    store.save_rule(rule(1, "acme", 1, 10)).await.expect("r1");
    store.save_rule(rule(2, "acme", 1, 20)).await.expect("r2");
    store.save_rule(rule(3, "globex", 2, 10)).await.expect("r3");

    let foreign =
        store.delete_intent(&TenantId::new("globex"), IntentId(1)).await.expect("foreign");
    assert!(!foreign, "another tenant must not delete acme's intent");

    let deleted = store.delete_intent(&TenantId::new("acme"), IntentId(1)).await.expect("delete");
    assert!(deleted);

    let acme = store
        .get_active_rules_by_intent(&TenantId::new("acme"), IntentId(1))
        .await
        .expect("acme rules");
    assert!(acme.is_empty());
    let intent = store.find_intent_by_code(&TenantId::new("acme"), "support").await.expect("find");
    assert!(intent.is_none());

    let globex = store
        .get_active_rules_by_intent(&TenantId::new("globex"), IntentId(2))
        .await
        .expect("globex rules");
    assert_eq!(globex.len(), 1);
}

async fn next_execution_order_is_per_intent_and_language<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    let acme = TenantId::new("acme");

    let empty =
        store.next_execution_order(&acme, IntentId(1), MULTI_LANGUAGE).await.expect("empty");
    assert_eq!(empty, 1);

    store.save_rule(rule(1, "acme", 1, 10)).await.expect("r1");
    store.save_rule(rule(2, "acme", 1, 40)).await.expect("r2");
    let mut german = rule(3, "acme", 1, 90);
    german.language_code = "de".to_string();
    store.save_rule(german).await.expect("r3");

    let multi =
        store.next_execution_order(&acme, IntentId(1), MULTI_LANGUAGE).await.expect("multi");
    assert_eq!(multi, 41);
    assert_eq!(store.next_execution_order(&acme, IntentId(1), "de").await.expect("de"), 91);
    assert_eq!(
        store
            .next_execution_order(&TenantId::new("globex"), IntentId(1), MULTI_LANGUAGE)
            .await
            .expect("foreign"),
        1
    );
}

async fn datasource_configs_keep_auth_and_extra<S: CatalogStore + ?Sized>(store: &S) {
    base(store).await;
    let mut extra = serde_json::Map::new();
    extra.insert("api_key_header".to_string(), serde_json::json!("X-Tenant-Key"));
    store
        .save_datasource_config(DatasourceConfig {
            tenant_id: TenantId::new("acme"),
            name: "crm_api".to_string(),
            protocol: "https".to_string(),
            driver_family: "rest".to_string(),
            base_address: "https://crm.acme.test".to_string(),
            auth: AuthDescriptor {
                kind: AuthKind::ApiKey,
                credential: Some(SecretString::from("enc:abc123")),
            },
            extra,
            active: true,
        })
        .await
        .expect("save config");

    let config = store
        .get_datasource_config(&TenantId::new("acme"), "crm_api")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(config.auth.kind, AuthKind::ApiKey);
    assert_eq!(
        config.auth.credential.as_ref().map(|secret| secret.expose_secret().to_string()),
        Some("enc:abc123".to_string())
    );
    assert_eq!(config.extra.get("api_key_header"), Some(&serde_json::json!("X-Tenant-Key")));

    let foreign =
        store.get_datasource_config(&TenantId::new("globex"), "crm_api").await.expect("foreign");
    assert!(foreign.is_none());
}

macro_rules! contract {
    ($name:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn sql() {
                super::$name(&sql_catalog().await).await;
            }

            #[tokio::test]
            async fn memory() {
                super::$name(&InMemoryRuleCatalog::new()).await;
            }
        }
    };
}

contract!(rules_are_ordered_and_tenant_scoped);
contract!(inactive_intent_hides_its_rules);
contract!(rules_cannot_attach_to_foreign_intents);
contract!(rule_ids_stay_with_their_tenant);
contract!(resaving_a_rule_moves_it_to_the_new_intent);
contract!(deleting_an_intent_removes_its_rules);
contract!(next_execution_order_is_per_intent_and_language);
contract!(datasource_configs_keep_auth_and_extra);
