//! Connection resolution: DatasourceConfig name → concrete connection descriptor.

use std::collections::HashMap;

use secrecy::SecretString;
use tracing::debug;

use crate::catalog::RuleCatalog;
use crate::domain::datasource::{AuthKind, DatasourceConfig, DatasourceKind};
use crate::domain::rule::ValidationRule;
use crate::domain::tenant::TenantId;
use crate::errors::ResolveError;
use crate::isolation::TenantView;

/// Everything an adapter needs to reach a datasource. Holds decrypted
/// credential material, so it only lives as long as the call that resolved it.
#[derive(Clone, Debug)]
pub struct ConnectionDescriptor {
    pub tenant_id: TenantId,
    pub config_name: String,
    pub protocol: String,
    pub driver_family: String,
    pub base_address: String,
    pub auth_kind: AuthKind,
    pub credential: Option<SecretString>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConnectionDescriptor {
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Capability for turning a stored credential payload into usable material.
/// The storage scheme itself is owned elsewhere.
pub trait CredentialDecryptor: Send + Sync {
    fn decrypt(
        &self,
        tenant_id: &TenantId,
        config_name: &str,
        payload: &SecretString,
    ) -> Result<SecretString, String>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughDecryptor;

impl CredentialDecryptor for PassthroughDecryptor {
    fn decrypt(
        &self,
        _tenant_id: &TenantId,
        _config_name: &str,
        payload: &SecretString,
    ) -> Result<SecretString, String> {
        Ok(payload.clone())
    }
}

pub struct ConnectionResolver<'v, 'c, C: ?Sized> {
    view: &'v TenantView<'c, C>,
    decryptor: &'v dyn CredentialDecryptor,
}

impl<'v, 'c, C> ConnectionResolver<'v, 'c, C>
where
    C: RuleCatalog + ?Sized,
{
    pub fn new(view: &'v TenantView<'c, C>, decryptor: &'v dyn CredentialDecryptor) -> Self {
        Self { view, decryptor }
    }

    pub async fn resolve(&self, config_name: &str) -> Result<ConnectionDescriptor, ResolveError> {
        let config_name = config_name.trim();
        if config_name.is_empty() {
            return Err(ResolveError::InvalidReference(
                "datasource has an empty connection key".to_string(),
            ));
        }

        self.view.active_tenant().await?;
        let config = self.view.datasource_config(config_name).await?;
        self.describe(config)
    }

    fn describe(&self, config: DatasourceConfig) -> Result<ConnectionDescriptor, ResolveError> {
        let credential = match &config.auth.credential {
            Some(payload) => Some(
                self.decryptor.decrypt(&config.tenant_id, &config.name, payload).map_err(
                    |reason| {
                        ResolveError::InvalidReference(format!(
                            "credential for `{}` could not be decrypted: {reason}",
                            config.name
                        ))
                    },
                )?,
            ),
            None => None,
        };

        Ok(ConnectionDescriptor {
            tenant_id: config.tenant_id,
            config_name: config.name,
            protocol: config.protocol,
            driver_family: config.driver_family,
            base_address: config.base_address,
            auth_kind: config.auth.kind,
            credential,
            extra: config.extra,
        })
    }
}

/// A rule's resolved datasource kind and connection.
#[derive(Clone, Debug)]
pub struct LookupTarget {
    pub kind: DatasourceKind,
    pub connection: ConnectionDescriptor,
}

/// Per-call resolution cache keyed by config name. Bound to one tenant view and
/// dropped with the call, so nothing outlives it or crosses tenants.
pub struct ResolutionScope<'v, 'c, C: ?Sized> {
    resolver: ConnectionResolver<'v, 'c, C>,
    connections: HashMap<String, ConnectionDescriptor>,
}

impl<'v, 'c, C> ResolutionScope<'v, 'c, C>
where
    C: RuleCatalog + ?Sized,
{
    pub fn new(view: &'v TenantView<'c, C>, decryptor: &'v dyn CredentialDecryptor) -> Self {
        Self { resolver: ConnectionResolver::new(view, decryptor), connections: HashMap::new() }
    }

    pub async fn target_for(
        &mut self,
        rule: &ValidationRule,
    ) -> Result<LookupTarget, ResolveError> {
        let datasource = self.resolver.view.datasource(rule.datasource_id).await?;
        let key = datasource.connection_key.trim().to_string();

        if let Some(connection) = self.connections.get(&key) {
            return Ok(LookupTarget { kind: datasource.kind, connection: connection.clone() });
        }

        let connection = self.resolver.resolve(&key).await?;
        debug!(
            event_name = "engine.resolver.connection_resolved",
            tenant_id = %connection.tenant_id,
            config_name = %connection.config_name,
            driver_family = %connection.driver_family,
            "resolved datasource connection"
        );
        self.connections.insert(key, connection.clone());
        Ok(LookupTarget { kind: datasource.kind, connection })
    }

    pub fn cached_connections(&self) -> usize {
        self.connections.len()
    }
}
