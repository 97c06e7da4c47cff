//! Datasource adapter port.
//!
//! Concrete adapters (relational, HTTP, file) live in `eivs-adapters`; the core
//! only knows this trait, the normalized [`ResultSet`], and how to bound a call
//! by time and an opt-in retry budget.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::domain::datasource::DatasourceKind;
use crate::errors::AdapterError;
use crate::renderer::ConcreteQuery;
use crate::resolver::ConnectionDescriptor;

pub type Row = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn single(&self) -> Option<&Row> {
        match self.rows.as_slice() {
            [row] => Some(row),
            _ => None,
        }
    }
}

#[async_trait]
pub trait DatasourceAdapter: Send + Sync {
    fn kind(&self) -> DatasourceKind;

    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &ConcreteQuery,
    ) -> Result<ResultSet, AdapterError>;

    /// Reachability check used by operators to test a connection.
    async fn probe(&self, connection: &ConnectionDescriptor) -> Result<(), AdapterError>;
}

#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<DatasourceKind, Arc<dyn DatasourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn DatasourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn DatasourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: DatasourceKind) -> Result<Arc<dyn DatasourceAdapter>, AdapterError> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            AdapterError::Unsupported(format!("no adapter registered for `{}`", kind.as_str()))
        })
    }

    pub fn kinds(&self) -> Vec<DatasourceKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }
}

/// Opt-in retry budget for transient adapter failures. The default performs no
/// retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

/// Runs one adapter call under `timeout`.
pub async fn execute_with_timeout(
    adapter: &dyn DatasourceAdapter,
    connection: &ConnectionDescriptor,
    query: &ConcreteQuery,
    timeout: Duration,
) -> Result<ResultSet, AdapterError> {
    match tokio::time::timeout(timeout, adapter.execute(connection, query)).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout { after_ms: duration_ms(timeout) }),
    }
}

/// Repeats [`execute_with_timeout`] on `Timeout`/`ConnectionFailed` up to the
/// policy's budget. Any other error is returned immediately.
pub async fn execute_with_retry(
    adapter: &dyn DatasourceAdapter,
    connection: &ConnectionDescriptor,
    query: &ConcreteQuery,
    timeout: Duration,
    retry: RetryPolicy,
) -> Result<ResultSet, AdapterError> {
    let mut attempt = 0;
    loop {
        match execute_with_timeout(adapter, connection, query, timeout).await {
            Err(error) if error.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                warn!(
                    event_name = "engine.adapter.retry",
                    tenant_id = %connection.tenant_id,
                    config_name = %connection.config_name,
                    attempt,
                    error = %error,
                    "retrying transient adapter failure"
                );
            }
            result => return result,
        }
    }
}

pub async fn probe_with_timeout(
    adapter: &dyn DatasourceAdapter,
    connection: &ConnectionDescriptor,
    timeout: Duration,
) -> Result<(), AdapterError> {
    match tokio::time::timeout(timeout, adapter.probe(connection)).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout { after_ms: duration_ms(timeout) }),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
