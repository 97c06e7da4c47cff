//! Relational lookups over SQLite.
//!
//! Each call opens one read-only connection from the descriptor's base address
//! and closes it afterwards; nothing is pooled across calls.

use std::str::FromStr;

use async_trait::async_trait;
use eivs_core::{
    AdapterError, ConcreteQuery, ConnectionDescriptor, DatasourceAdapter, DatasourceKind,
    ParamValue, ResultSet, Row,
};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _, SqliteConnection, TypeInfo, ValueRef};
use tracing::debug;

const SUPPORTED_DRIVER: &str = "sqlite";

#[derive(Clone, Copy, Debug, Default)]
pub struct RelationalAdapter;

impl RelationalAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn connect(
        &self,
        connection: &ConnectionDescriptor,
    ) -> Result<SqliteConnection, AdapterError> {
        if !connection.driver_family.eq_ignore_ascii_case(SUPPORTED_DRIVER) {
            return Err(AdapterError::Unsupported(format!(
                "relational driver family `{}` (only sqlite is available)",
                connection.driver_family
            )));
        }

        let options = SqliteConnectOptions::from_str(&connection.base_address)
            .map_err(|error| {
                AdapterError::ConnectionFailed(format!(
                    "invalid sqlite address for `{}`: {error}",
                    connection.config_name
                ))
            })?
            .read_only(true)
            .create_if_missing(false);

        options.connect().await.map_err(|error| {
            AdapterError::ConnectionFailed(format!(
                "could not open `{}`: {error}",
                connection.config_name
            ))
        })
    }
}

#[async_trait]
impl DatasourceAdapter for RelationalAdapter {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::Relational
    }

    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &ConcreteQuery,
    ) -> Result<ResultSet, AdapterError> {
        let mut conn = self.connect(connection).await?;
        let statement = query.positional_statement();

        let mut bound = sqlx::query(&statement);
        for param in &query.params {
            bound = match &param.value {
                ParamValue::Text(text) => bound.bind(text.clone()),
                ParamValue::Integer(value) => bound.bind(*value),
                ParamValue::Float(value) => bound.bind(*value),
                ParamValue::Bool(value) => bound.bind(*value),
            };
        }

        let fetched = bound.fetch_all(&mut conn).await;
        close(conn, connection).await;
        let rows = fetched.map_err(|error| match error {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AdapterError::ConnectionFailed(error.to_string())
            }
            other => AdapterError::Malformed(format!("query rejected: {other}")),
        })?;

        debug!(
            event_name = "adapter.relational.executed",
            tenant_id = %connection.tenant_id,
            config_name = %connection.config_name,
            params = query.params.len(),
            rows = rows.len(),
            "relational lookup executed"
        );

        rows.iter().map(row_to_json).collect::<Result<Vec<_>, _>>().map(ResultSet::from_rows)
    }

    async fn probe(&self, connection: &ConnectionDescriptor) -> Result<(), AdapterError> {
        let mut conn = self.connect(connection).await?;
        let result = sqlx::query("SELECT 1").execute(&mut conn).await;
        close(conn, connection).await;
        result.map(|_| ()).map_err(|error| AdapterError::ConnectionFailed(error.to_string()))
    }
}

async fn close(conn: SqliteConnection, connection: &ConnectionDescriptor) {
    if let Err(error) = conn.close().await {
        debug!(
            event_name = "adapter.relational.close_failed",
            tenant_id = %connection.tenant_id,
            config_name = %connection.config_name,
            error = %error,
            "relational connection did not close cleanly"
        );
    }
}

fn row_to_json(row: &SqliteRow) -> Result<Row, AdapterError> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row
            .try_get_raw(index)
            .map_err(|error| AdapterError::Malformed(format!("column {index}: {error}")))?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(decode::<i64>(row, index)?),
                "REAL" => Value::from(decode::<f64>(row, index)?),
                "TEXT" | "DATE" | "TIME" | "DATETIME" => Value::from(decode::<String>(row, index)?),
                other => {
                    return Err(AdapterError::Malformed(format!(
                        "column `{}` has unsupported type {other}",
                        column.name()
                    )))
                }
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode<'r, T>(row: &'r SqliteRow, index: usize) -> Result<T, AdapterError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<T, _>(index)
        .map_err(|error| AdapterError::Malformed(format!("column {index}: {error}")))
}
