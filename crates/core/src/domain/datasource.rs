use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasourceId(pub i64);

impl fmt::Display for DatasourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceKind {
    Relational,
    Http,
    File,
}

impl DatasourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Http => "http",
            Self::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relational" | "sql" | "database" => Some(Self::Relational),
            "http" | "rest" | "api" => Some(Self::Http),
            "file" | "csv" => Some(Self::File),
            _ => None,
        }
    }

    /// Adapter kind implied by a config's protocol, used when only the config
    /// name is known.
    pub fn for_protocol(protocol: &str) -> Option<Self> {
        match protocol.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "postgres" | "postgresql" | "mysql" | "mssql" => Some(Self::Relational),
            "http" | "https" => Some(Self::Http),
            "file" | "csv" | "json" | "jsonl" => Some(Self::File),
            _ => None,
        }
    }
}

/// Logical reference to an external data source. The physical connection
/// details live in the [`DatasourceConfig`] named by `connection_key`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: DatasourceId,
    pub tenant_id: TenantId,
    pub name: String,
    pub kind: DatasourceKind,
    pub connection_key: String,
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    Basic,
    Bearer,
    ApiKey,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Bearer => "bearer",
            Self::ApiKey => "api_key",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Self::None),
            "basic" => Some(Self::Basic),
            "bearer" | "token" => Some(Self::Bearer),
            "api_key" | "apikey" => Some(Self::ApiKey),
            _ => None,
        }
    }
}

/// Authentication type plus an opaque credential payload. For `basic` the
/// payload is `user:password`; for `bearer` and `api_key` it is the token.
#[derive(Clone, Debug)]
pub struct AuthDescriptor {
    pub kind: AuthKind,
    pub credential: Option<SecretString>,
}

impl AuthDescriptor {
    pub fn none() -> Self {
        Self { kind: AuthKind::None, credential: None }
    }
}

#[derive(Clone, Debug)]
pub struct DatasourceConfig {
    pub tenant_id: TenantId,
    pub name: String,
    pub protocol: String,
    pub driver_family: String,
    pub base_address: String,
    pub auth: AuthDescriptor,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::{AuthKind, DatasourceKind};

    #[test]
    fn datasource_kind_accepts_aliases() {
        assert_eq!(DatasourceKind::parse("SQL"), Some(DatasourceKind::Relational));
        assert_eq!(DatasourceKind::parse(" rest "), Some(DatasourceKind::Http));
        assert_eq!(DatasourceKind::parse("csv"), Some(DatasourceKind::File));
        assert_eq!(DatasourceKind::parse("ldap"), None);
    }

    #[test]
    fn protocol_implies_adapter_kind() {
        assert_eq!(DatasourceKind::for_protocol("https"), Some(DatasourceKind::Http));
        assert_eq!(DatasourceKind::for_protocol("SQLite"), Some(DatasourceKind::Relational));
        assert_eq!(DatasourceKind::for_protocol("jsonl"), Some(DatasourceKind::File));
        assert_eq!(DatasourceKind::for_protocol("gopher"), None);
    }

    #[test]
    fn auth_kind_round_trips_through_storage_form() {
        for kind in [AuthKind::None, AuthKind::Basic, AuthKind::Bearer, AuthKind::ApiKey] {
            assert_eq!(AuthKind::parse(kind.as_str()), Some(kind));
        }
    }
}
