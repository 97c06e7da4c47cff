pub mod file;
pub mod http;
pub mod relational;

use std::sync::Arc;

use eivs_core::config::HttpConfig;
use eivs_core::{AdapterError, AdapterSet};

pub use file::{FileAdapter, FileFormat};
pub use http::HttpAdapter;
pub use relational::RelationalAdapter;

/// Relational, HTTP, and file adapters with the shared HTTP client settings.
pub fn default_adapter_set(http: &HttpConfig) -> Result<AdapterSet, AdapterError> {
    Ok(AdapterSet::new()
        .with_adapter(Arc::new(RelationalAdapter::new()))
        .with_adapter(Arc::new(HttpAdapter::new(http)?))
        .with_adapter(Arc::new(FileAdapter::new())))
}
