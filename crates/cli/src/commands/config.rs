use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use eivs_core::config::LoadOptions;
use toml::Value;

use crate::commands::load_config;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run(options: LoadOptions) -> String {
    let explicit_path = options.config_path.clone();
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(result) => return result.output,
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key_path: "database.url",
            env_keys: &["EIVS_DATABASE_URL"],
            value: redact_url(&config.database.url),
        },
        Field {
            key_path: "database.max_connections",
            env_keys: &["EIVS_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key_path: "database.timeout_secs",
            env_keys: &["EIVS_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key_path: "engine.adapter_timeout_ms",
            env_keys: &["EIVS_ENGINE_ADAPTER_TIMEOUT_MS"],
            value: config.engine.adapter_timeout_ms.to_string(),
        },
        Field {
            key_path: "engine.max_concurrency",
            env_keys: &["EIVS_ENGINE_MAX_CONCURRENCY"],
            value: config.engine.max_concurrency.to_string(),
        },
        Field {
            key_path: "engine.max_retries",
            env_keys: &["EIVS_ENGINE_MAX_RETRIES"],
            value: config.engine.max_retries.to_string(),
        },
        Field {
            key_path: "engine.default_policy",
            env_keys: &["EIVS_ENGINE_DEFAULT_POLICY"],
            value: config.engine.default_policy.as_str().to_string(),
        },
        Field {
            key_path: "http.user_agent",
            env_keys: &["EIVS_HTTP_USER_AGENT"],
            value: config.http.user_agent.clone(),
        },
        Field {
            key_path: "http.connect_timeout_ms",
            env_keys: &["EIVS_HTTP_CONNECT_TIMEOUT_MS"],
            value: config.http.connect_timeout_ms.to_string(),
        },
        Field {
            key_path: "http.max_body_bytes",
            env_keys: &["EIVS_HTTP_MAX_BODY_BYTES"],
            value: config.http.max_body_bytes.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["EIVS_LOGGING_LEVEL", "EIVS_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["EIVS_LOGGING_FORMAT", "EIVS_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn detect_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then_some(path);
    }

    let root = PathBuf::from("eivs.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/eivs.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Hides a `user:password@` segment in a database url.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://<redacted>@{host}"),
        None => url.to_string(),
    }
}
