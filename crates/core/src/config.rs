use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::RetryPolicy;
use crate::domain::verdict::EvaluationPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub adapter_timeout_ms: u64,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub default_policy: EvaluationPolicy,
}

impl EngineConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.max_retries)
    }
}

/// Client settings shared by every HTTP datasource.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    /// Upper bound on a lookup response body.
    pub max_body_bytes: usize,
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub adapter_timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub default_policy: Option<EvaluationPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://eivs.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            engine: EngineConfig {
                adapter_timeout_ms: 5_000,
                max_concurrency: 1,
                max_retries: 0,
                default_policy: EvaluationPolicy::EvaluateAll,
            },
            http: HttpConfig {
                user_agent: concat!("eivs/", env!("CARGO_PKG_VERSION")).to_string(),
                connect_timeout_ms: 2_000,
                max_body_bytes: 1_048_576,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("eivs.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(adapter_timeout_ms) = engine.adapter_timeout_ms {
                self.engine.adapter_timeout_ms = adapter_timeout_ms;
            }
            if let Some(max_concurrency) = engine.max_concurrency {
                self.engine.max_concurrency = max_concurrency;
            }
            if let Some(max_retries) = engine.max_retries {
                self.engine.max_retries = max_retries;
            }
            if let Some(default_policy) = engine.default_policy {
                self.engine.default_policy = default_policy;
            }
        }

        if let Some(http) = patch.http {
            if let Some(user_agent) = http.user_agent {
                self.http.user_agent = user_agent;
            }
            if let Some(connect_timeout_ms) = http.connect_timeout_ms {
                self.http.connect_timeout_ms = connect_timeout_ms;
            }
            if let Some(max_body_bytes) = http.max_body_bytes {
                self.http.max_body_bytes = max_body_bytes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("EIVS_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("EIVS_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("EIVS_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("EIVS_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("EIVS_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("EIVS_ENGINE_ADAPTER_TIMEOUT_MS") {
            self.engine.adapter_timeout_ms = parse_u64("EIVS_ENGINE_ADAPTER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("EIVS_ENGINE_MAX_CONCURRENCY") {
            self.engine.max_concurrency = parse_usize("EIVS_ENGINE_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = read_env("EIVS_ENGINE_MAX_RETRIES") {
            self.engine.max_retries = parse_u32("EIVS_ENGINE_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("EIVS_ENGINE_DEFAULT_POLICY") {
            self.engine.default_policy = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "EIVS_ENGINE_DEFAULT_POLICY".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = read_env("EIVS_HTTP_USER_AGENT") {
            self.http.user_agent = value;
        }
        if let Some(value) = read_env("EIVS_HTTP_CONNECT_TIMEOUT_MS") {
            self.http.connect_timeout_ms = parse_u64("EIVS_HTTP_CONNECT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("EIVS_HTTP_MAX_BODY_BYTES") {
            self.http.max_body_bytes = parse_usize("EIVS_HTTP_MAX_BODY_BYTES", &value)?;
        }

        let log_level = read_env("EIVS_LOGGING_LEVEL").or_else(|| read_env("EIVS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("EIVS_LOGGING_FORMAT").or_else(|| read_env("EIVS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(adapter_timeout_ms) = overrides.adapter_timeout_ms {
            self.engine.adapter_timeout_ms = adapter_timeout_ms;
        }
        if let Some(max_concurrency) = overrides.max_concurrency {
            self.engine.max_concurrency = max_concurrency;
        }
        if let Some(default_policy) = overrides.default_policy {
            self.engine.default_policy = default_policy;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_engine(&self.engine)?;
        validate_http(&self.http)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("eivs.toml"), PathBuf::from("config/eivs.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.adapter_timeout_ms == 0 || engine.adapter_timeout_ms > 300_000 {
        return Err(ConfigError::Validation(
            "engine.adapter_timeout_ms must be in range 1..=300000".to_string(),
        ));
    }

    if engine.max_concurrency == 0 || engine.max_concurrency > 64 {
        return Err(ConfigError::Validation(
            "engine.max_concurrency must be in range 1..=64 (1 runs rules sequentially)"
                .to_string(),
        ));
    }

    if engine.max_retries > 10 {
        return Err(ConfigError::Validation(
            "engine.max_retries must be at most 10 (0 disables retries)".to_string(),
        ));
    }

    Ok(())
}

fn validate_http(http: &HttpConfig) -> Result<(), ConfigError> {
    if http.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation("http.user_agent must not be empty".to_string()));
    }

    if http.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "http.connect_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if http.max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "http.max_body_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    engine: Option<EnginePatch>,
    http: Option<HttpPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    adapter_timeout_ms: Option<u64>,
    max_concurrency: Option<usize>,
    max_retries: Option<u32>,
    default_policy: Option<EvaluationPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct HttpPatch {
    user_agent: Option<String>,
    connect_timeout_ms: Option<u64>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::domain::verdict::EvaluationPolicy;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_run_sequentially_with_five_second_timeout() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(
            config.engine.adapter_timeout() == Duration::from_secs(5),
            "default adapter timeout should be five seconds",
        )?;
        ensure(config.engine.max_concurrency == 1, "rules should run sequentially by default")?;
        ensure(config.engine.retry_policy().max_retries == 0, "retries should be opt-in")?;
        ensure(
            config.engine.default_policy == EvaluationPolicy::EvaluateAll,
            "default policy should evaluate every rule",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_EIVS_DB_PATH", "/var/lib/eivs/catalog.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("eivs.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_EIVS_DB_PATH}"

[engine]
default_policy = "stop_on_first_failure"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///var/lib/eivs/catalog.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.engine.default_policy == EvaluationPolicy::StopOnFirstFailure,
                "policy should be read from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_EIVS_DB_PATH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("EIVS_LOG_LEVEL", "warn");
        env::set_var("EIVS_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["EIVS_LOG_LEVEL", "EIVS_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("EIVS_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("EIVS_ENGINE_ADAPTER_TIMEOUT_MS", "750");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("eivs.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[engine]
adapter_timeout_ms = 1500
max_concurrency = 4

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.engine.adapter_timeout_ms == 750,
                "env adapter timeout should win over file and defaults",
            )?;
            ensure(config.engine.max_concurrency == 4, "file concurrency should win over default")?;
            Ok(())
        })();

        clear_vars(&["EIVS_DATABASE_URL", "EIVS_ENGINE_ADAPTER_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("EIVS_ENGINE_MAX_CONCURRENCY", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("engine.max_concurrency")
            );
            ensure(has_message, "validation failure should mention engine.max_concurrency")
        })();

        clear_vars(&["EIVS_ENGINE_MAX_CONCURRENCY"]);
        result
    }

    #[test]
    fn unknown_policy_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("EIVS_ENGINE_DEFAULT_POLICY", "sometimes");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "EIVS_ENGINE_DEFAULT_POLICY",
                "invalid override should name the variable",
            ),
            Ok(_) => Err("expected invalid override error".to_string()),
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["EIVS_ENGINE_DEFAULT_POLICY"]);
        result
    }

    #[test]
    fn response_body_limit_comes_from_env_and_must_be_positive() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("EIVS_HTTP_MAX_BODY_BYTES", "4096");
        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.http.max_body_bytes == 4096, "env should set the body limit")?;

            env::set_var("EIVS_HTTP_MAX_BODY_BYTES", "0");
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::Validation(ref message)) if message.contains("http.max_body_bytes")
            );
            ensure(rejected, "a zero body limit should fail validation")
        })();

        clear_vars(&["EIVS_HTTP_MAX_BODY_BYTES"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let missing = PathBuf::from("/nonexistent/eivs.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(ref path)) if path == &missing),
            "missing required file should be reported",
        )
    }
}
