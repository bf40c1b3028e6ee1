use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub notifications: NotificationConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Applied to requests that configure no timeout of their own; 0 keeps
    /// them open-ended.
    pub default_timeout_hours: u32,
    /// Whether incomplete levels nudge the remaining approvers after each
    /// recorded approval.
    pub reminders_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub tenant_id: Option<String>,
    pub company_id: Option<String>,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    /// Refresh the cached token this many seconds before it actually expires.
    pub refresh_skew_secs: u64,
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

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub sync_enabled: Option<bool>,
    pub sync_client_secret: Option<String>,
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
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://signoff.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig { default_timeout_hours: 0, reminders_enabled: true },
            notifications: NotificationConfig { enabled: true },
            sync: SyncConfig {
                enabled: false,
                base_url: None,
                tenant_id: None,
                company_id: None,
                token_url: None,
                client_id: None,
                client_secret: None,
                refresh_skew_secs: 60,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("signoff.toml"));
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

        if let Some(workflow) = patch.workflow {
            if let Some(default_timeout_hours) = workflow.default_timeout_hours {
                self.workflow.default_timeout_hours = default_timeout_hours;
            }
            if let Some(reminders_enabled) = workflow.reminders_enabled {
                self.workflow.reminders_enabled = reminders_enabled;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(enabled) = notifications.enabled {
                self.notifications.enabled = enabled;
            }
        }

        if let Some(sync) = patch.sync {
            if let Some(enabled) = sync.enabled {
                self.sync.enabled = enabled;
            }
            if let Some(base_url) = sync.base_url {
                self.sync.base_url = Some(base_url);
            }
            if let Some(tenant_id) = sync.tenant_id {
                self.sync.tenant_id = Some(tenant_id);
            }
            if let Some(company_id) = sync.company_id {
                self.sync.company_id = Some(company_id);
            }
            if let Some(token_url) = sync.token_url {
                self.sync.token_url = Some(token_url);
            }
            if let Some(client_id) = sync.client_id {
                self.sync.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = sync.client_secret {
                self.sync.client_secret = Some(secret_value(client_secret_value));
            }
            if let Some(refresh_skew_secs) = sync.refresh_skew_secs {
                self.sync.refresh_skew_secs = refresh_skew_secs;
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
        if let Some(value) = read_env("SIGNOFF_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SIGNOFF_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SIGNOFF_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_WORKFLOW_DEFAULT_TIMEOUT_HOURS") {
            self.workflow.default_timeout_hours =
                parse_u32("SIGNOFF_WORKFLOW_DEFAULT_TIMEOUT_HOURS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_WORKFLOW_REMINDERS_ENABLED") {
            self.workflow.reminders_enabled =
                parse_bool("SIGNOFF_WORKFLOW_REMINDERS_ENABLED", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = parse_bool("SIGNOFF_NOTIFICATIONS_ENABLED", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_SYNC_ENABLED") {
            self.sync.enabled = parse_bool("SIGNOFF_SYNC_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_BASE_URL") {
            self.sync.base_url = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_TENANT_ID") {
            self.sync.tenant_id = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_COMPANY_ID") {
            self.sync.company_id = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_TOKEN_URL") {
            self.sync.token_url = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_CLIENT_ID") {
            self.sync.client_id = Some(value);
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_CLIENT_SECRET") {
            self.sync.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("SIGNOFF_SYNC_REFRESH_SKEW_SECS") {
            self.sync.refresh_skew_secs = parse_u64("SIGNOFF_SYNC_REFRESH_SKEW_SECS", &value)?;
        }

        let log_level =
            read_env("SIGNOFF_LOGGING_LEVEL").or_else(|| read_env("SIGNOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SIGNOFF_LOGGING_FORMAT").or_else(|| read_env("SIGNOFF_LOG_FORMAT"));
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
        if let Some(sync_enabled) = overrides.sync_enabled {
            self.sync.enabled = sync_enabled;
        }
        if let Some(sync_client_secret_value) = overrides.sync_client_secret {
            self.sync.client_secret = Some(secret_value(sync_client_secret_value));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if self.sync.enabled {
            let required: [(&str, bool); 4] = [
                ("sync.base_url", self.sync.base_url.is_none()),
                ("sync.token_url", self.sync.token_url.is_none()),
                ("sync.client_id", self.sync.client_id.is_none()),
                ("sync.client_secret", self.sync.client_secret.is_none()),
            ];
            for (key, missing) in required {
                if missing {
                    return Err(ConfigError::Validation(format!(
                        "{key} is required when sync is enabled"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    notifications: Option<NotificationPatch>,
    sync: Option<SyncPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    default_timeout_hours: Option<u32>,
    reminders_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    tenant_id: Option<String>,
    company_id: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_skew_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let default = PathBuf::from("signoff.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
