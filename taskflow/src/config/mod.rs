//! Configuration system for the `taskflow` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskflow/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use taskflow_proto::user::UserId;

use crate::backend::rest::RestConfig;
use crate::focus::FocusDurations;
use crate::store::{ReorderScope, StoreConfig};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No user id was configured.
    #[error("no user configured (set --user, TASKFLOW_USER or [session] user_id)")]
    MissingUser,

    /// The backend URL is not a valid absolute URL.
    #[error("invalid backend url {url:?}: {source}")]
    InvalidUrl {
        /// The configured value.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    session: SessionFileConfig,
    store: StoreFileConfig,
    focus: FocusFileConfig,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    url: Option<String>,
    api_key: Option<String>,
    realtime_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    access_token: Option<String>,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    debounce_ms: Option<u64>,
    event_buffer: Option<usize>,
    reorder_scope: Option<ReorderScope>,
}

/// `[focus]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FocusFileConfig {
    focus_minutes: Option<u32>,
    break_minutes: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Backend --
    /// Base URL of the hosted data platform. `None` runs the offline demo.
    pub url: Option<String>,
    /// Project API key.
    pub api_key: Option<String>,
    /// Session access token.
    pub access_token: Option<String>,
    /// WebSocket URL of the change feed.
    pub realtime_url: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,

    // -- Session --
    /// Signed-in user.
    pub user_id: Option<String>,

    // -- Store / focus --
    /// Store tunables.
    pub store: StoreConfig,
    /// Focus timer lengths.
    pub focus: FocusDurations,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            access_token: None,
            realtime_url: None,
            request_timeout: Duration::from_secs(10),
            user_id: None,
            store: StoreConfig::default(),
            focus: FocusDurations::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// or if any config file found cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let focus_default = FocusDurations::default();

        Self {
            url: cli.url.clone().or_else(|| file.backend.url.clone()),
            api_key: cli.api_key.clone().or_else(|| file.backend.api_key.clone()),
            access_token: cli
                .token
                .clone()
                .or_else(|| file.session.access_token.clone()),
            realtime_url: cli
                .realtime_url
                .clone()
                .or_else(|| file.backend.realtime_url.clone()),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_id: cli.user.clone().or_else(|| file.session.user_id.clone()),
            store: StoreConfig {
                debounce: cli
                    .debounce_ms
                    .or(file.store.debounce_ms)
                    .map_or(defaults.store.debounce, Duration::from_millis),
                event_buffer: file
                    .store
                    .event_buffer
                    .unwrap_or(defaults.store.event_buffer),
                reorder_scope: cli
                    .reorder_scope
                    .or(file.store.reorder_scope)
                    .unwrap_or(defaults.store.reorder_scope),
            },
            focus: match (file.focus.focus_minutes, file.focus.break_minutes) {
                (None, None) => focus_default,
                (focus, rest) => FocusDurations::from_minutes(
                    focus.unwrap_or(focus_default.focus_secs / 60),
                    rest.unwrap_or(focus_default.break_secs / 60),
                ),
            },
        }
    }

    /// The configured user.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingUser`] when none is set.
    pub fn user(&self) -> Result<UserId, ConfigError> {
        self.user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(UserId::new)
            .ok_or(ConfigError::MissingUser)
    }

    /// Connection settings for the HTTP backend, or `None` when no URL is
    /// configured (offline demo mode).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the URL does not parse.
    pub fn to_rest_config(&self) -> Result<Option<RestConfig>, ConfigError> {
        let Some(url) = &self.url else {
            return Ok(None);
        };
        let base_url = Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
            url: url.clone(),
            source,
        })?;
        Ok(Some(RestConfig {
            base_url,
            api_key: self.api_key.clone(),
            access_token: self.access_token.clone(),
            realtime_url: self.realtime_url.clone(),
            request_timeout: self.request_timeout,
        }))
    }
}

/// Global CLI arguments, shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Base URL of the data platform (omit for the offline demo).
    #[arg(long, global = true, env = "TASKFLOW_URL")]
    pub url: Option<String>,

    /// Project API key.
    #[arg(long, global = true, env = "TASKFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Session access token.
    #[arg(long, global = true, env = "TASKFLOW_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// WebSocket URL of the change feed.
    #[arg(long, global = true, env = "TASKFLOW_REALTIME_URL")]
    pub realtime_url: Option<String>,

    /// User whose tasks to manage.
    #[arg(long, global = true, env = "TASKFLOW_USER")]
    pub user: Option<String>,

    /// Path to config file (default: `~/.config/taskflow/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Quiet period before an edit is written, in milliseconds.
    #[arg(long, global = true)]
    pub debounce_ms: Option<u64>,

    /// How reordering renumbers positions (`view` or `global`).
    #[arg(long, global = true)]
    pub reorder_scope: Option<ReorderScope>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn", env = "TASKFLOW_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist. Otherwise the default
/// path is tried and a missing file is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskflow").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
