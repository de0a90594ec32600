//! Configuration system for the bridge.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute or [`EnvResolver`])
//! 3. The local `key=value` file (`.env` by default)
//! 4. TOML config file (`~/.config/xmtpbridge/config.toml`)
//! 5. Compiled defaults
//!
//! Secrets (`PRIVATE_KEY`, `XMTP_DB_ENCRYPTION_KEY`) and the network
//! environment only come from layers 2 and 3. If any of them is missing the
//! load fails with [`ConfigError::MissingKeys`].

pub mod env;

use std::path::{Path, PathBuf};
use std::time::Duration;

use zeroize::Zeroizing;

pub use env::EnvResolver;

use crate::client::ClientSettings;
use crate::network::NetworkEnv;
use crate::relay::{DEFAULT_RELAY_TIMEOUT, RelayConfig};

/// Signing key of the bridge's wallet.
pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
/// Hex key for the local state database.
pub const XMTP_DB_ENCRYPTION_KEY: &str = "XMTP_DB_ENCRYPTION_KEY";
/// Network environment name.
pub const XMTP_ENV: &str = "XMTP_ENV";
/// Optional local state database path.
pub const XMTP_DB_PATH: &str = "XMTP_DB_PATH";
/// Optional bus URL.
pub const REDIS_URL: &str = "REDIS_URL";

/// Keys that must resolve for the bridge to start.
pub const REQUIRED_KEYS: [&str; 3] = [PRIVATE_KEY, XMTP_DB_ENCRYPTION_KEY, XMTP_ENV];

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

    /// Required settings were found neither in the environment nor the env file.
    #[error("missing required configuration: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    /// A setting was present but unusable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Setting name.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BridgeConfigFile {
    bus: BusFileConfig,
    relay: RelayFileConfig,
}

/// `[bus]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BusFileConfig {
    redis_url: Option<String>,
    channel: Option<String>,
    reconnect: Option<bool>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

/// `[relay]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayFileConfig {
    timeout_secs: Option<u64>,
    inbox_cache: Option<bool>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the bridge.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Relay Redis pub/sub messages to XMTP recipients")]
pub struct BridgeCliArgs {
    /// Redis URL to subscribe on.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Channel carrying relay requests.
    #[arg(long, env = "BRIDGE_CHANNEL")]
    pub channel: Option<String>,

    /// Path to config file (default: `~/.config/xmtpbridge/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// `key=value` file consulted for settings missing from the environment.
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Upper bound on one relay in seconds (0 disables the bound).
    #[arg(long)]
    pub relay_timeout_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BRIDGE_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Reconnect behaviour after a lost bus subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Bus-side settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Channel carrying relay requests.
    pub channel: String,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: "xmtp-messages".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Fully resolved bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bus settings.
    pub bus: BusConfig,
    /// Relay pipeline settings.
    pub relay: RelayConfig,
    /// Messaging client settings.
    pub client: ClientSettings,
    /// Log level filter string.
    pub log_level: String,
}

impl BridgeConfig {
    /// Load configuration from CLI args, the process environment, the env
    /// file named by `--env-file`, and the TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit TOML file cannot be read or
    /// parsed, a required key is missing, or a value is invalid.
    pub fn load(cli: &BridgeCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let env = EnvResolver::from_process(&cli.env_file);
        Self::resolve(cli, &file, &env)
    }

    /// Resolve a `BridgeConfig` from its layers.
    ///
    /// Priority: CLI > env > env file > TOML file > default.
    fn resolve<L: Fn(&str) -> Option<String>>(
        cli: &BridgeCliArgs,
        file: &BridgeConfigFile,
        env: &EnvResolver<L>,
    ) -> Result<Self, ConfigError> {
        let mut required = env.resolve(&REQUIRED_KEYS)?;
        let network_env: NetworkEnv =
            required[XMTP_ENV]
                .parse()
                .map_err(|e: crate::network::UnknownEnv| ConfigError::InvalidValue {
                    key: XMTP_ENV,
                    reason: e.to_string(),
                })?;

        let db_path = env
            .optional(XMTP_DB_PATH)
            .map_or_else(|| default_db_path(network_env), PathBuf::from);

        let bus_defaults = BusConfig::default();
        let reconnect_defaults = ReconnectConfig::default();
        let redis_url = cli
            .redis_url
            .clone()
            .or_else(|| env.optional(REDIS_URL))
            .or_else(|| file.bus.redis_url.clone())
            .unwrap_or(bus_defaults.redis_url);
        validate_redis_url(&redis_url)?;

        let channel = cli
            .channel
            .clone()
            .or_else(|| file.bus.channel.clone())
            .unwrap_or(bus_defaults.channel);
        if channel.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "channel",
                reason: "channel name is empty".to_string(),
            });
        }

        let reconnect = ReconnectConfig {
            enabled: file.bus.reconnect.unwrap_or(reconnect_defaults.enabled),
            initial_backoff: file
                .bus
                .initial_backoff_ms
                .map_or(reconnect_defaults.initial_backoff, Duration::from_millis),
            max_backoff: file
                .bus
                .max_backoff_ms
                .map_or(reconnect_defaults.max_backoff, Duration::from_millis),
        };

        let timeout_secs = cli
            .relay_timeout_secs
            .or(file.relay.timeout_secs)
            .unwrap_or(DEFAULT_RELAY_TIMEOUT.as_secs());
        let relay = RelayConfig {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            inbox_cache: file
                .relay
                .inbox_cache
                .unwrap_or(RelayConfig::default().inbox_cache),
        };

        let take = |map: &mut std::collections::HashMap<String, String>, key: &str| {
            Zeroizing::new(map.remove(key).unwrap_or_default())
        };
        let client = ClientSettings {
            private_key: take(&mut required, PRIVATE_KEY),
            db_encryption_key: take(&mut required, XMTP_DB_ENCRYPTION_KEY),
            env: network_env,
            db_path,
        };

        Ok(Self {
            bus: BusConfig {
                redis_url,
                channel,
                reconnect,
            },
            relay,
            client,
            log_level: cli.log_level.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Default local state database path for `env`.
fn default_db_path(env: NetworkEnv) -> PathBuf {
    let file_name = format!("xmtp-{env}.db3");
    dirs::data_dir().map_or_else(
        || PathBuf::from(&file_name),
        |dir| dir.join("xmtpbridge").join(&file_name),
    )
}

fn validate_redis_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: REDIS_URL,
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
        other => Err(ConfigError::InvalidValue {
            key: REDIS_URL,
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&Path>) -> Result<BridgeConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(BridgeConfigFile::default());
    };
    let path = config_dir.join("xmtpbridge").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
