use clap::Parser;
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Settings are optional so only flags actually passed reach the CLI layer;
// defaults live in `Config::default()`.

/// Parley real-time messaging server
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "parley-server", version, about = "Parley real-time messaging server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "PARLEY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "PARLEY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PARLEY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key) [default: ./data]
    #[arg(long, env = "PARLEY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Print an access token for this existing user id and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<i64>,
}

/// Effective server settings after layering.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,

    pub bind_address: String,

    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub generate_config: bool,

    pub data_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<i64>,

    /// Real-time hub tuning (loaded from [hub] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubConfig>,
}

/// Per-connection limits of the real-time hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue (default: 256)
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Seconds between server pings (default: 54)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds of inbound silence before the connection is dropped (default: 60)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Seconds allowed for a single frame write (default: 10)
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Largest accepted inbound message in bytes (default: 512)
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            ping_interval_secs: 54,
            read_timeout_secs: 60,
            write_timeout_secs: 10,
            max_message_bytes: 512,
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    54
}

fn default_read_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    512
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("hub.outbound_queue_capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("hub.ping_interval_secs ({ping}) must be shorter than hub.read_timeout_secs ({read})")]
    PingNotBeforeDeadline { ping: u64, read: u64 },

    #[error("hub.write_timeout_secs must be greater than zero")]
    ZeroWriteTimeout,
}

impl HubConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Pings must arrive before the peer's read deadline or idle
    /// connections would be dropped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.ping_interval_secs == 0 || self.ping_interval_secs >= self.read_timeout_secs {
            return Err(ConfigError::PingNotBeforeDeadline {
                ping: self.ping_interval_secs,
                read: self.read_timeout_secs,
            });
        }
        if self.write_timeout_secs == 0 {
            return Err(ConfigError::ZeroWriteTimeout);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            issue_token: None,
            hub: None,
        }
    }
}

impl Config {
    /// Hub settings, defaulted when the `[hub]` section is absent.
    pub fn hub(&self) -> HubConfig {
        self.hub.clone().unwrap_or_default()
    }

    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        layered(Toml::file(&cli.config), &cli).extract()
    }
}

fn layered(file: Data<Toml>, cli: &Cli) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(file)
        .merge(Env::prefixed("PARLEY_").split("__"))
        .merge(Serialized::defaults(cli))
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT,
# PARLEY_HUB__PING_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Real-time hub ----
# [hub]

# Outbound queue capacity per connection; a full queue disconnects the client
# outbound_queue_capacity = 256

# Server ping interval, must be shorter than read_timeout_secs
# ping_interval_secs = 54

# Drop the connection after this long without any inbound frame
# read_timeout_secs = 60

# Maximum time for one frame write
# write_timeout_secs = 10

# Largest accepted inbound message in bytes
# max_message_bytes = 512
"#
    .to_string()
}
