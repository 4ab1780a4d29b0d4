use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Chatwire real-time conversation server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chatwire-server", version, about = "Chatwire real-time conversation server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATWIRE_PORT", default_value = "3030")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATWIRE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chatwire.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATWIRE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "CHATWIRE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Typing indicator debounce window in milliseconds
    #[arg(long, env = "CHATWIRE_TYPING_TIMEOUT_MS", default_value = "3000")]
    pub typing_timeout_ms: u64,

    /// Leave the previous room when a connection joins another one
    #[arg(
        long,
        env = "CHATWIRE_SINGLE_ROOM_PER_CONNECTION",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub single_room_per_connection: bool,

    /// Characters of message content kept in offline notification previews
    #[arg(long, env = "CHATWIRE_PREVIEW_CHARS", default_value = "100")]
    pub preview_chars: usize,

    /// Days to keep notifications before automatic purge
    #[arg(long, env = "CHATWIRE_NOTIFICATION_RETENTION_DAYS", default_value = "30")]
    pub notification_retention_days: u32,

    /// Seconds between notification retention cleanup runs
    #[arg(long, env = "CHATWIRE_NOTIFICATION_CLEANUP_INTERVAL_SECS", default_value = "3600")]
    pub notification_cleanup_interval_secs: u64,

    /// Lifetime of issued access tokens in seconds
    #[arg(long, env = "CHATWIRE_ACCESS_TOKEN_TTL_SECS", default_value = "86400")]
    pub access_token_ttl_secs: i64,

    /// Print an access token for this user id (signed with the server key) and exit
    #[arg(long)]
    #[serde(default)]
    pub issue_token: Option<String>,

    /// Display name embedded in the token printed by --issue-token
    #[arg(long)]
    #[serde(default)]
    pub token_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            bind_address: "0.0.0.0".to_string(),
            config: "./chatwire.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            typing_timeout_ms: 3000,
            single_room_per_connection: true,
            preview_chars: 100,
            notification_retention_days: 30,
            notification_cleanup_interval_secs: 3600,
            access_token_ttl_secs: 86400,
            issue_token: None,
            token_name: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATWIRE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATWIRE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Runtime knobs consumed by the chat core.
    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            typing_timeout: Duration::from_millis(self.typing_timeout_ms),
            single_room_per_connection: self.single_room_per_connection,
            preview_chars: self.preview_chars,
        }
    }
}

/// Chat behaviour settings shared through `AppState`.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub typing_timeout: Duration,
    pub single_room_per_connection: bool,
    pub preview_chars: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Config::default().chat_settings()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chatwire Server Configuration
# Place this file at ./chatwire.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATWIRE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3030)
# port = 3030

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# ---- Chat ----

# Typing indicator debounce window in milliseconds (default: 3000)
# typing_timeout_ms = 3000

# A connection views one conversation at a time; joining a room leaves the previous one
# single_room_per_connection = true

# Characters of message content shown in offline notifications (default: 100)
# preview_chars = 100

# ---- Notifications ----

# Days to keep notifications before automatic purge (default: 30)
# notification_retention_days = 30

# Interval in seconds between retention cleanup runs (default: 3600 = 1 hour)
# notification_cleanup_interval_secs = 3600

# ---- Auth ----

# Access token lifetime in seconds (default: 86400 = 24 hours)
# access_token_ttl_secs = 86400
"#
    .to_string()
}
