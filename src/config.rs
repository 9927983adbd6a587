use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use finportal_core::{Connector, Credentials};
use finportal_memory::MemoryConnector;
use finportal_postgres::PostgresConnector;
use finportal_sqlite::SqliteConnector;
use serde::Deserialize;

use crate::{cache::MAX_RECENT_ROWS, Portal};

/// Environment variable that overrides `storage.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "FINPORTAL_ACCESS_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "finportal", about = "FinPortal - financial submissions with cached analytics")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "finportal.toml")]
    pub config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub host: String,

    /// Database file for sqlite, `[user/]dbname` for postgres.
    #[serde(default = "default_http_path")]
    pub http_path: String,

    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("http_path", &self.http_path)
            .finish_non_exhaustive()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_path() -> String {
    "finportal.db".to_string()
}

fn default_ttl_secs() -> u64 {
    30
}

fn default_recent_limit() -> usize {
    MAX_RECENT_ROWS
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: BackendKind::default(),
            host: String::new(),
            http_path: default_http_path(),
            access_token: String::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_secs: default_ttl_secs(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl StorageConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.host, &self.http_path, &self.access_token)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        match self.backend {
            BackendKind::Sqlite => Arc::new(SqliteConnector),
            BackendKind::Postgres => Arc::new(PostgresConnector),
            BackendKind::Memory => Arc::new(MemoryConnector::default()),
        }
    }
}

impl Config {
    pub fn parse_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            config.storage.access_token = token;
        }

        config
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    pub fn build_portal(&self) -> Portal {
        Portal::with_settings(
            self.storage.connector(),
            self.storage.credentials(),
            Duration::from_secs(self.cache.ttl_secs),
            self.cache.recent_limit,
        )
    }
}
