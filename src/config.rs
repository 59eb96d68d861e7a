use crate::error::{ChainError, Result};
use crate::models::EndpointProtocol;
use std::env;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Endpoint pool configuration
    pub pool: PoolConfig,
    /// Upstream node sources
    pub sources: SourceConfig,
    /// Persisted state location
    pub storage: StorageConfig,
    /// Relay supervisor configuration
    pub relay: RelayConfig,
    /// API server configuration
    pub api: ApiServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Host local endpoints bind to (default: 0.0.0.0)
    pub listen_host: String,
    /// Host advertised to clients
    pub public_host: String,
    /// Protocols exposed for every node
    pub enabled_protocols: Vec<EndpointProtocol>,
    /// Selection cache TTL in seconds (0 disables caching)
    pub cache_ttl_seconds: u64,
    /// First candidate port for socks5 endpoints
    pub base_socks_port: u16,
    /// First candidate port for http endpoints
    pub base_http_port: u16,
    /// Maximum nodes kept per refresh (0 = unlimited)
    pub max_endpoints: usize,
    /// Periodic refresh interval in seconds (0 = disabled)
    pub refresh_interval_seconds: u64,
}

impl PoolConfig {
    /// Whether endpoints are built for this protocol
    pub fn supports(&self, protocol: EndpointProtocol) -> bool {
        self.enabled_protocols.contains(&protocol)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            public_host: "127.0.0.1".to_string(),
            enabled_protocols: EndpointProtocol::ALL.to_vec(),
            cache_ttl_seconds: 300,
            base_socks_port: 25000,
            base_http_port: 26000,
            max_endpoints: 500,
            refresh_interval_seconds: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Structured (clash style) proxy list
    pub clash_file: PathBuf,
    /// File of `forward=` directives
    pub forward_config_file: PathBuf,
    /// File listing subscription locations
    pub subscriptions_file: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            clash_file: PathBuf::from("aggregator/data/clash.yaml"),
            forward_config_file: PathBuf::from("relay/relay.subscription.conf"),
            subscriptions_file: PathBuf::from("subscriptions.txt"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the persisted documents
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn nodes_file(&self) -> PathBuf {
        self.data_dir.join("proxy_nodes.json")
    }

    pub fn endpoints_file(&self) -> PathBuf {
        self.data_dir.join("proxy_endpoints.json")
    }

    pub fn port_registry_file(&self) -> PathBuf {
        self.data_dir.join("port_registry.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::in_dir("data")
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Launch relay processes for endpoints
    pub enabled: bool,
    /// Relay executable
    pub binary: PathBuf,
    /// Health check target passed to every relay
    pub health_check_url: String,
    /// Forwarding strategy passed to every relay
    pub strategy: String,
    /// Relay-side health check interval in seconds
    pub check_interval: u64,
    /// Relays probed concurrently during a refresh
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: PathBuf::from(if cfg!(windows) {
                "glider\\glider.exe"
            } else {
                "glider/glider"
            }),
            health_check_url: "http://www.msftconnecttest.com/connecttest.txt#expect=200"
                .to_string(),
            strategy: "rr".to_string(),
            check_interval: 60,
            workers: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8080)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let pool_defaults = PoolConfig::default();
        let relay_defaults = RelayConfig::default();
        let sources_defaults = SourceConfig::default();

        let listen_host = get_env_or("PROXY_LISTEN_HOST", &pool_defaults.listen_host);
        let public_host = ["PUBLIC_HOST", "PROXY_PUBLIC_HOST", "PROXY_LISTEN_HOST"]
            .iter()
            .find_map(|key| env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| pool_defaults.public_host.clone());

        let strategy = get_env_or("RELAY_STRATEGY", &relay_defaults.strategy)
            .trim()
            .to_lowercase();
        let check_interval = get_env_or("RELAY_CHECK_INTERVAL", "60")
            .parse::<i64>()
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(60) as u64;

        Ok(Config {
            pool: PoolConfig {
                listen_host,
                public_host,
                enabled_protocols: parse_protocols(&get_env_or("ENABLED_PROTOCOLS", "")),
                cache_ttl_seconds: get_env_or("PROXY_CACHE_TTL", "300").parse().unwrap_or(300),
                base_socks_port: get_env_or("BASE_SOCKS_PORT", "25000").parse().map_err(|_| {
                    ChainError::InvalidConfig("BASE_SOCKS_PORT must be a valid port number".into())
                })?,
                base_http_port: get_env_or("BASE_HTTP_PORT", "26000").parse().map_err(|_| {
                    ChainError::InvalidConfig("BASE_HTTP_PORT must be a valid port number".into())
                })?,
                max_endpoints: get_env_or("MAX_PROXY_ENDPOINTS", "500").parse().unwrap_or(500),
                refresh_interval_seconds: get_env_or("REFRESH_INTERVAL_SECONDS", "0")
                    .parse()
                    .unwrap_or(0),
            },
            sources: SourceConfig {
                clash_file: env_path_or("CLASH_FILE", sources_defaults.clash_file),
                forward_config_file: env_path_or(
                    "FORWARD_CONFIG_FILE",
                    sources_defaults.forward_config_file,
                ),
                subscriptions_file: env_path_or(
                    "SUBSCRIPTIONS_FILE",
                    sources_defaults.subscriptions_file,
                ),
            },
            storage: StorageConfig::in_dir(get_env_or("APP_DATA_DIR", "data")),
            relay: RelayConfig {
                enabled: parse_bool(env::var("ENABLE_RELAY").ok().as_deref(), true),
                binary: env_path_or("RELAY_BINARY", relay_defaults.binary),
                health_check_url: get_env_or("RELAY_HEALTH_CHECK", &relay_defaults.health_check_url)
                    .trim()
                    .to_string(),
                strategy: if strategy.is_empty() {
                    relay_defaults.strategy
                } else {
                    strategy
                },
                check_interval,
                workers: get_env_or("RELAY_WORKERS", "8")
                    .parse::<usize>()
                    .unwrap_or(8)
                    .max(1),
            },
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8080").parse().map_err(|_| {
                    ChainError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info").to_lowercase(),
                format: get_env_or("LOG_FORMAT", "pretty").to_lowercase(),
            },
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse a comma separated protocol list, falling back to every protocol
fn parse_protocols(raw: &str) -> Vec<EndpointProtocol> {
    let mut protocols = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match EndpointProtocol::from_str(item) {
            Some(protocol) if !protocols.contains(&protocol) => protocols.push(protocol),
            Some(_) => {}
            None => warn!(protocol = item, "Ignoring unsupported endpoint protocol"),
        }
    }
    if protocols.is_empty() {
        EndpointProtocol::ALL.to_vec()
    } else {
        protocols
    }
}

/// Interpret common truthy spellings
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path_or(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}
