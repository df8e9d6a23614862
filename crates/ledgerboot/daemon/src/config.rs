//! Configuration for ledgerboot-daemon

use ledgerboot_orchestrator::BootstrapConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How the daemon reaches the ledger network
    #[serde(default)]
    pub ledger: LedgerBackend,

    /// Bootstrap settings used for the startup run
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the control surface
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            enable_cors: true,
        }
    }
}

/// Ledger network backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LedgerBackend {
    /// In-process simulated network (for development/testing)
    #[default]
    Memory,

    /// REST gateway in front of the certificate authority and peers
    Gateway {
        /// Gateway base URL
        url: String,

        /// Request timeout in seconds
        #[serde(default = "default_request_timeout")]
        request_timeout_secs: u64,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `LEDGERBOOT_*` environment variables (`__` separates nested keys).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with LEDGERBOOT_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("LEDGERBOOT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 3001);
        assert!(matches!(config.ledger, LedgerBackend::Memory));
        assert_eq!(config.bootstrap.readiness.max_attempts, 40);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.bootstrap.keep_alive_secs, 30);
        assert!(config.bootstrap.validate().is_ok());
    }

    #[test]
    fn test_gateway_backend_parses() {
        let backend: LedgerBackend = serde_json::from_value(serde_json::json!({
            "type": "gateway",
            "url": "http://gateway:8080"
        }))
        .unwrap();
        match backend {
            LedgerBackend::Gateway {
                url,
                request_timeout_secs,
            } => {
                assert_eq!(url, "http://gateway:8080");
                assert_eq!(request_timeout_secs, 30);
            }
            LedgerBackend::Memory => panic!("expected gateway backend"),
        }
    }
}
