//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum items in timeline cache (default: 2000)
    pub timeline_max_items: usize,
    /// Profile cache TTL in seconds (default: 86400)
    pub profile_ttl: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Federation (inbox/outbox/collection engine) tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Bound on inbox-forwarding recursion (`spec.md` §4.F.1 step 10).
    #[serde(default = "default_max_inbox_forwarding_recursion_depth")]
    pub max_inbox_forwarding_recursion_depth: u32,
    /// Bound on recursive collection expansion during delivery recipient
    /// resolution (`spec.md` §4.G step 2).
    #[serde(default = "default_max_delivery_recursion_depth")]
    pub max_delivery_recursion_depth: u32,
    /// Default collection page size (`spec.md` §4.E).
    #[serde(default = "default_collection_page_size")]
    pub collection_page_size: i64,
    /// Delivery retry backoff base, seconds.
    #[serde(default = "default_delivery_retry_base_seconds")]
    pub delivery_retry_base_seconds: u64,
    /// Delivery retry backoff cap, seconds.
    #[serde(default = "default_delivery_retry_cap_seconds")]
    pub delivery_retry_cap_seconds: u64,
    /// Delivery attempt limit before giving up.
    #[serde(default = "default_delivery_max_attempts")]
    pub delivery_max_attempts: u32,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_inbox_forwarding_recursion_depth: default_max_inbox_forwarding_recursion_depth(),
            max_delivery_recursion_depth: default_max_delivery_recursion_depth(),
            collection_page_size: default_collection_page_size(),
            delivery_retry_base_seconds: default_delivery_retry_base_seconds(),
            delivery_retry_cap_seconds: default_delivery_retry_cap_seconds(),
            delivery_max_attempts: default_delivery_max_attempts(),
        }
    }
}

fn default_max_inbox_forwarding_recursion_depth() -> u32 {
    4
}

fn default_max_delivery_recursion_depth() -> u32 {
    4
}

fn default_collection_page_size() -> i64 {
    30
}

fn default_delivery_retry_base_seconds() -> u64 {
    30
}

fn default_delivery_retry_cap_seconds() -> u64 {
    3600
}

fn default_delivery_max_attempts() -> u32 {
    5
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (RUSTRESORT_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("cache.timeline_max_items", 2000)?
            .set_default("cache.profile_ttl", 86400)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("federation.max_inbox_forwarding_recursion_depth", 4)?
            .set_default("federation.max_delivery_recursion_depth", 4)?
            .set_default("federation.collection_page_size", 30)?
            .set_default("federation.delivery_retry_base_seconds", 30)?
            .set_default("federation.delivery_retry_cap_seconds", 3600)?
            .set_default("federation.delivery_max_attempts", 5)?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (RUSTRESORT_*)
            .add_source(
                Environment::with_prefix("RUSTRESORT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))
    }
}
