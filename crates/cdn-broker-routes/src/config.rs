//! Configuration for the route broker.

use std::collections::HashMap;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{RouteError, RouteResult};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrokerConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// CDN collaborator configuration.
    #[serde(default)]
    pub cdn: CdnConfig,

    /// Renewal sweep configuration.
    #[serde(default)]
    pub renewal: RenewalConfig,
}

impl BrokerConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default values
    /// 2. `broker.toml` in the current directory (if present)
    /// 3. Environment variables with `CDN_BROKER_` prefix
    pub fn load() -> RouteResult<Self> {
        Figment::new()
            .merge(Toml::file("broker.toml"))
            .merge(Env::prefixed("CDN_BROKER_").split("__"))
            .extract()
            .map_err(|e| RouteError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> RouteResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CDN_BROKER_").split("__"))
            .extract()
            .map_err(|e| RouteError::Config(e.to_string()))
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/cdn_broker".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// CDN collaborator configuration.
///
/// `prefix` and `bucket` are consumed by the CDN implementation: the
/// prefix namespaces distribution caller references, and the bucket is the
/// challenge origin serving `/.well-known/acme-challenge/*`. The route
/// manager itself reads only the forwarded headers and tags.
#[derive(Debug, Clone, Deserialize)]
pub struct CdnConfig {
    /// Prefix for distribution caller references.
    #[serde(default)]
    pub prefix: String,

    /// S3 bucket serving ACME HTTP-01 challenges.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Request headers forwarded to tenant origins.
    #[serde(default = "default_forwarded_headers")]
    pub forwarded_headers: Vec<String>,

    /// Tags applied to every distribution the broker creates.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_bucket() -> String {
    "cdn-broker-challenge".to_owned()
}

fn default_forwarded_headers() -> Vec<String> {
    vec!["Host".to_owned()]
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            bucket: default_bucket(),
            forwarded_headers: default_forwarded_headers(),
            tags: HashMap::new(),
        }
    }
}

/// Renewal sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalConfig {
    /// How often the sweeper checks for near-expiry certificates (seconds).
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

const fn default_check_interval_secs() -> u64 {
    43_200 // 12 hours
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BrokerConfig::default();
        assert_eq!(config.database.url, "postgres://localhost/cdn_broker");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.cdn.forwarded_headers, vec!["Host"]);
        assert_eq!(config.renewal.check_interval_secs, 43_200);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [database]
            url = "postgres://user:pass@db:5432/broker"
            max_connections = 20

            [cdn]
            prefix = "prod-"
            bucket = "prod-challenge"
            forwarded_headers = ["Host", "Authorization"]

            [cdn.tags]
            team = "platform"

            [renewal]
            check_interval_secs = 3600
        "#;

        let config: BrokerConfig = toml::from_str(toml).expect("parse failed");
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/broker");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.cdn.prefix, "prod-");
        assert_eq!(config.cdn.bucket, "prod-challenge");
        assert_eq!(config.cdn.forwarded_headers, vec!["Host", "Authorization"]);
        assert_eq!(config.cdn.tags.get("team").map(String::as_str), Some("platform"));
        assert_eq!(config.renewal.check_interval_secs, 3600);
    }
}
