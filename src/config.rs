use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const CACHE_PATH_ENV_VAR: &str = "USD_S3_CACHE_PATH";
pub const ENDPOINT_ENV_VAR: &str = "USD_S3_ENDPOINT";
pub const PROXY_HOST_ENV_VAR: &str = "USD_S3_PROXY_HOST";
pub const PROXY_PORT_ENV_VAR: &str = "USD_S3_PROXY_PORT";

const DEFAULT_PROXY_PORT: u16 = 80;
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP proxy for store requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Configuration for the resolver and its S3 client, read once at startup
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Root directory of the local cache (`<root>/<bucket>/<key>`)
    pub cache_root: PathBuf,
    /// Optional custom endpoint URL (MinIO, ActiveScale, LocalStack...)
    pub endpoint_url: Option<String>,
    /// Path-style addressing; on whenever a custom endpoint is set
    pub force_path_style: bool,
    pub proxy: Option<ProxyConfig>,
    /// Region used when the AWS default chain has none
    pub default_region: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            cache_root: std::env::temp_dir(),
            endpoint_url: None,
            force_path_style: false,
            proxy: None,
            default_region: DEFAULT_REGION.to_string(),
            connect_timeout: DEFAULT_TIMEOUT,
            operation_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ResolverConfig {
    /// Load configuration from the `USD_S3_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = ResolverConfig::default();

        if let Some(root) = get(CACHE_PATH_ENV_VAR) {
            config.cache_root = PathBuf::from(root);
        }

        if let Some(endpoint) = get(ENDPOINT_ENV_VAR) {
            config = config.with_endpoint(endpoint);
        }

        if let Some(host) = get(PROXY_HOST_ENV_VAR) {
            let port = match get(PROXY_PORT_ENV_VAR) {
                Some(port) => port
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid {PROXY_PORT_ENV_VAR}: {port}"))?,
                None => DEFAULT_PROXY_PORT,
            };
            config.proxy = Some(ProxyConfig { host, port });
        }

        Ok(config)
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// Use a custom endpoint; S3-compatible servers need path-style addressing
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self.force_path_style = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cache_root, std::env::temp_dir());
        assert_eq!(config.endpoint_url, None);
        assert!(!config.force_path_style);
        assert_eq!(config.proxy, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_env_overrides() {
        let config = ResolverConfig::from_lookup(lookup(&[
            (CACHE_PATH_ENV_VAR, "/var/cache/usd"),
            (ENDPOINT_ENV_VAR, "http://minio:9000"),
            (PROXY_HOST_ENV_VAR, "proxy.local"),
            (PROXY_PORT_ENV_VAR, "3128"),
        ]))
        .unwrap();

        assert_eq!(config.cache_root, PathBuf::from("/var/cache/usd"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://minio:9000"));
        assert!(config.force_path_style);
        assert_eq!(config.proxy.unwrap().url(), "http://proxy.local:3128");
    }

    #[test]
    fn test_proxy_default_port() {
        let config =
            ResolverConfig::from_lookup(lookup(&[(PROXY_HOST_ENV_VAR, "proxy.local")])).unwrap();
        assert_eq!(config.proxy.unwrap().port, 80);
    }

    #[test]
    fn test_invalid_proxy_port() {
        let result = ResolverConfig::from_lookup(lookup(&[
            (PROXY_HOST_ENV_VAR, "proxy.local"),
            (PROXY_PORT_ENV_VAR, "eighty"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = ResolverConfig::from_lookup(lookup(&[(ENDPOINT_ENV_VAR, "")])).unwrap();
        assert_eq!(config.endpoint_url, None);
    }
}
