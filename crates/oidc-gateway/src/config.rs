use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream API server and the credentials used to reach it
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.host.parse::<IpAddr>().is_err() {
            return Err(format!(
                "server.host must be an IP address, got '{}'",
                self.server.host
            ));
        }
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_secs <= self.upstream.timeout_secs {
            return Err("server.request_timeout_secs must be greater than upstream.timeout_secs".into());
        }
        // Upstream validations
        if self.upstream.timeout_secs == 0 {
            return Err("upstream.timeout_secs must be > 0".into());
        }
        match url::Url::parse(&self.upstream.base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => {
                return Err(format!(
                    "upstream.base_url must use http or https, got '{}'",
                    u.scheme()
                ));
            }
            Err(e) => return Err(format!("upstream.base_url is not a valid URL: {e}")),
        }
        if self.upstream.token_path.as_os_str().is_empty() {
            return Err("upstream.token_path must not be empty".into());
        }
        if self.upstream.ca_cert_path.as_os_str().is_empty() {
            return Err("upstream.ca_cert_path must not be empty".into());
        }
        // Cache validations
        if self.cache.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Listen address. Only meaningful after [`validate`](Self::validate).
    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for handling a single request, upstream fetch included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Grace period for in-flight requests after a shutdown signal
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Upstream API server configuration.
///
/// Defaults target the in-cluster Kubernetes API server using the pod's
/// projected service-account credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL; document paths are appended verbatim.
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,

    /// File holding the bearer token. Read once at startup.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// PEM bundle of trust anchors for the upstream certificate.
    /// The system trust store is never consulted.
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,
}

fn default_upstream_base_url() -> String {
    "https://kubernetes.default.svc".into()
}
fn default_upstream_timeout_secs() -> u64 {
    5
}
fn default_token_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}
fn default_ca_cert_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt")
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            timeout_secs: default_upstream_timeout_secs(),
            token_path: default_token_path(),
            ca_cert_path: default_ca_cert_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a fetched document is served without asking the upstream again
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// `max-age` advertised to clients. Falls back to `ttl_secs`.
    #[serde(default)]
    pub client_max_age_secs: Option<u64>,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn client_max_age(&self) -> Duration {
        Duration::from_secs(self.client_max_age_secs.unwrap_or(self.ttl_secs))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            client_max_age_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Re-indent upstream JSON before caching it
    #[serde(default = "default_pretty_print")]
    pub pretty_print: bool,
}

fn default_pretty_print() -> bool {
    true
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            pretty_print: default_pretty_print(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
    use std::path::PathBuf;

    /// Default configuration file, used when no path is given and it exists.
    pub const DEFAULT_CONFIG_FILE: &str = "oidc-gateway.toml";

    /// Plain environment variables accepted for compatibility with existing
    /// deployment manifests, mapped onto their configuration keys.
    const FLAT_STRING_VARS: &[(&str, &str)] = &[
        ("LISTEN_ADDR", "server.host"),
        ("UPSTREAM_HOST", "upstream.base_url"),
        ("SA_TOKEN_PATH", "upstream.token_path"),
        ("SA_CA_CERT_PATH", "upstream.ca_cert_path"),
        ("LOG_LEVEL", "logging.level"),
    ];
    const FLAT_INT_VARS: &[(&str, &str)] = &[
        ("LISTEN_PORT", "server.port"),
        ("UPSTREAM_TIMEOUT_SECONDS", "upstream.timeout_secs"),
        ("CACHE_TTL_SECONDS", "cache.ttl_secs"),
        ("CLIENT_CACHE_TTL_SECONDS", "cache.client_max_age_secs"),
    ];
    const FLAT_BOOL_VARS: &[(&str, &str)] = &[("PRETTY_PRINT_JSON", "response.pretty_print")];

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., OIDC_GATEWAY__CACHE__TTL_SECS=120
        builder = builder.add_source(
            Environment::with_prefix("OIDC_GATEWAY")
                .try_parsing(true)
                .separator("__"),
        );
        builder = apply_flat_env(builder)?;
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    /// Applies the flat variables on top of every other source.
    ///
    /// A value that does not parse is ignored, leaving the lower layer in effect.
    fn apply_flat_env(
        mut builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, String> {
        for (var, key) in FLAT_STRING_VARS {
            let value = flat_var(var);
            builder = builder
                .set_override_option(*key, value)
                .map_err(|e| format!("config override error for {var}: {e}"))?;
        }
        for (var, key) in FLAT_INT_VARS {
            let value = flat_var(var).and_then(|raw| match raw.trim().parse::<i64>() {
                Ok(n) if n >= 0 => Some(n),
                _ => {
                    tracing::warn!(var, value = %raw, "ignoring non-numeric environment variable");
                    None
                }
            });
            builder = builder
                .set_override_option(*key, value)
                .map_err(|e| format!("config override error for {var}: {e}"))?;
        }
        for (var, key) in FLAT_BOOL_VARS {
            let value = flat_var(var).and_then(|raw| {
                let parsed = parse_flag(&raw);
                if parsed.is_none() {
                    tracing::warn!(var, value = %raw, "ignoring non-boolean environment variable");
                }
                parsed
            });
            builder = builder
                .set_override_option(*key, value)
                .map_err(|e| format!("config override error for {var}: {e}"))?;
        }
        Ok(builder)
    }

    fn flat_var(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    /// Parses the boolean spellings accepted by deployment tooling.
    pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
        match raw.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.upstream.base_url, "https://kubernetes.default.svc");
        assert_eq!(cfg.upstream.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(60));
        assert_eq!(cfg.cache.client_max_age(), Duration::from_secs(60));
        assert!(cfg.response.pretty_print);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_client_max_age_override() {
        let cfg = CacheConfig {
            ttl_secs: 60,
            client_max_age_secs: Some(3600),
        };
        assert_eq!(cfg.client_max_age(), Duration::from_secs(3600));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.cache.ttl_secs = 0;
        assert!(cfg.validate().unwrap_err().contains("cache.ttl_secs"));

        let mut cfg = AppConfig::default();
        cfg.upstream.base_url = "ftp://example.com".into();
        assert!(cfg.validate().unwrap_err().contains("http or https"));

        let mut cfg = AppConfig::default();
        cfg.upstream.base_url = "not a url".into();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.upstream.timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));

        let mut cfg = AppConfig::default();
        cfg.server.host = "localhost".into();
        assert!(cfg.validate().unwrap_err().contains("server.host"));

        let mut cfg = AppConfig::default();
        cfg.server.host = "::".into();
        assert!(cfg.validate().is_ok());

        let mut cfg = AppConfig::default();
        cfg.server.request_timeout_secs = 5;
        cfg.upstream.timeout_secs = 5;
        assert!(
            cfg.validate()
                .unwrap_err()
                .contains("server.request_timeout_secs")
        );
    }

    #[test]
    fn test_addr() {
        let mut cfg = AppConfig::default();
        cfg.server.host = "127.0.0.1".into();
        cfg.server.port = 9090;
        assert_eq!(cfg.addr().to_string(), "127.0.0.1:9090");
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(loader::parse_flag("true"), Some(true));
        assert_eq!(loader::parse_flag("0"), Some(false));
        assert_eq!(loader::parse_flag("F"), Some(false));
        assert_eq!(loader::parse_flag("not-a-bool"), None);
    }
}
