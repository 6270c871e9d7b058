// Configuration module - loads and validates the exporter settings
//
// This module is responsible for:
// 1. Reading the JSON configuration file given on the command line
// 2. Applying documented defaults for missing or zero values
// 3. Checking that every enabled source has a configuration section
// 4. Providing strongly-typed access to per-source settings

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Port the exposition endpoint listens on when none is configured
pub const DEFAULT_BASE_PORT: u16 = 9500;

/// Daily call quota for the weather API when none is configured
pub const DEFAULT_CALL_LIMIT: u32 = 1000;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown source kind in 'enabled': {0}")]
    UnknownSource(String),

    #[error("Missing required setting: {0}")]
    MissingRequiredSetting(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// The kinds of scrape source the exporter knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    OpenWeatherMap,
    Sabnzbd,
    Netgear,
    Icmp,
    Dns,
}

impl SourceKind {
    /// Name used in the `enabled` list, in logs and in the `exporter` label
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::OpenWeatherMap => "openweathermap",
            SourceKind::Sabnzbd => "sabnzbd",
            SourceKind::Netgear => "netgear",
            SourceKind::Icmp => "icmp",
            SourceKind::Dns => "dns",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openweathermap" => Ok(SourceKind::OpenWeatherMap),
            "sabnzbd" => Ok(SourceKind::Sabnzbd),
            "netgear" => Ok(SourceKind::Netgear),
            "icmp" => Ok(SourceKind::Icmp),
            "dns" => Ok(SourceKind::Dns),
            other => Err(ConfigError::UnknownSource(other.to_string())),
        }
    }
}

/// Top-level configuration file
///
/// # Example
/// ```json
/// {
///   "base_port": 9500,
///   "enabled": ["openweathermap", "icmp"],
///   "openweathermap": {
///     "base_url": "https://api.openweathermap.org",
///     "version": 2.5,
///     "endpoint": "weather",
///     "location": "Oslo",
///     "api_key": "...",
///     "interval": 120
///   },
///   "icmp": { "hosts": ["router.lan", "nas.lan"], "interval": 30 }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Port of the /metrics endpoint
    #[serde(default)]
    pub base_port: u16,

    /// Source kinds to construct; anything not listed is never touched
    #[serde(default)]
    pub enabled: Vec<String>,

    /// Settings for the shared HTTP client
    #[serde(default)]
    pub api_client: ApiClientConfig,

    pub openweathermap: Option<WeatherConfig>,
    pub sabnzbd: Option<SabnzbdConfig>,
    pub netgear: Option<NetgearConfig>,
    pub icmp: Option<IcmpConfig>,
    pub dns: Option<DnsConfig>,
}

/// Settings for the HTTP client shared by the API-backed sources
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiClientConfig {
    /// Request timeout in seconds
    pub timeout: u64,
    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        ApiClientConfig {
            timeout: 10,
            user_agent: concat!("master-exporter/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// OpenWeatherMap settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub version: f32,
    pub endpoint: String,
    pub location: String,
    pub api_key: String,
    pub units: String,
    /// Daily call quota
    pub limit: u32,
    /// Scrape interval in seconds
    pub interval: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            base_url: String::new(),
            version: 0.0,
            endpoint: String::new(),
            location: String::new(),
            api_key: String::new(),
            units: "metric".to_string(),
            limit: DEFAULT_CALL_LIMIT,
            interval: 120,
        }
    }
}

impl WeatherConfig {
    /// Full request URL for the current-weather call
    pub fn url(&self) -> String {
        format!(
            "{}/data/{:.1}/{}?q={}&units={}&appid={}",
            self.base_url.trim_end_matches('/'),
            self.version,
            self.endpoint,
            self.location,
            self.units,
            self.api_key,
        )
    }
}

/// SABnzbd settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SabnzbdConfig {
    pub base_url: String,
    pub api_key: String,
    pub interval: u64,
    /// Optional daily call quota; unlimited when absent
    pub limit: Option<u32>,
}

impl Default for SabnzbdConfig {
    fn default() -> Self {
        SabnzbdConfig {
            base_url: String::new(),
            api_key: String::new(),
            interval: 60,
            limit: None,
        }
    }
}

impl SabnzbdConfig {
    /// Request URL for one API mode (`queue`, `server_stats`)
    pub fn url(&self, mode: &str) -> String {
        format!(
            "{}/api?output=json&apikey={}&mode={}",
            self.base_url.trim_end_matches('/'),
            self.api_key,
            mode,
        )
    }
}

/// Netgear switch discovery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetgearConfig {
    pub interval: u64,
    /// Interface whose MAC address is used as the request's host MAC
    pub interface: Option<String>,
    /// Explicit host MAC (`aa:bb:cc:dd:ee:ff`); wins over `interface`
    pub host_mac: Option<String>,
    /// Local address the discovery socket binds to
    pub bind_address: String,
    /// Address requests are sent to
    pub target_address: String,
    pub host_port: u16,
    pub device_port: u16,
    /// Receive window in seconds
    pub timeout: u64,
}

impl Default for NetgearConfig {
    fn default() -> Self {
        NetgearConfig {
            interval: 60,
            interface: None,
            host_mac: None,
            bind_address: "0.0.0.0".to_string(),
            target_address: "255.255.255.255".to_string(),
            host_port: 63321,
            device_port: 63322,
            timeout: 2,
        }
    }
}

/// ICMP ping settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IcmpConfig {
    pub hosts: Vec<String>,
    pub interval: u64,
    /// Echo requests per host per scrape
    pub count: u32,
    /// Payload size in bytes
    pub size: u32,
    pub ttl: u32,
    /// Deadline per host in seconds
    pub timeout: u64,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        IcmpConfig {
            hosts: Vec::new(),
            interval: 60,
            count: 4,
            size: 24,
            ttl: 64,
            timeout: 5,
        }
    }
}

/// DNS resolution settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub hosts: Vec<String>,
    pub interval: u64,
    /// Lookup timeout in seconds
    pub timeout: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            hosts: Vec::new(),
            interval: 60,
            timeout: 5,
        }
    }
}

/// Replaces a zero value with its default
fn or_default<T: PartialEq + Default>(value: &mut T, default: T) {
    if *value == T::default() {
        *value = default;
    }
}

impl AppConfig {
    /// Reads, parses and validates the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: AppConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Applies defaults and checks consistency
    ///
    /// # Errors
    /// * `UnknownSource` - `enabled` names a kind that does not exist
    /// * `MissingRequiredSetting` - an enabled kind has no section
    /// * `InvalidSettings` - a section holds unusable values
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        or_default(&mut self.base_port, DEFAULT_BASE_PORT);
        or_default(&mut self.api_client.timeout, 10);

        if let Some(cnf) = self.openweathermap.as_mut() {
            or_default(&mut cnf.limit, DEFAULT_CALL_LIMIT);
            or_default(&mut cnf.interval, 120);
            or_default(&mut cnf.units, "metric".to_string());
        }
        if let Some(cnf) = self.sabnzbd.as_mut() {
            or_default(&mut cnf.interval, 60);
        }
        if let Some(cnf) = self.netgear.as_mut() {
            or_default(&mut cnf.interval, 60);
            or_default(&mut cnf.timeout, 2);
        }
        if let Some(cnf) = self.icmp.as_mut() {
            or_default(&mut cnf.interval, 60);
            or_default(&mut cnf.count, 4);
            or_default(&mut cnf.timeout, 5);
        }
        if let Some(cnf) = self.dns.as_mut() {
            or_default(&mut cnf.interval, 60);
            or_default(&mut cnf.timeout, 5);
        }

        let mut seen = Vec::new();
        for name in &self.enabled {
            let kind: SourceKind = name.parse()?;
            if seen.contains(&kind) {
                warn!("Source '{}' is listed twice in 'enabled'", kind);
                continue;
            }
            seen.push(kind);
            self.check_section(kind)?;
        }

        if seen.is_empty() {
            warn!("No sources enabled; only the metrics endpoint will run");
        }

        Ok(())
    }

    fn check_section(&self, kind: SourceKind) -> Result<(), ConfigError> {
        let missing = || ConfigError::MissingRequiredSetting(kind.name().to_string());

        match kind {
            SourceKind::OpenWeatherMap => {
                let cnf = self.openweathermap.as_ref().ok_or_else(missing)?;
                if cnf.base_url.is_empty() || cnf.location.is_empty() {
                    return Err(ConfigError::InvalidSettings(
                        "openweathermap needs 'base_url' and 'location'".to_string(),
                    ));
                }
            }
            SourceKind::Sabnzbd => {
                let cnf = self.sabnzbd.as_ref().ok_or_else(missing)?;
                if cnf.base_url.is_empty() {
                    return Err(ConfigError::InvalidSettings(
                        "sabnzbd needs 'base_url'".to_string(),
                    ));
                }
            }
            SourceKind::Netgear => {
                self.netgear.as_ref().ok_or_else(missing)?;
            }
            SourceKind::Icmp => {
                let cnf = self.icmp.as_ref().ok_or_else(missing)?;
                if cnf.hosts.is_empty() {
                    warn!("icmp is enabled but has no hosts");
                }
            }
            SourceKind::Dns => {
                let cnf = self.dns.as_ref().ok_or_else(missing)?;
                if cnf.hosts.is_empty() {
                    warn!("dns is enabled but has no hosts");
                }
            }
        }

        Ok(())
    }

    /// Enabled source kinds in the order they were listed, without duplicates
    pub fn enabled_sources(&self) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        for kind in self.enabled.iter().filter_map(|name| name.parse().ok()) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "enabled": ["openweathermap", "icmp", "dns"],
        "openweathermap": {
            "base_url": "https://api.openweathermap.org/",
            "version": 2.5,
            "endpoint": "weather",
            "location": "Oslo",
            "api_key": "secret"
        },
        "icmp": { "hosts": ["router.lan"], "interval": 30 },
        "dns": { "hosts": ["example.com"] }
    }"#;

    fn parse(text: &str) -> Result<AppConfig, ConfigError> {
        let mut config: AppConfig = serde_json::from_str(text).unwrap();
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = parse(SAMPLE).unwrap();

        assert_eq!(config.base_port, DEFAULT_BASE_PORT);
        assert_eq!(config.api_client.timeout, 10);

        let weather = config.openweathermap.as_ref().unwrap();
        assert_eq!(weather.limit, DEFAULT_CALL_LIMIT);
        assert_eq!(weather.interval, 120);
        assert_eq!(weather.units, "metric");

        let icmp = config.icmp.as_ref().unwrap();
        assert_eq!(icmp.interval, 30);
        assert_eq!((icmp.count, icmp.size, icmp.ttl), (4, 24, 64));

        assert_eq!(config.dns.as_ref().unwrap().interval, 60);
        assert!(config.netgear.is_none());
    }

    #[test]
    fn test_zero_limit_falls_back_to_default() {
        let config = parse(
            r#"{"enabled": ["openweathermap"],
                "openweathermap": {"base_url": "http://x", "location": "y", "limit": 0}}"#,
        )
        .unwrap();

        assert_eq!(config.openweathermap.unwrap().limit, 1000);
    }

    #[test]
    fn test_enabled_sources_keep_order() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(
            config.enabled_sources(),
            vec![SourceKind::OpenWeatherMap, SourceKind::Icmp, SourceKind::Dns]
        );
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let err = parse(r#"{"enabled": ["gopher"]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSource(name) if name == "gopher"));
    }

    #[test]
    fn test_enabled_source_needs_a_section() {
        let err = parse(r#"{"enabled": ["netgear"]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredSetting(name) if name == "netgear"));

        // A section for a source that is not enabled is fine
        assert!(parse(r#"{"enabled": [], "netgear": {}}"#).is_ok());
    }

    #[test]
    fn test_urls() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(
            config.openweathermap.unwrap().url(),
            "https://api.openweathermap.org/data/2.5/weather?q=Oslo&units=metric&appid=secret"
        );

        let sab = SabnzbdConfig {
            base_url: "http://nzb.lan:8080".to_string(),
            api_key: "k".to_string(),
            ..SabnzbdConfig::default()
        };
        assert_eq!(
            sab.url("queue"),
            "http://nzb.lan:8080/api?output=json&apikey=k&mode=queue"
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.enabled.len(), 3);

        let missing = AppConfig::load(Path::new("/nonexistent/master-exporter.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
