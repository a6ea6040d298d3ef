use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub local: LocalDeviceConfig,
    #[serde(default)]
    pub multicast: MulticastConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub details: DetailsConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Empty selects the in-memory store.
    #[serde(default)]
    pub url: String,
    /// Connection pool max size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Automatic migration on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// Local capture device probing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalDeviceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Device indices 0..max_device_index are probed
    #[serde(default = "default_max_device_index")]
    pub max_device_index: u32,
    /// Per-device frame read timeout in milliseconds
    #[serde(default = "default_local_frame_timeout")]
    pub frame_timeout_ms: u64,
}

fn default_max_device_index() -> u32 {
    5
}

fn default_local_frame_timeout() -> u64 {
    2000
}

/// WS-Discovery multicast probe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MulticastConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local address the probe socket binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Listen window in seconds
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_discovery_timeout() -> u64 {
    5
}

/// Which hosts of the network range are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ScanCoverage {
    /// Every usable host of the range
    FullRange,
    /// Only hosts whose last octet lies in `first..=last`
    HostRange { first: u8, last: u8 },
}

impl Default for ScanCoverage {
    fn default() -> Self {
        ScanCoverage::FullRange
    }
}

/// Brute-force subnet scan
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// CIDR to scan. When unset the local /24 is used.
    #[serde(default)]
    pub network_range: Option<String>,
    #[serde(default)]
    pub coverage: ScanCoverage,
    #[serde(default = "default_scan_ports")]
    pub ports: Vec<u16>,
    /// Maximum in-flight connection attempts
    #[serde(default = "default_scan_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,
    /// Hard deadline for the whole scan
    #[serde(default = "default_scan_budget")]
    pub budget_secs: u64,
    /// Paths requested on open HTTP ports when classifying a host
    #[serde(default = "default_probe_paths")]
    pub probe_paths: Vec<String>,
}

fn default_scan_ports() -> Vec<u16> {
    vec![80, 554, 8000, 8080, 8081, 8554, 8888, 9000]
}

fn default_scan_concurrency() -> usize {
    50
}

fn default_connect_timeout() -> u64 {
    1500
}

fn default_http_timeout() -> u64 {
    3000
}

fn default_scan_budget() -> u64 {
    30
}

fn default_probe_paths() -> Vec<String> {
    vec![
        "/".to_string(),
        "/web/".to_string(),
        "/cgi-bin/".to_string(),
        "/onvif/device_service".to_string(),
    ]
}

/// Username/password pair tried against discovered devices
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialConfig {
    pub username: String,
    pub password: String,
}

/// Device detail enrichment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetailsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Credentials tried in order after an anonymous attempt
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_rtsp_paths")]
    pub rtsp_paths: Vec<String>,
    #[serde(default = "default_http_stream_paths")]
    pub http_paths: Vec<String>,
    /// Timeout for a single ONVIF or HTTP request
    #[serde(default = "default_http_timeout")]
    pub request_timeout_ms: u64,
}

fn default_rtsp_port() -> u16 {
    554
}

fn default_rtsp_paths() -> Vec<String> {
    [
        "/stream1",
        "/stream2",
        "/live",
        "/ch01",
        "/ch02",
        "/av0_0",
        "/av0_1",
        "/h264",
        "/cam/realmonitor?channel=1&subtype=0",
        "/Streaming/Channels/101",
        "/axis-media/media.amp",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_http_stream_paths() -> Vec<String> {
    ["/video.cgi", "/mjpeg", "/stream.mjpeg", "/videostream.cgi"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Frame validation gate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationConfig {
    /// Time allowed to open a source and decode one frame
    #[serde(default = "default_validation_timeout")]
    pub frame_timeout_ms: u64,
    /// Candidates validated at once
    #[serde(default = "default_validation_concurrency")]
    pub concurrency: usize,
}

fn default_validation_timeout() -> u64 {
    5000
}

fn default_validation_concurrency() -> usize {
    4
}

/// Reconciliation policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    /// Set `is_active` on existing cameras that were detected working
    #[serde(default = "default_true")]
    pub reactivate_on_detection: bool,
}

/// Continuous detection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Start the background loop with the daemon
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Pause after a failed round
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Bounded wait for the worker when stopping
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

fn default_interval() -> u64 {
    300
}

fn default_backoff() -> u64 {
    10
}

fn default_stop_timeout() -> u64 {
    1000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            auto_migrate: true,
        }
    }
}

impl Default for LocalDeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_device_index: default_max_device_index(),
            frame_timeout_ms: default_local_frame_timeout(),
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: default_listen_address(),
            timeout_secs: default_discovery_timeout(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            network_range: None,
            coverage: ScanCoverage::default(),
            ports: default_scan_ports(),
            concurrency: default_scan_concurrency(),
            connect_timeout_ms: default_connect_timeout(),
            http_timeout_ms: default_http_timeout(),
            budget_secs: default_scan_budget(),
            probe_paths: default_probe_paths(),
        }
    }
}

impl Default for DetailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials: Vec::new(),
            rtsp_port: default_rtsp_port(),
            rtsp_paths: default_rtsp_paths(),
            http_paths: default_http_stream_paths(),
            request_timeout_ms: default_http_timeout(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: default_validation_timeout(),
            concurrency: default_validation_concurrency(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reactivate_on_detection: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            interval_secs: default_interval(),
            backoff_secs: default_backoff(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            local: LocalDeviceConfig::default(),
            multicast: MulticastConfig::default(),
            scanner: ScannerConfig::default(),
            details: DetailsConfig::default(),
            validation: ValidationConfig::default(),
            reconciler: ReconcilerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            let config = if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(anyhow::anyhow!("Unsupported config file format"));
            };

            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"

            [scanner]
            network_range = "10.0.0.0/24"
            coverage = { policy = "host_range", first = 200, last = 250 }

            [scheduler]
            interval_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.scanner.network_range.as_deref(), Some("10.0.0.0/24"));
        assert_eq!(
            config.scanner.coverage,
            ScanCoverage::HostRange {
                first: 200,
                last: 250
            }
        );
        assert_eq!(config.scanner.concurrency, 50);
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.scheduler.backoff_secs, 10);
        assert_eq!(config.multicast.listen_address, "0.0.0.0");
        assert!(config.database.url.is_empty());
    }

    #[test]
    fn json_config_is_accepted() {
        let dir = std::env::temp_dir().join(format!("camcfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"local": {"max_device_index": 8}}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.local.max_device_index, 8);
        assert_eq!(config.local.frame_timeout_ms, 2000);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_config(Some(Path::new("/tmp/config.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read") || err.to_string().contains("Unsupported"));
    }
}
