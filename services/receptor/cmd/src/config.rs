//! Configuration handling for the receptor binary.
//!
//! Values come from the YAML config file, then `RECEPTOR_*` environment
//! variables, then command-line flags, each layer overriding the previous.

use anyhow::Result;
use receptor_grpc::{CancelSignal, ClientConfig, TlsSettings, DEFAULT_CHUNK_SIZE};
use receptor_report::{BatchOptions, PackageOptions};
use receptor_wire::DEFAULT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file looked up in the home directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = ".receptor.yaml";

/// Receptor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceptorConfig {
    /// Collector host
    pub host: String,
    /// Collector port
    pub port: u16,
    /// Bearer token for the collector
    pub access_token: Option<String>,
    /// Per-call timeout (seconds)
    pub timeout: u64,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Multipart copy buffer in bytes
    pub buffer_size: usize,
    /// Transport unit size in bytes
    pub chunk_size: usize,
    /// Bundles reported concurrently
    pub max_concurrent_bundles: usize,
    /// Directory for temporary spools
    pub spool_dir: Option<PathBuf>,
    /// Build and inspect bundles without sending them
    pub dry_run: bool,
    /// TLS configuration
    pub tls: TlsConfig,
}

/// TLS configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether TLS is enabled
    pub enabled: bool,
    /// Path to CA certificate file
    pub ca_file: Option<PathBuf>,
    /// Server name to verify
    pub domain: Option<String>,
}

impl Default for ReceptorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8888,
            access_token: None,
            timeout: 30,
            connect_timeout: 10,
            buffer_size: DEFAULT_BUFFER_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_bundles: 1,
            spool_dir: None,
            dry_run: false,
            tls: TlsConfig::default(),
        }
    }
}

impl ReceptorConfig {
    /// `~/.receptor.yaml`, or the working directory when no home is set
    pub fn default_path() -> PathBuf {
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(DEFAULT_CONFIG_FILE),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<ReceptorConfig>(&content) {
                Ok(parsed) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    parsed
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", config_path.as_ref(), e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
        };

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Final receptor configuration: collector={}:{}, tls={}, buffer_size={}, chunk_size={}, concurrency={}",
            config.host,
            config.port,
            config.tls.enabled,
            config.buffer_size,
            config.chunk_size,
            config.max_concurrent_bundles
        );

        Ok(config)
    }

    /// Apply `RECEPTOR_*` environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("RECEPTOR_HOST") {
            info!("Collector host overridden by environment: {}", host);
            self.host = host;
        }
        override_parsed(&lookup, "RECEPTOR_PORT", &mut self.port);
        if let Some(token) = lookup("RECEPTOR_ACCESS_TOKEN") {
            info!("Access token overridden by environment");
            self.access_token = Some(token);
        }
        override_parsed(&lookup, "RECEPTOR_TIMEOUT", &mut self.timeout);
        override_parsed(&lookup, "RECEPTOR_CONNECT_TIMEOUT", &mut self.connect_timeout);
        override_parsed(&lookup, "RECEPTOR_BUFFER_SIZE", &mut self.buffer_size);
        override_parsed(&lookup, "RECEPTOR_CHUNK_SIZE", &mut self.chunk_size);
        override_parsed(&lookup, "RECEPTOR_MAX_CONCURRENT_BUNDLES", &mut self.max_concurrent_bundles);
        if let Some(dir) = lookup("RECEPTOR_SPOOL_DIR") {
            info!("Spool directory overridden by environment: {}", dir);
            self.spool_dir = Some(PathBuf::from(dir));
        }
        if let Some(dry_run) = lookup("RECEPTOR_DRY_RUN") {
            self.dry_run = parse_flag(&dry_run);
        }
        if let Some(enabled) = lookup("RECEPTOR_TLS_ENABLED") {
            self.tls.enabled = parse_flag(&enabled);
        }
        if let Some(ca_file) = lookup("RECEPTOR_TLS_CA_FILE") {
            self.tls.ca_file = Some(PathBuf::from(ca_file));
        }
        if let Some(domain) = lookup("RECEPTOR_TLS_DOMAIN") {
            self.tls.domain = Some(domain);
        }
    }

    /// Reject values that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("collector host must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("collector port must not be 0");
        }
        if self.max_concurrent_bundles == 0 {
            anyhow::bail!("max_concurrent_bundles must be at least 1");
        }
        Ok(())
    }

    /// Connection settings for the collector client
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            access_token: self.access_token.clone().filter(|t| !t.is_empty()),
            timeout: Duration::from_secs(self.timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            tls: TlsSettings {
                enabled: self.tls.enabled,
                ca_file: self.tls.ca_file.clone(),
                domain: self.tls.domain.clone(),
            },
        }
    }

    /// Per-bundle packaging settings
    pub fn package_options(&self, remove_source_files: bool, cancel: CancelSignal) -> PackageOptions {
        PackageOptions {
            buffer_size: self.buffer_size,
            chunk_size: self.chunk_size,
            spool_dir: self.spool_dir.clone(),
            remove_source_files,
            cancel,
        }
    }

    /// Batch settings
    pub fn batch_options(&self, remove_source_files: bool, cancel: CancelSignal) -> BatchOptions {
        BatchOptions {
            package: self.package_options(remove_source_files, cancel),
            max_concurrent_bundles: self.max_concurrent_bundles,
            dry_run: self.dry_run,
        }
    }
}

fn override_parsed<T: std::str::FromStr + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(value) => {
                info!("{} overridden by environment: {}", key, value);
                *target = value;
            }
            Err(_) => warn!("Ignoring unparseable {}={}", key, raw),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ReceptorConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8888);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.buffer_size, 5 * 1024 * 1024);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_concurrent_bundles, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
host: collector.example.com
port: 443
access_token: secret
chunk_size: 4096
max_concurrent_bundles: 4
tls:
  enabled: true
  domain: collector.example.com
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ReceptorConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.host, "collector.example.com");
        assert_eq!(config.port, 443);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_concurrent_bundles, 4);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.tls.enabled);
        assert_eq!(config.client_config().access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceptorConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.port, ReceptorConfig::default().port);

        let mut broken = NamedTempFile::new().unwrap();
        broken.write_all(b"port: [not a port").unwrap();
        let config = ReceptorConfig::load_from_file(broken.path()).unwrap();
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RECEPTOR_HOST", "10.0.0.5"),
            ("RECEPTOR_PORT", "9443"),
            ("RECEPTOR_CHUNK_SIZE", "not-a-number"),
            ("RECEPTOR_DRY_RUN", "true"),
            ("RECEPTOR_TLS_ENABLED", "1"),
        ]);
        let mut config = ReceptorConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 9443);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.dry_run);
        assert!(config.tls.enabled);
    }

    #[test]
    fn test_validation() {
        let config = ReceptorConfig {
            max_concurrent_bundles: 0,
            ..ReceptorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_options_carry_sizes() {
        let config = ReceptorConfig {
            buffer_size: 1234,
            chunk_size: 99,
            max_concurrent_bundles: 3,
            dry_run: true,
            ..ReceptorConfig::default()
        };
        let batch = config.batch_options(true, CancelSignal::never());
        assert_eq!(batch.package.buffer_size, 1234);
        assert_eq!(batch.package.chunk_size, 99);
        assert!(batch.package.remove_source_files);
        assert_eq!(batch.max_concurrent_bundles, 3);
        assert!(batch.dry_run);
    }
}
