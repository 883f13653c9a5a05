//! Agent configuration
//!
//! [`KansatsuConfig`] can be built in code, loaded from a TOML, YAML or JSON
//! file, and overridden from `KANSATSU_*` environment variables. Every section
//! has serde defaults, so a file only needs the keys it changes.
//!
//! ```toml
//! [service]
//! name = "support-bot"
//!
//! [publisher]
//! push_interval_ms = 2000
//! dashboard_url = "http://127.0.0.1:8050/update"
//!
//! [prices."gpt-4o-mini"]
//! prompt_per_1k = 0.00015
//! completion_per_1k = 0.0006
//! ```

use crate::rai::ScannerConfig;
use crate::telemetry::TelemetryConfig;
use crate::usage::PriceTable;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};
use thiserror::Error;

/// Dashboard endpoint used by the bundled live dashboard
pub const DEFAULT_DASHBOARD_URL: &str = "http://127.0.0.1:8050/update";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable parsing error: {0}")]
    EnvVarParse(String),
    #[error("File parsing error: {0}")]
    FileParse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KansatsuConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Per-model token prices; models without an entry have no cost
    #[serde(default)]
    pub prices: PriceTable,
}

/// Identity reported on spans and snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_version")]
    pub version: String,
}

/// Capacities of the registry's bounded buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Interaction samples kept (oldest dropped first)
    #[serde(default = "default_interaction_capacity")]
    pub interaction_capacity: usize,
    /// Recent durations kept per function for percentiles
    #[serde(default = "default_duration_window")]
    pub duration_window: usize,
    #[serde(default = "default_feedback_capacity")]
    pub feedback_capacity: usize,
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,
}

/// Snapshot push settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(
        rename = "push_interval_ms",
        with = "duration_millis",
        default = "default_push_interval"
    )]
    pub push_interval: Duration,
    /// Dashboard update endpoint; no HTTP sink when unset
    #[serde(default)]
    pub dashboard_url: Option<String>,
    #[serde(
        rename = "request_timeout_ms",
        with = "duration_millis",
        default = "default_request_timeout"
    )]
    pub request_timeout: Duration,
    /// Deliver a final snapshot and the session span at shutdown
    #[serde(default = "default_true")]
    pub export_on_shutdown: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            interaction_capacity: default_interaction_capacity(),
            duration_window: default_duration_window(),
            feedback_capacity: default_feedback_capacity(),
            alert_capacity: default_alert_capacity(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            push_interval: default_push_interval(),
            dashboard_url: None,
            request_timeout: default_request_timeout(),
            export_on_shutdown: true,
        }
    }
}

impl KansatsuConfig {
    /// Defaults with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.service.name = service_name.into();
        config
    }

    /// Builder pattern: push snapshots to a dashboard endpoint
    pub fn with_dashboard_url(mut self, url: impl Into<String>) -> Self {
        self.publisher.dashboard_url = Some(url.into());
        self
    }

    pub fn with_push_interval(mut self, interval: Duration) -> Self {
        self.publisher.push_interval = interval;
        self
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    /// Load configuration from a file (supports TOML, YAML, JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let extension = path.extension().and_then(|s| s.to_str());

        match extension {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            _ => Err(ConfigError::FileParse(
                "Unsupported file format. Use .toml, .yaml, .yml, or .json".to_string(),
            )),
        }
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_with_env()
    }

    /// Apply environment overrides (environment takes precedence)
    pub fn merge_with_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(name) = env::var("KANSATSU_SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(version) = env::var("KANSATSU_SERVICE_VERSION") {
            self.service.version = version;
        }
        if let Ok(url) = env::var("KANSATSU_DASHBOARD_URL") {
            self.publisher.dashboard_url = if url.trim().is_empty() {
                None
            } else {
                Some(url)
            };
        }
        if let Ok(interval) = env::var("KANSATSU_PUSH_INTERVAL_MS") {
            self.publisher.push_interval =
                Duration::from_millis(interval.parse().map_err(|e| {
                    ConfigError::EnvVarParse(format!("KANSATSU_PUSH_INTERVAL_MS: {}", e))
                })?);
        }
        if let Ok(capacity) = env::var("KANSATSU_INTERACTION_CAPACITY") {
            self.registry.interaction_capacity = capacity.parse().map_err(|e| {
                ConfigError::EnvVarParse(format!("KANSATSU_INTERACTION_CAPACITY: {}", e))
            })?;
        }
        if let Ok(export) = env::var("KANSATSU_EXPORT_ON_SHUTDOWN") {
            self.publisher.export_on_shutdown = export.parse().map_err(|e| {
                ConfigError::EnvVarParse(format!("KANSATSU_EXPORT_ON_SHUTDOWN: {}", e))
            })?;
        }
        if let Ok(exporter) = env::var("KANSATSU_SPAN_EXPORTER") {
            self.telemetry.exporter = exporter
                .parse()
                .map_err(|e| ConfigError::EnvVarParse(format!("KANSATSU_SPAN_EXPORTER: {}", e)))?;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Service name cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("registry.interaction_capacity", self.registry.interaction_capacity),
            ("registry.duration_window", self.registry.duration_window),
            ("registry.feedback_capacity", self.registry.feedback_capacity),
            ("registry.alert_capacity", self.registry.alert_capacity),
            ("telemetry.batch_size", self.telemetry.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.publisher.push_interval.is_zero() {
            return Err(ConfigError::Validation(
                "Push interval must be greater than 0".to_string(),
            ));
        }
        if self.publisher.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Dashboard request timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(dashboard_url) = &self.publisher.dashboard_url {
            let parsed = url::Url::parse(dashboard_url).map_err(|e| {
                ConfigError::Validation(format!("Invalid dashboard URL '{}': {}", dashboard_url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Validation(format!(
                    "Dashboard URL must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
        }

        for (model, price) in self.prices.iter() {
            let valid = |p: f64| p.is_finite() && p >= 0.0;
            if !valid(price.prompt_per_1k) || !valid(price.completion_per_1k) {
                return Err(ConfigError::Validation(format!(
                    "Prices for '{}' must be non-negative",
                    model
                )));
            }
        }

        Ok(())
    }
}

/// Custom serialization for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Default value functions for serde
fn default_service_name() -> String {
    "kansatsu-agent".to_string()
}

fn default_service_version() -> String {
    "1.0.0".to_string()
}

fn default_interaction_capacity() -> usize {
    1000
}

fn default_duration_window() -> usize {
    1024
}

fn default_feedback_capacity() -> usize {
    1000
}

fn default_alert_capacity() -> usize {
    500
}

fn default_push_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rai::{EntityType, RedactionStyle};
    use crate::telemetry::ExporterKind;
    use std::env;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = KansatsuConfig::default();
        assert_eq!(config.service.name, "kansatsu-agent");
        assert_eq!(config.service.version, "1.0.0");
        assert_eq!(config.registry.interaction_capacity, 1000);
        assert_eq!(config.registry.duration_window, 1024);
        assert_eq!(config.publisher.push_interval, Duration::from_secs(1));
        assert_eq!(config.publisher.request_timeout, Duration::from_millis(500));
        assert!(config.publisher.dashboard_url.is_none());
        assert!(config.publisher.export_on_shutdown);
        assert!(config.prices.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = KansatsuConfig::new("  ");
        assert!(config.validate().is_err());

        config.service.name = "svc".to_string();
        config.registry.interaction_capacity = 0;
        assert!(config.validate().is_err());

        config.registry.interaction_capacity = 10;
        config.publisher.push_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.publisher.push_interval = Duration::from_millis(250);
        config.publisher.dashboard_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.publisher.dashboard_url = Some("ftp://127.0.0.1/update".to_string());
        assert!(config.validate().is_err());

        config.publisher.dashboard_url = Some(DEFAULT_DASHBOARD_URL.to_string());
        assert!(config.validate().is_ok());

        config.prices = PriceTable::new().with_price("m", -1.0, 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_config_loading() {
        let toml_content = r#"
[service]
name = "support-bot"
version = "2.1.0"

[registry]
interaction_capacity = 50

[publisher]
push_interval_ms = 250
dashboard_url = "http://localhost:9000/update"
export_on_shutdown = false

[scanner]
categories = ["EMAIL", "PHONE_NUMBER"]
redaction = "mask"

[telemetry]
exporter = "console"

[prices."gpt-4o-mini"]
prompt_per_1k = 0.15
completion_per_1k = 0.6
"#;

        let temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        std::fs::write(temp_file.path(), toml_content).unwrap();

        let config = KansatsuConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.service.name, "support-bot");
        assert_eq!(config.registry.interaction_capacity, 50);
        // Unspecified keys keep their defaults
        assert_eq!(config.registry.duration_window, 1024);
        assert_eq!(config.publisher.push_interval, Duration::from_millis(250));
        assert!(!config.publisher.export_on_shutdown);
        assert!(config.scanner.categories.contains(&EntityType::Email));
        assert_eq!(config.scanner.categories.len(), 2);
        assert_eq!(config.scanner.redaction, RedactionStyle::Mask);
        assert_eq!(config.telemetry.exporter, ExporterKind::Console);
        assert!(config.prices.lookup("gpt-4o-mini-2024-07-18").is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_and_json_loading() {
        let yaml = NamedTempFile::with_suffix(".yaml").unwrap();
        std::fs::write(yaml.path(), "service:\n  name: yaml-svc\n").unwrap();
        assert_eq!(
            KansatsuConfig::from_file(yaml.path()).unwrap().service.name,
            "yaml-svc"
        );

        let json = NamedTempFile::with_suffix(".json").unwrap();
        std::fs::write(json.path(), r#"{"publisher": {"push_interval_ms": 50}}"#).unwrap();
        assert_eq!(
            KansatsuConfig::from_file(json.path())
                .unwrap()
                .publisher
                .push_interval,
            Duration::from_millis(50)
        );

        let ini = NamedTempFile::with_suffix(".ini").unwrap();
        assert!(matches!(
            KansatsuConfig::from_file(ini.path()),
            Err(ConfigError::FileParse(_))
        ));
    }

    #[test]
    fn test_env_var_loading() {
        env::set_var("KANSATSU_SERVICE_NAME", "env-svc");
        env::set_var("KANSATSU_PUSH_INTERVAL_MS", "125");
        env::set_var("KANSATSU_EXPORT_ON_SHUTDOWN", "false");

        let config = KansatsuConfig::new("file-svc").merge_with_env().unwrap();
        assert_eq!(config.service.name, "env-svc");
        assert_eq!(config.publisher.push_interval, Duration::from_millis(125));
        assert!(!config.publisher.export_on_shutdown);

        env::set_var("KANSATSU_PUSH_INTERVAL_MS", "soon");
        assert!(matches!(
            KansatsuConfig::from_env(),
            Err(ConfigError::EnvVarParse(_))
        ));

        // Clean up
        env::remove_var("KANSATSU_SERVICE_NAME");
        env::remove_var("KANSATSU_PUSH_INTERVAL_MS");
        env::remove_var("KANSATSU_EXPORT_ON_SHUTDOWN");
    }
}
