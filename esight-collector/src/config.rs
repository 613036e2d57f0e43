//! Collector configuration
//!
//! Handles:
//! - eSight address and credentials (password optionally in the OS keyring)
//! - MQTT broker settings and topics
//! - Polling cadence and task registration settings
//! - Audit log location
//!
//! Values come from a TOML file, then environment variables override them.

use anyhow::{anyhow, bail, Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const KEYRING_SERVICE: &str = "esight-collector";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub esight: EsightConfig,
    pub mqtt: MqttConfig,
    pub polling: PollingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsightConfig {
    /// Base URL, e.g. `https://10.0.0.5:32102`; `https://` is assumed when
    /// no scheme is given
    pub base_url: String,
    pub username: String,
    #[serde(skip_serializing)] // Never write the password back
    pub password: Option<String>,
    /// Read the password from the OS keyring when none is configured
    pub use_keyring: bool,
    /// eSight ships self-signed certificates
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
    pub system_id: String,
    /// Login attempts when a session has to be refreshed mid-run
    pub auth_retry_attempts: u32,
    pub auth_retry_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// When set, `host:port` of the broker is fetched from this URL at startup
    pub broker_lookup_url: Option<String>,
    pub lookup_timeout_secs: u64,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    /// Outgoing request queue of the MQTT client
    pub queue_capacity: usize,
    pub interface_topic: String,
    pub slot_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between registration and the first fetch
    pub warmup_secs: u64,
    pub interval_secs: u64,
    /// eSight `periodType` for created tasks
    pub collection_period: u8,
    pub task_prefix: String,
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory of the per-cycle audit files; `None` disables them
    pub dir: Option<PathBuf>,
}

impl Default for EsightConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: None,
            use_keyring: false,
            accept_invalid_certs: true,
            request_timeout_secs: 5,
            system_id: "NMSinfo3".to_string(),
            auth_retry_attempts: 3,
            auth_retry_backoff_secs: 2,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            broker_lookup_url: None,
            lookup_timeout_secs: 5,
            client_id: None,
            keep_alive_secs: 30,
            queue_capacity: 64,
            interface_topic: "esight_interface".to_string(),
            slot_topic: "esight_slot".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 20 * 60,
            interval_secs: 15 * 60,
            collection_period: 4,
            task_prefix: "orwell".to_string(),
            max_concurrent_fetches: 8,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from("outputs")),
        }
    }
}

impl EsightConfig {
    /// Base URL with a scheme and without a trailing slash
    pub fn endpoint(&self) -> String {
        let url = self.base_url.trim_end_matches('/');
        if url.contains("://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn auth_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.auth_retry_backoff_secs)
    }
}

impl MqttConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

impl PollingConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl CollectorConfig {
    /// Load config from the file named by `ESIGHT_COLLECTOR_CONFIG` or the
    /// OS-specific location, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let config_path = match std::env::var("ESIGHT_COLLECTOR_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_file_path()?,
        };

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            info!("Loaded configuration from {}", config_path.display());
            Self::from_toml(&content)?
        } else {
            info!("No config file at {}, using defaults", config_path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;

        if config.esight.password.is_none() && config.esight.use_keyring {
            config.esight.password = Some(
                Self::load_password(&config.esight.username)
                    .context("Failed to read eSight password from keyring")?,
            );
            debug!("eSight password loaded from keyring");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid collector configuration")
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not find config directory"))?;

        path.push("esight-collector");
        path.push("config.toml");
        Ok(path)
    }

    /// Override settings from environment variables, looked up through
    /// `lookup` so tests can feed their own
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ESIGHT_URL") {
            self.esight.base_url = url;
        }
        if let Some(user) = lookup("ESIGHT_USER") {
            self.esight.username = user;
        }
        if let Some(password) = lookup("ESIGHT_PASS") {
            self.esight.password = Some(password);
        }
        if let Some(flag) = lookup("ESIGHT_ACCEPT_INVALID_CERTS") {
            self.esight.accept_invalid_certs = parse_flag("ESIGHT_ACCEPT_INVALID_CERTS", &flag)?;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.broker_port = port
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {}", port))?;
        }
        if let Some(url) = lookup("MQTT_BROKER_LOOKUP_URL") {
            self.mqtt.broker_lookup_url = Some(url);
        }
        if let Some(interval) = lookup("POLL_INTERVAL") {
            self.polling.interval_secs = parse_secs("POLL_INTERVAL", &interval)?;
        }
        if let Some(warmup) = lookup("POLL_WARMUP") {
            self.polling.warmup_secs = parse_secs("POLL_WARMUP", &warmup)?;
        }
        if let Some(dir) = lookup("ESIGHT_COLLECTOR_OUTPUT_DIR") {
            self.output.dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.esight.base_url.trim().is_empty() {
            bail!("eSight base URL is not configured (ESIGHT_URL)");
        }
        if self.esight.username.is_empty() {
            bail!("eSight username is not configured (ESIGHT_USER)");
        }
        if self.esight.request_timeout_secs == 0 {
            bail!("esight.request_timeout_secs must be greater than zero");
        }
        if self.mqtt.lookup_timeout_secs == 0 {
            bail!("mqtt.lookup_timeout_secs must be greater than zero");
        }
        if self.polling.interval_secs == 0 {
            bail!("polling.interval_secs must be greater than zero");
        }
        if self.polling.max_concurrent_fetches == 0 {
            bail!("polling.max_concurrent_fetches must be greater than zero");
        }
        if self.polling.task_prefix.is_empty() {
            bail!("polling.task_prefix must not be empty");
        }
        if self.mqtt.interface_topic.is_empty() || self.mqtt.slot_topic.is_empty() {
            bail!("MQTT topics must not be empty");
        }
        Ok(())
    }

    /// Load password from secure OS keyring
    fn load_password(username: &str) -> Result<String> {
        let entry = Entry::new(KEYRING_SERVICE, username)?;
        entry.get_password().map_err(Into::into)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} is not a boolean: {}", key, other),
    }
}

/// Accepts plain seconds or a humantime duration such as `15m`
fn parse_secs(key: &str, value: &str) -> Result<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(value)
        .map(|duration| duration.as_secs())
        .with_context(|| format!("{} is not a duration: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.polling.interval(), Duration::from_secs(900));
        assert_eq!(config.polling.warmup(), Duration::from_secs(1200));
        assert_eq!(config.polling.task_prefix, "orwell");
        assert_eq!(config.esight.system_id, "NMSinfo3");
        assert_eq!(config.mqtt.interface_topic, "esight_interface");
        assert_eq!(config.mqtt.slot_topic, "esight_slot");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CollectorConfig::from_toml(
            r#"
            [esight]
            base_url = "10.0.0.5:32102"
            username = "collector"
            accept_invalid_certs = false

            [polling]
            interval_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.esight.endpoint(), "https://10.0.0.5:32102");
        assert!(!config.esight.accept_invalid_certs);
        assert_eq!(config.polling.interval_secs, 60);
        assert_eq!(config.polling.collection_period, 4);
        assert_eq!(config.mqtt.broker_host, "localhost");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CollectorConfig::default();
        config
            .apply_env(env(&[
                ("ESIGHT_URL", "http://127.0.0.1:8080/"),
                ("ESIGHT_USER", "admin"),
                ("ESIGHT_PASS", "secret"),
                ("ESIGHT_ACCEPT_INVALID_CERTS", "no"),
                ("MQTT_PORT", "8883"),
                ("POLL_INTERVAL", "15m"),
                ("POLL_WARMUP", "30"),
                ("ESIGHT_COLLECTOR_OUTPUT_DIR", ""),
            ]))
            .unwrap();

        assert_eq!(config.esight.endpoint(), "http://127.0.0.1:8080");
        assert_eq!(config.esight.username, "admin");
        assert_eq!(config.esight.password.as_deref(), Some("secret"));
        assert!(!config.esight.accept_invalid_certs);
        assert_eq!(config.mqtt.broker_port, 8883);
        assert_eq!(config.polling.interval_secs, 900);
        assert_eq!(config.polling.warmup_secs, 30);
        assert!(config.output.dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_values_are_rejected() {
        let mut config = CollectorConfig::default();
        assert!(config.apply_env(env(&[("MQTT_PORT", "70000")])).is_err());
        assert!(config.apply_env(env(&[("POLL_INTERVAL", "soon")])).is_err());
        assert!(config
            .apply_env(env(&[("ESIGHT_ACCEPT_INVALID_CERTS", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = CollectorConfig::default();
        assert!(config.validate().is_err());

        config.esight.base_url = "esight.local".into();
        config.esight.username = "collector".into();
        assert!(config.validate().is_ok());

        config.polling.interval_secs = 0;
        assert!(config.validate().is_err());
        config.polling.interval_secs = 60;

        config.polling.max_concurrent_fetches = 0;
        assert!(config.validate().is_err());
        config.polling.max_concurrent_fetches = 8;

        config.mqtt.lookup_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_is_not_serialized() {
        let mut config = CollectorConfig::default();
        config.esight.password = Some("secret".into());
        let content = toml::to_string_pretty(&config).unwrap();
        assert!(!content.contains("secret"));
    }

    #[test]
    fn test_config_file_path() {
        if let Ok(path) = CollectorConfig::config_file_path() {
            assert!(path.to_string_lossy().contains("esight-collector"));
            assert!(path.to_string_lossy().contains("config.toml"));
        }
    }
}
