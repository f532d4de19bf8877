use crate::mqtt::config::MqttConfig;
use crate::session::{BackoffPolicy, SessionSettings};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn, Level};

const CONFIG_DIR: &str = ".config/onehome-lamp";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "ONEHOME_LAMP_CONFIG";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub board: BoardConfig,
    pub lamp: LampConfig,
    pub mqtt: MqttConfig,
    pub liveness: LivenessConfig,
    pub reconnect: ReconnectConfig,
    pub actuator: ActuatorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            board: BoardConfig::default(),
            lamp: LampConfig::default(),
            mqtt: MqttConfig::default(),
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            actuator: ActuatorConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    pub board_id: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            board_id: "1".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LampConfig {
    pub device_id: String,
    pub name: String,
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            device_id: "1".to_string(),
            name: "desk-lamp".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    pub interval_secs: u64,
    pub wrap: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            wrap: 11,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorBackend {
    /// In-memory PWM, for bench runs without hardware
    #[default]
    Simulated,
    /// Raspberry Pi hardware PWM
    Rppal,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ActuatorConfig {
    pub backend: ActuatorBackend,
    pub channel: u8,
    pub frequency_hz: f64,
    pub native_max: u16,
    pub settle_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            backend: ActuatorBackend::Simulated,
            channel: 0,
            frequency_hz: 5000.0,
            native_max: 1023,
            settle_ms: 50,
        }
    }
}

impl ActuatorConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl AppConfig {
    /// Loads the configuration file, writing the defaults first if there is
    /// none yet.
    pub async fn load() -> Result<Self> {
        let path = config_path();
        let config = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Reading configuration from {}", path.display());
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
            Self::from_toml(&raw)?
        } else {
            info!("Creating default configuration at {}", path.display());
            let config = Self::default();
            config.save(&path).await?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| eyre!("Failed to parse configuration: {}", e))
    }

    async fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize configuration: {}", e))?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.board.board_id.is_empty() {
            return Err(eyre!("board.board_id must not be empty"));
        }
        if self.lamp.device_id.is_empty() {
            return Err(eyre!("lamp.device_id must not be empty"));
        }
        for (name, topic) in [
            ("control_topic", &self.mqtt.control_topic),
            ("status_topic", &self.mqtt.status_topic),
            ("liveness_topic", &self.mqtt.liveness_topic),
        ] {
            if topic.is_empty() {
                return Err(eyre!("mqtt.{} must not be empty", name));
            }
        }
        if self.mqtt.queue_len == 0 {
            return Err(eyre!("mqtt.queue_len must be positive"));
        }
        if self.liveness.wrap < 2 {
            return Err(eyre!(
                "liveness.wrap must be at least 2, got {}",
                self.liveness.wrap
            ));
        }
        if self.liveness.interval_secs == 0 {
            return Err(eyre!("liveness.interval_secs must be positive"));
        }
        if self.actuator.native_max == 0 {
            return Err(eyre!("actuator.native_max must be positive"));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(eyre!("reconnect.initial_delay_ms must be positive"));
        }
        self.tracing_level()?;
        Ok(())
    }

    pub fn tracing_level(&self) -> Result<Level> {
        self.log_level
            .parse::<Level>()
            .map_err(|_| eyre!("Unknown log_level '{}'", self.log_level))
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.reconnect.initial_delay_ms),
            max: Duration::from_millis(self.reconnect.max_delay_ms),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            control_topic: self.mqtt.control_topic.clone(),
            status_topic: self.mqtt.status_topic.clone(),
            liveness_topic: self.mqtt.liveness_topic.clone(),
            lamp_device_id: self.lamp.device_id.clone(),
            backoff: self.backoff_policy(),
            liveness_interval: Duration::from_secs(self.liveness.interval_secs),
            liveness_wrap: self.liveness.wrap,
        }
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_survive_a_round_trip_through_toml() {
        let raw = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert_eq!(AppConfig::from_toml(&raw).unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::from_toml(
            r#"
            log_level = "debug"

            [board]
            board_id = "7"

            [actuator]
            backend = "rppal"
            channel = 1

            [liveness]
            wrap = 5
        "#,
        )
        .unwrap();

        assert_eq!(config.board.board_id, "7");
        assert_eq!(config.actuator.backend, ActuatorBackend::Rppal);
        assert_eq!(config.actuator.channel, 1);
        assert_eq!(config.actuator.native_max, 1023);
        assert_eq!(config.liveness.wrap, 5);
        assert_eq!(config.liveness.interval_secs, 5);
        assert_eq!(config.tracing_level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn unknown_backend_fails_to_parse() {
        assert!(AppConfig::from_toml("[actuator]\nbackend = \"gpio\"").is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            "[liveness]\nwrap = 1",
            "[actuator]\nnative_max = 0",
            "[board]\nboard_id = \"\"",
            "[mqtt]\ncontrol_topic = \"\"",
            "log_level = \"loud\"",
        ];
        for raw in cases {
            let config = AppConfig::from_toml(raw).unwrap();
            assert!(config.validate().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn session_settings_follow_config() {
        let config = AppConfig::from_toml(
            r#"
            [mqtt]
            control_topic = "ctrl"

            [lamp]
            device_id = "3"

            [reconnect]
            initial_delay_ms = 250
            max_delay_ms = 4000
        "#,
        )
        .unwrap();
        let settings = config.session_settings();

        assert_eq!(settings.control_topic, "ctrl");
        assert_eq!(settings.status_topic, "onehome_info");
        assert_eq!(settings.lamp_device_id, "3");
        assert_eq!(settings.backoff.initial, Duration::from_millis(250));
        assert_eq!(settings.backoff.max, Duration::from_millis(4000));
        assert_eq!(settings.liveness_interval, Duration::from_secs(5));
        assert_eq!(settings.liveness_wrap, 11);
    }
}
