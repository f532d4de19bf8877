use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection and topic layout.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    /// Capacity of the rumqttc request queue and the inbound event queue
    pub queue_len: usize,
    /// Subscribed; commands from the app arrive here
    pub control_topic: String,
    /// Published; presence and board-info reports
    pub status_topic: String,
    /// Published; periodic liveness ticks
    pub liveness_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "onehome-lamp".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 5,
            connect_timeout_secs: 10,
            ack_timeout_secs: 10,
            queue_len: 16,
            control_topic: "onehome_ctrl".to_string(),
            status_topic: "onehome_info".to_string(),
            liveness_topic: "tick".to_string(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_onehome_topics() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.control_topic, "onehome_ctrl");
        assert_eq!(config.status_topic, "onehome_info");
        assert_eq!(config.liveness_topic, "tick");
        assert_eq!(config.keep_alive(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: MqttConfig = toml::from_str(
            r#"
            host = "broker.local"
            username = "lamp"
            password = "secret"
        "#,
        )
        .unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.username.as_deref(), Some("lamp"));
        assert_eq!(config.port, 1883);
        assert_eq!(config.status_topic, "onehome_info");
    }
}
