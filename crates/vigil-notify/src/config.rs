use serde::{Deserialize, Serialize};
use std::fmt;

fn default_interval_seconds() -> u64 {
    300
}

fn default_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_timezone_offset_hours() -> i32 {
    7
}

/// Slack integration settings (`[slack]` table of the server config).
#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Master switch for the integration.
    #[serde(default)]
    pub enabled: bool,
    /// Bot token used as the bearer credential.
    #[serde(default, skip_serializing)]
    pub bot_token: String,
    /// Channel that receives reports.
    #[serde(default)]
    pub channel_id: String,
    /// Seconds between sync iterations. Default: 300.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Base URL of the Slack Web API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// UTC offset used to render timestamps in reports. Default: +7.
    #[serde(default = "default_timezone_offset_hours")]
    pub timezone_offset_hours: i32,
    /// Initial state of the auto-send gate.
    #[serde(default)]
    pub auto_send: bool,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            channel_id: String::new(),
            interval_seconds: default_interval_seconds(),
            api_base_url: default_api_base_url(),
            timezone_offset_hours: default_timezone_offset_hours(),
            auto_send: false,
        }
    }
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("enabled", &self.enabled)
            .field("bot_token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .field("interval_seconds", &self.interval_seconds)
            .field("api_base_url", &self.api_base_url)
            .field("timezone_offset_hours", &self.timezone_offset_hours)
            .field("auto_send", &self.auto_send)
            .finish()
    }
}

impl SlackConfig {
    pub fn bot_token_configured(&self) -> bool {
        !self.bot_token.trim().is_empty()
    }

    pub fn channel_configured(&self) -> bool {
        !self.channel_id.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let config = SlackConfig {
            bot_token: "xoxb-secret".to_string(),
            ..SlackConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("xoxb-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SlackConfig = toml::from_str(
            r#"
            enabled = true
            channel_id = "C123"
            "#,
        )
        .expect("should parse");
        assert!(config.enabled);
        assert!(config.channel_configured());
        assert!(!config.bot_token_configured());
        assert_eq!(config.interval_seconds, 300);
        assert_eq!(config.api_base_url, "https://slack.com/api");
        assert_eq!(config.timezone_offset_hours, 7);
        assert!(!config.auto_send);
    }
}
