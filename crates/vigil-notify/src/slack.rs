//! Slack Web API sink.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::time::Duration;
use vigil_types::ClassifiedEvent;

use crate::config::SlackConfig;
use crate::error::SinkError;
use crate::sink::NotificationSink;

/// Per-request timeout for Slack API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum entries rendered per section of a report.
const MAX_ENTRIES_PER_SECTION: usize = 20;

/// Envelope shared by every Slack Web API response.
#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

/// Posts classified-record reports to a Slack channel.
#[derive(Debug, Clone)]
pub struct SlackSink {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: String,
    channel_id: String,
    display_offset: FixedOffset,
}

impl SlackSink {
    pub fn new(config: &SlackConfig) -> Self {
        let display_offset = config
            .timezone_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    offset_hours = config.timezone_offset_hours,
                    "invalid slack timezone offset, rendering reports in UTC"
                );
                Utc.fix()
            });

        Self {
            client: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.trim().to_string(),
            channel_id: config.channel_id.trim().to_string(),
            display_offset,
        }
    }

    async fn call(
        &self,
        method: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<SlackResponse, SinkError> {
        let url = format!("{}/{}", self.api_base_url, method);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .timeout(REQUEST_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let parsed: SlackResponse = response.json().await?;
        if !parsed.ok {
            return Err(SinkError::Rejected(
                parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.channel_id.is_empty()
    }

    async fn probe(&self) -> Result<(), SinkError> {
        if self.bot_token.is_empty() {
            return Err(SinkError::NotConfigured("bot token missing".to_string()));
        }

        let response = self.call("auth.test", None).await?;
        tracing::info!(
            bot = response.user.as_deref().unwrap_or("unknown"),
            "slack connection test successful"
        );
        Ok(())
    }

    async fn deliver(
        &self,
        anomalies: &[ClassifiedEvent],
        unidentified: &[ClassifiedEvent],
    ) -> Result<(), SinkError> {
        if !self.is_configured() {
            return Err(SinkError::NotConfigured(
                "bot token or channel id missing".to_string(),
            ));
        }

        let text = format_report(anomalies, unidentified, Utc::now(), self.display_offset);
        let body = serde_json::json!({
            "channel": self.channel_id,
            "text": text,
            "parse": "none",
        });

        self.call("chat.postMessage", Some(&body)).await?;
        tracing::info!(
            channel = %self.channel_id,
            anomalies = anomalies.len(),
            unidentified = unidentified.len(),
            "posted report to slack"
        );
        Ok(())
    }
}

/// Renders the plain-text report posted to Slack.
///
/// Each section lists at most 20 entries (timestamp line, value line, blank
/// line) and notes how many were left out. Empty sections are omitted.
pub fn format_report(
    anomalies: &[ClassifiedEvent],
    unidentified: &[ClassifiedEvent],
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let mut lines = vec![
        format!(
            "Anomaly Detection Report - {}",
            now.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S")
        ),
        String::new(),
    ];

    if !anomalies.is_empty() {
        push_section(
            &mut lines,
            ":red_circle: ANOMALY PARAMETERS",
            "anomaly",
            anomalies,
            offset,
        );
        lines.push(String::new());
    }

    if !unidentified.is_empty() {
        push_section(
            &mut lines,
            ":large_yellow_circle: UNIDENTIFIED PARAMETERS",
            "unidentified",
            unidentified,
            offset,
        );
    }

    lines.join("\n")
}

fn push_section(
    lines: &mut Vec<String>,
    heading: &str,
    noun: &str,
    records: &[ClassifiedEvent],
    offset: FixedOffset,
) {
    lines.push(heading.to_string());
    for record in records.iter().take(MAX_ENTRIES_PER_SECTION) {
        lines.push(
            record
                .timestamp
                .with_timezone(&offset)
                .format("%m/%d/%Y, %I:%M:%S %p")
                .to_string(),
        );
        lines.push(record.param_value.clone());
        lines.push(String::new());
    }
    if records.len() > MAX_ENTRIES_PER_SECTION {
        lines.push(format!(
            "... and {} more {} parameters",
            records.len() - MAX_ENTRIES_PER_SECTION,
            noun
        ));
    }
}
