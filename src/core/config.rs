use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4000;
pub const DEFAULT_FILE_CONTENT_MAX_CHARS: usize = 50_000;
pub const DEFAULT_LOADING_TEXT: &str = ":hourglass_flowing_sand: Wait a second, please ...";
pub const DEFAULT_SYSTEM_TEXT: &str = "You are a bot in a slack chat room. You might receive messages from multiple people. \
Format bold text *like this*, italic text _like this_ and strikethrough text ~like this~. \
Slack user IDs match the regex `<@U.*?>`. Your Slack user ID is <@{bot_user_id}>. \
Each message has the author's Slack user ID prepended, like the regex `^<@U.*?>: ` followed by the message text.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub processing_queue_url: String,
    pub slack_signing_secret: String,
    pub slack_bot_token: String,
    pub openai_api_key: String,
    pub openai_org_id: Option<String>,
    pub openai_model: String,
    pub openai_api_base: String,
    pub openai_temperature: f32,
    pub system_text: String,
    pub loading_text: String,
    pub translate_markdown: bool,
    pub file_access_enabled: bool,
    pub file_content_max_chars: usize,
    pub max_message_bytes: usize,
    pub tracker_capacity: usize,
    pub tracker_ttl_secs: u64,
    pub tracker_grace_secs: u64,
    pub stream_update_interval_ms: u64,
}

/// Sizing and expiry knobs for the conversation edit tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub capacity: usize,
    pub ttl: Duration,
    pub grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(3600),
            grace: Duration::from_secs(60),
        }
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| format!("{name}: {e}")),
        _ => Ok(default),
    }
}

fn flag_or(name: &str, default: bool) -> bool {
    env::var(name).map_or(default, |v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
    })
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = TrackerConfig::default();
        let config = Self {
            processing_queue_url: env::var("PROCESSING_QUEUE_URL")
                .map_err(|e| format!("PROCESSING_QUEUE_URL: {}", e))?,
            slack_signing_secret: env::var("SLACK_SIGNING_SECRET")
                .map_err(|e| format!("SLACK_SIGNING_SECRET: {}", e))?,
            slack_bot_token: env::var("SLACK_BOT_TOKEN")
                .map_err(|e| format!("SLACK_BOT_TOKEN: {}", e))?,
            openai_api_key: env::var("OPENAI_API_KEY")
                .map_err(|e| format!("OPENAI_API_KEY: {}", e))?,
            openai_org_id: env::var("OPENAI_ORG_ID").ok(),
            openai_model: env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
            openai_api_base: env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| DEFAULT_OPENAI_API_BASE.to_string()),
            openai_temperature: parse_or("OPENAI_TEMPERATURE", 1.0)?,
            system_text: env::var("OPENAI_SYSTEM_TEXT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_TEXT.to_string()),
            loading_text: env::var("LOADING_TEXT")
                .unwrap_or_else(|_| DEFAULT_LOADING_TEXT.to_string()),
            translate_markdown: flag_or("TRANSLATE_MARKDOWN", false),
            file_access_enabled: flag_or("FILE_ACCESS_ENABLED", true),
            file_content_max_chars: parse_or(
                "FILE_CONTENT_MAX_CHARS",
                DEFAULT_FILE_CONTENT_MAX_CHARS,
            )?,
            max_message_bytes: parse_or("SLACK_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?,
            tracker_capacity: parse_or("REPLY_TRACKER_CAPACITY", defaults.capacity)?,
            tracker_ttl_secs: parse_or("REPLY_TRACKER_TTL_SECS", defaults.ttl.as_secs())?,
            tracker_grace_secs: parse_or("REPLY_TRACKER_GRACE_SECS", defaults.grace.as_secs())?,
            stream_update_interval_ms: parse_or("STREAM_UPDATE_INTERVAL_MS", 800)?,
        };

        if config.max_message_bytes == 0 {
            return Err("SLACK_MAX_MESSAGE_BYTES must be greater than zero".to_string());
        }
        if config.tracker_capacity == 0 {
            return Err("REPLY_TRACKER_CAPACITY must be greater than zero".to_string());
        }

        Ok(config)
    }

    #[must_use]
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            capacity: self.tracker_capacity,
            ttl: Duration::from_secs(self.tracker_ttl_secs),
            grace: Duration::from_secs(self.tracker_grace_secs),
        }
    }

    #[must_use]
    pub fn stream_update_interval(&self) -> Duration {
        Duration::from_millis(self.stream_update_interval_ms)
    }
}
