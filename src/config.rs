use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;
use url::Url;

pub const DEFAULT_PORT: u16 = 7860;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_PROMPT: &str = "請幫我解譯上傳內容，並生成重點300字";
pub const DEFAULT_PRESENTATION_PROMPT: &str =
    "我需要製作簡報一頁，所以請重點摘要包含簡報標題、三個重點標題及細節";

/// How long the large-media path waits for an uploaded file to leave
/// `PROCESSING`. Both bounds unset means wait until the service answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some() || self.deadline.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: Url,
    pub gemini_request_timeout: Duration,
    pub gemini_media_timeout: Duration,
    pub poll: PollPolicy,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_stored_uploads: usize,
    pub default_prompt: String,
    pub default_presentation_prompt: String,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_string(lookup: Lookup<'_>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(lookup: Lookup<'_>, name: &str, default: u64) -> u64 {
    match env_optional(lookup, name) {
        Some(value) => value.parse::<u64>().unwrap_or_else(|_| {
            warn!("Invalid {} value '{}'; using {}.", name, value, default);
            default
        }),
        None => default,
    }
}

fn env_optional_u64(lookup: Lookup<'_>, name: &str) -> Option<u64> {
    let value = env_optional(lookup, name)?;
    match value.parse::<u64>() {
        Ok(0) => None,
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Invalid {} value '{}'; leaving it unbounded.", name, value);
            None
        }
    }
}

fn env_port(lookup: Lookup<'_>) -> u16 {
    match env_optional(lookup, "PORT") {
        Some(value) => value.parse::<u16>().unwrap_or_else(|_| {
            warn!("Invalid PORT value '{}'; using {}.", value, DEFAULT_PORT);
            DEFAULT_PORT
        }),
        None => DEFAULT_PORT,
    }
}

fn parse_base_url(value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|err| anyhow!("GEMINI_BASE_URL '{}' is invalid: {}", value, err))?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("GEMINI_BASE_URL '{}' cannot be used as a base URL", value));
    }
    Ok(url)
}

/// Read ahead of `Config::load` so the subscriber is installed before any
/// config warning is emitted.
pub fn load_log_level() -> String {
    log_level_from(&|name| env::var(name).ok())
}

fn log_level_from(lookup: Lookup<'_>) -> String {
    env_string(lookup, "LOG_LEVEL", "info")
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(&|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let gemini_api_key = env_optional(lookup, "GOOGLE_API_KEY")
            .or_else(|| env_optional(lookup, "GEMINI_API_KEY"));

        let gemini_base_url = parse_base_url(&env_string(
            lookup,
            "GEMINI_BASE_URL",
            DEFAULT_GEMINI_BASE_URL,
        ))?;

        let mut poll = PollPolicy::unbounded(Duration::from_secs(env_u64(
            lookup,
            "GEMINI_POLL_INTERVAL_SECONDS",
            10,
        )));
        poll.max_attempts = env_optional_u64(lookup, "GEMINI_POLL_MAX_ATTEMPTS")
            .map(|value| u32::try_from(value).unwrap_or(u32::MAX));
        poll.deadline =
            env_optional_u64(lookup, "GEMINI_POLL_DEADLINE_SECONDS").map(Duration::from_secs);

        let upload_dir = env_optional(lookup, "UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("multimodal-studio-uploads"));

        let max_upload_mb = env_u64(lookup, "MAX_UPLOAD_MB", 200).max(1);

        Ok(Config {
            host: env_string(lookup, "HOST", "0.0.0.0"),
            port: env_port(lookup),
            gemini_api_key,
            gemini_model: env_string(lookup, "GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            gemini_base_url,
            gemini_request_timeout: Duration::from_secs(env_u64(
                lookup,
                "GEMINI_REQUEST_TIMEOUT_SECONDS",
                120,
            )),
            gemini_media_timeout: Duration::from_secs(env_u64(
                lookup,
                "GEMINI_MEDIA_TIMEOUT_SECONDS",
                600,
            )),
            poll,
            upload_dir,
            max_upload_bytes: usize::try_from(max_upload_mb.saturating_mul(1024 * 1024))
                .unwrap_or(usize::MAX),
            max_stored_uploads: usize::try_from(env_u64(lookup, "MAX_STORED_UPLOADS", 32).max(1))
                .unwrap_or(usize::MAX),
            default_prompt: env_string(lookup, "DEFAULT_PROMPT", DEFAULT_PROMPT),
            default_presentation_prompt: env_string(
                lookup,
                "DEFAULT_PRESENTATION_PROMPT",
                DEFAULT_PRESENTATION_PROMPT,
            ),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_api_key(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(&move |name| values.get(name).cloned())
    }

    #[test]
    fn defaults_match_the_demo_setup() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 7860);
        assert_eq!(config.bind_address(), "0.0.0.0:7860");
        assert_eq!(config.gemini_model, "gemini-2.5-pro");
        assert_eq!(config.gemini_media_timeout, Duration::from_secs(600));
        assert_eq!(config.poll, PollPolicy::unbounded(Duration::from_secs(10)));
        assert!(!config.poll.is_bounded());
        assert!(!config.has_api_key());
        assert_eq!(config.max_upload_bytes, 200 * 1024 * 1024);
        assert_eq!(config.max_stored_uploads, 32);
    }

    #[test]
    fn reads_credential_from_either_variable() {
        let config = config_from(&[("GEMINI_API_KEY", " secret ")]).unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("secret"));

        let config = config_from(&[("GOOGLE_API_KEY", "primary"), ("GEMINI_API_KEY", "other")]).unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("primary"));

        let config = config_from(&[("GOOGLE_API_KEY", "   ")]).unwrap();
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("GEMINI_POLL_INTERVAL_SECONDS", "soon"),
            ("GEMINI_POLL_MAX_ATTEMPTS", "many"),
        ])
        .unwrap();
        assert_eq!(config.port, 7860);
        assert_eq!(config.poll.interval, Duration::from_secs(10));
        assert_eq!(config.poll.max_attempts, None);
    }

    #[test]
    fn poll_bounds_are_opt_in() {
        let config = config_from(&[
            ("GEMINI_POLL_MAX_ATTEMPTS", "30"),
            ("GEMINI_POLL_DEADLINE_SECONDS", "0"),
        ])
        .unwrap();
        assert_eq!(config.poll.max_attempts, Some(30));
        assert_eq!(config.poll.deadline, None);
        assert!(config.poll.is_bounded());
    }

    #[test]
    fn log_level_is_readable_without_a_valid_config() {
        let pairs: HashMap<String, String> = [
            ("LOG_LEVEL", "debug"),
            ("GEMINI_BASE_URL", "not a url"),
            ("PORT", "abc"),
        ]
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
        let lookup = move |name: &str| pairs.get(name).cloned();

        assert_eq!(log_level_from(&lookup), "debug");
        assert!(Config::from_lookup(&lookup).is_err());
        assert_eq!(log_level_from(&|_| None), "info");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(config_from(&[("GEMINI_BASE_URL", "not a url")]).is_err());
        assert!(config_from(&[("GEMINI_BASE_URL", "mailto:someone@example.com")]).is_err());
    }
}
