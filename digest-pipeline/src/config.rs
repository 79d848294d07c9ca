use crate::services::completion::{DEFAULT_API_URL, DEFAULT_MODEL, DEFAULT_TITLE_MODEL};
use crate::speech::DEFAULT_MAX_CHUNK_CHARS;
use crate::types::{Limits, PipelineError, Result, VoiceConfig};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const MIN_CHUNK_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub title_model: Option<String>,
    pub limits: Limits,
    pub max_output_tokens: u32,
    pub tokenizer_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisSettings {
    pub enabled: bool,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub voice: VoiceConfig,
    pub limits: Limits,
    pub max_chunk_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IoSettings {
    pub sample_emails_dir: PathBuf,
    pub output_dir: PathBuf,
    pub key_prefix: String,
    pub webhook_url: Option<String>,
    pub mailbox_uri: Option<String>,
    pub mailbox_username: Option<String>,
    pub mailbox_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub completion: CompletionSettings,
    pub synthesis: SynthesisSettings,
    pub io: IoSettings,
    pub show_title: String,
    pub show_title_short: String,
    pub environment: String,
    pub run_deadline: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("CLAUDE_API_KEY")
            .ok_or_else(|| PipelineError::Config("CLAUDE_API_KEY is required".to_string()))?;

        let completion_defaults = Limits::default();
        let completion = CompletionSettings {
            api_url: get("CLAUDE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
            model: get("CLAUDE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            title_model: Some(get("CLAUDE_TITLE_MODEL").unwrap_or_else(|| DEFAULT_TITLE_MODEL.to_string())),
            limits: Limits {
                max_tokens_per_request: parse(&get, "MAX_TOKENS_PER_REQUEST", completion_defaults.max_tokens_per_request)?,
                requests_per_minute: parse(&get, "CLAUDE_RPM_LIMIT", completion_defaults.requests_per_minute)?,
                max_retries: parse(&get, "CLAUDE_MAX_RETRIES", completion_defaults.max_retries)?,
                base_delay_seconds: parse(&get, "CLAUDE_BASE_DELAY", completion_defaults.base_delay_seconds)?,
                request_timeout_seconds: parse(&get, "CLAUDE_REQUEST_TIMEOUT", completion_defaults.request_timeout_seconds)?,
            },
            max_output_tokens: parse(&get, "MAX_OUTPUT_TOKENS", 4000)?,
            tokenizer_path: get("TOKENIZER_PATH").map(PathBuf::from),
        };

        let synthesis_defaults = Limits::synthesis();
        let voice_defaults = VoiceConfig::default();
        let synthesis = SynthesisSettings {
            enabled: parse_flag(&get, "GENERATE_AUDIO", true)?,
            api_url: get("TTS_API_URL"),
            api_key: get("TTS_API_KEY"),
            voice: VoiceConfig {
                voice: get("TTS_VOICE").unwrap_or(voice_defaults.voice),
                rate: get("TTS_RATE").unwrap_or(voice_defaults.rate),
                model: get("TTS_MODEL").unwrap_or(voice_defaults.model),
                output_format: get("TTS_OUTPUT_FORMAT").unwrap_or(voice_defaults.output_format),
            },
            limits: Limits {
                requests_per_minute: parse(&get, "TTS_RPM_LIMIT", synthesis_defaults.requests_per_minute)?,
                max_retries: parse(&get, "TTS_MAX_RETRIES", synthesis_defaults.max_retries)?,
                ..synthesis_defaults
            },
            max_chunk_chars: parse(&get, "TTS_MAX_CHUNK_CHARS", DEFAULT_MAX_CHUNK_CHARS)?,
        };

        let io = IoSettings {
            sample_emails_dir: PathBuf::from(get("SAMPLE_EMAILS_DIR").unwrap_or_else(|| "sample_emails".to_string())),
            output_dir: PathBuf::from(get("OUTPUT_DIR").unwrap_or_else(|| "output".to_string())),
            key_prefix: get("OUTPUT_KEY_PREFIX").unwrap_or_default(),
            webhook_url: get("WEBHOOK_URL"),
            mailbox_uri: get("MAILBOX_URI"),
            mailbox_username: get("MAILBOX_USERNAME"),
            mailbox_password: get("MAILBOX_PASSWORD"),
        };

        let deadline_seconds: u64 = parse(&get, "RUN_DEADLINE_SECONDS", 840)?;
        let show_title = get("PODCAST_TITLE").unwrap_or_else(|| "Daily AI, by AI".to_string());

        let config = Self {
            completion,
            synthesis,
            io,
            show_title_short: get("PODCAST_TITLE_SHORT").unwrap_or_else(|| show_title.clone()),
            show_title,
            environment: get("ENVIRONMENT").unwrap_or_else(|| "production".to_string()),
            run_deadline: (deadline_seconds > 0).then(|| Duration::from_secs(deadline_seconds)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion.limits.requests_per_minute == 0 {
            return Err(PipelineError::Config("CLAUDE_RPM_LIMIT must be positive".to_string()));
        }
        if self.completion.limits.max_tokens_per_request == 0 {
            return Err(PipelineError::Config("MAX_TOKENS_PER_REQUEST must be positive".to_string()));
        }
        check_url("CLAUDE_API_URL", &self.completion.api_url)?;

        if let Some(url) = &self.io.webhook_url {
            check_url("WEBHOOK_URL", url)?;
        }

        if self.synthesis.enabled {
            match &self.synthesis.api_url {
                Some(url) => check_url("TTS_API_URL", url)?,
                None => {
                    return Err(PipelineError::Config(
                        "TTS_API_URL is required when GENERATE_AUDIO is enabled".to_string(),
                    ))
                }
            }
            if self.synthesis.limits.requests_per_minute == 0 {
                return Err(PipelineError::Config("TTS_RPM_LIMIT must be positive".to_string()));
            }
            if self.synthesis.max_chunk_chars < MIN_CHUNK_CHARS {
                return Err(PipelineError::Config(format!(
                    "TTS_MAX_CHUNK_CHARS must be at least {}",
                    MIN_CHUNK_CHARS
                )));
            }
        }
        Ok(())
    }
}

fn check_url(name: &str, value: &str) -> Result<()> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| PipelineError::Config(format!("{} is not a valid URL ({}): {}", name, value, e)))
}

fn parse<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| PipelineError::Config(format!("{}={:?} is invalid: {}", name, raw, e))),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, name: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
        Some(v) => Err(PipelineError::Config(format!("{}={:?} is not a boolean", name, v))),
    }
}
