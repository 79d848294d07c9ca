use bytes::{Bytes, BytesMut};
use std::fmt;
use std::time::Duration;

pub use interfaces::defs::{
    Digest, DigestFormat, Document, DocumentSource, EpisodeMetadata, ReductionStrategy, ResultSink,
};

/// Fraction of the per-request token limit a single batch may fill.
pub const SAFETY_MARGIN: f64 = 0.7;

/// Per-service limits for the throttled client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_tokens_per_request: usize,
    pub requests_per_minute: u32,
    pub max_retries: u32,
    pub base_delay_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Limits {
    /// Minimum spacing between two requests to the same service.
    pub fn min_interval(&self) -> Duration {
        if self.requests_per_minute == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(60.0 / self.requests_per_minute as f64)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Token budget of one batch: `max_tokens_per_request × SAFETY_MARGIN`.
    pub fn batch_budget(&self) -> usize {
        batch_budget(self.max_tokens_per_request)
    }

    /// Defaults for the speech-synthesis service. Token limits do not apply.
    pub fn synthesis() -> Self {
        Self {
            max_tokens_per_request: usize::MAX,
            requests_per_minute: 60,
            max_retries: 3,
            base_delay_seconds: 2,
            request_timeout_seconds: 60,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tokens_per_request: 800_000,
            requests_per_minute: 5,
            max_retries: 6,
            base_delay_seconds: 10,
            request_timeout_seconds: 360,
        }
    }
}

pub fn batch_budget(max_tokens_per_request: usize) -> usize {
    (max_tokens_per_request as f64 * SAFETY_MARGIN).floor() as usize
}

/// A token-bounded, order-preserving group of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub documents: Vec<Document>,
    pub estimated_tokens: usize,
    /// Set when the batch holds a single document cut down to fit the budget.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens,
            model: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    pub voice: String,
    /// SSML prosody rate, e.g. `medium` or `95%`.
    pub rate: String,
    pub model: String,
    pub output_format: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "Joanna".to_string(),
            rate: "medium".to_string(),
            model: "neural".to_string(),
            output_format: "mp3".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text_segment: String,
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResponse {
    pub audio_bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub ordinal: usize,
    pub text_segment: String,
    pub audio_bytes: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub bytes: Bytes,
    pub chunk_count: usize,
}

impl AudioTrack {
    /// Concatenate chunk audio in ordinal order. A chunk without audio voids the track.
    pub fn assemble(mut chunks: Vec<AudioChunk>) -> Result<Self> {
        chunks.sort_by_key(|chunk| chunk.ordinal);
        let mut buffer = BytesMut::new();
        for chunk in &chunks {
            match &chunk.audio_bytes {
                Some(audio) => buffer.extend_from_slice(audio),
                None => return Err(PipelineError::MissingAudio { ordinal: chunk.ordinal }),
            }
        }
        Ok(Self {
            bytes: buffer.freeze(),
            chunk_count: chunks.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of one attempt against a remote service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceFailure {
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    Transient {
        retry_after: Option<Duration>,
        message: String,
    },
    Fatal {
        message: String,
    },
}

impl ServiceFailure {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        ServiceFailure::RateLimited {
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ServiceFailure::Transient {
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ServiceFailure::Fatal {
            message: message.into(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceFailure::RateLimited { retry_after, .. }
            | ServiceFailure::Transient { retry_after, .. } => *retry_after,
            ServiceFailure::Fatal { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceFailure::Fatal { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceFailure::RateLimited { message, .. }
            | ServiceFailure::Transient { message, .. }
            | ServiceFailure::Fatal { message } => message,
        }
    }

    /// Terminal error once no further retry will be made.
    pub fn into_terminal(self, service: &str, retries: u32) -> ServiceError {
        let service = service.to_string();
        match self {
            ServiceFailure::RateLimited { .. } => ServiceError::RateLimited { service, retries },
            ServiceFailure::Transient { message, .. } => ServiceError::Transient {
                service,
                retries,
                message,
            },
            ServiceFailure::Fatal { message } => ServiceError::Fatal { service, message },
        }
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFailure::RateLimited { message, .. } => write!(f, "rate limited: {}", message),
            ServiceFailure::Transient { message, .. } => write!(f, "transient failure: {}", message),
            ServiceFailure::Fatal { message } => write!(f, "fatal failure: {}", message),
        }
    }
}

/// Terminal failure surfaced by the throttled client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("{service}: max retries ({retries}) exceeded for rate limiting")]
    RateLimited { service: String, retries: u32 },

    #[error("{service}: transient failure persisted after {retries} retries: {message}")]
    Transient {
        service: String,
        retries: u32,
        message: String,
    },

    #[error("{service}: {message}")]
    Fatal { service: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("No documents to process")]
    NoDocuments,

    #[error("Final {format} digest synthesis failed: {source}")]
    TopLevelSynthesis {
        format: DigestFormat,
        source: ServiceError,
    },

    #[error("Audio chunk {ordinal} failed: {source}")]
    AudioChunk { ordinal: usize, source: ServiceError },

    #[error("Audio chunk {ordinal} has no audio")]
    MissingAudio { ordinal: usize },

    #[error("No text left to synthesize")]
    EmptySpeechText,

    #[error("Run deadline exceeded before {stage}")]
    DeadlineExceeded { stage: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
