use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized input text handed to the digest pipeline.
///
/// Produced once by a `DocumentSource` and never mutated afterwards; a
/// truncated copy is a new document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_label: String,
    pub text: String,
    pub size_hint_chars: usize,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, source_label: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            source_label: source_label.into(),
            size_hint_chars: text.chars().count(),
            text,
            subject: None,
            sender: None,
            received_at: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_received_at(mut self, received_at: impl Into<String>) -> Self {
        self.received_at = Some(received_at.into());
        self
    }

    /// Copy of this document carrying a replacement body.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: self.id.clone(),
            source_label: self.source_label.clone(),
            size_hint_chars: text.chars().count(),
            text,
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            received_at: self.received_at.clone(),
        }
    }
}

/// The two digest shapes produced from every document set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestFormat {
    Executive,
    Narration,
}

impl DigestFormat {
    pub fn slug(&self) -> &'static str {
        match self {
            DigestFormat::Executive => "executive",
            DigestFormat::Narration => "narration",
        }
    }
}

impl fmt::Display for DigestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReductionStrategy {
    SinglePass,
    BatchAndReduce { batches: usize },
}

impl fmt::Display for ReductionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReductionStrategy::SinglePass => write!(f, "Single Context Processing"),
            ReductionStrategy::BatchAndReduce { batches } => {
                write!(f, "Batch Processing ({} batches)", batches)
            }
        }
    }
}

/// Final text product of one reduction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub format: DigestFormat,
    pub text: String,
    pub strategy: ReductionStrategy,
    /// 1-based numbers of batches replaced by a placeholder.
    pub failed_batches: Vec<usize>,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    pub description: String,
}

// Where documents come from and where digests go.

#[async_trait]
pub trait DocumentSource: Send {
    fn source_name(&self) -> String;

    /// Collect every pending document, in delivery order.
    async fn collect(&mut self) -> Result<Vec<Document>>;

    /// Mark documents as consumed once their digests were produced.
    async fn acknowledge(&mut self, documents: &[Document]) -> Result<()>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    fn sink_name(&self) -> String;

    async fn store_digest(&self, digest: &Digest) -> Result<()>;

    async fn store_audio(&self, audio: &[u8], episode: &EpisodeMetadata) -> Result<()>;
}
