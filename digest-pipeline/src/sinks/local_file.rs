use crate::types::{Digest, EpisodeMetadata, ResultSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes digests under `reports/` and audio under `audio/` of an output directory.
pub struct LocalFileSink {
    output_dir: PathBuf,
    key_prefix: String,
    date: NaiveDate,
}

impl LocalFileSink {
    pub fn new(output_dir: impl Into<PathBuf>, key_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            key_prefix: key_prefix.into(),
            date: Utc::now().date_naive(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn report_path(&self, digest: &Digest) -> PathBuf {
        self.output_dir
            .join("reports")
            .join(format!("{}-{}.md", digest.format, self.date))
    }

    pub fn audio_path(&self) -> PathBuf {
        self.output_dir
            .join("audio")
            .join(format!("{}ai-newsletter-{}.mp3", self.key_prefix, self.date))
    }

    async fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

#[async_trait]
impl ResultSink for LocalFileSink {
    fn sink_name(&self) -> String {
        format!("local files ({})", self.output_dir.display())
    }

    async fn store_digest(&self, digest: &Digest) -> Result<()> {
        let path = self.report_path(digest);
        Self::write(&path, &digest.text).await?;

        let metadata = json!({
            "format": digest.format,
            "strategy": digest.strategy.to_string(),
            "failed_batches": digest.failed_batches,
            "produced_at": digest.produced_at,
            "characters": digest.text.chars().count(),
        });
        Self::write(&path.with_extension("json"), serde_json::to_vec_pretty(&metadata)?).await?;

        info!("Saved {} digest to {}", digest.format, path.display());
        Ok(())
    }

    async fn store_audio(&self, audio: &[u8], episode: &EpisodeMetadata) -> Result<()> {
        let path = self.audio_path();
        Self::write(&path, audio).await?;
        Self::write(&path.with_extension("json"), serde_json::to_vec_pretty(episode)?).await?;

        info!("Saved {} bytes of audio to {}", audio.len(), path.display());
        Ok(())
    }
}
