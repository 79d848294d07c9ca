use crate::types::{Digest, EpisodeMetadata, ResultSink};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// POSTs digests as JSON to `{base}/digests` and audio bytes to `{base}/audio`.
pub struct WebhookSink {
    client: Client,
    base_url: String,
}

impl WebhookSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building webhook HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ResultSink for WebhookSink {
    fn sink_name(&self) -> String {
        format!("webhook ({})", self.base_url)
    }

    async fn store_digest(&self, digest: &Digest) -> Result<()> {
        let url = self.endpoint("digests");
        let response = self
            .client
            .post(&url)
            .json(digest)
            .send()
            .await
            .with_context(|| format!("posting {} digest to {}", digest.format, url))?;
        if !response.status().is_success() {
            bail!("{} rejected {} digest: HTTP {}", url, digest.format, response.status());
        }
        info!("Delivered {} digest to {}", digest.format, url);
        Ok(())
    }

    async fn store_audio(&self, audio: &[u8], episode: &EpisodeMetadata) -> Result<()> {
        let url = self.endpoint("audio");
        let response = self
            .client
            .post(&url)
            .query(&[
                ("title", episode.title.as_str()),
                ("description", episode.description.as_str()),
            ])
            .header(CONTENT_TYPE, "audio/mpeg")
            .body(audio.to_vec())
            .send()
            .await
            .with_context(|| format!("posting audio to {}", url))?;
        if !response.status().is_success() {
            bail!("{} rejected audio: HTTP {}", url, response.status());
        }
        info!("Delivered {} bytes of audio to {}", audio.len(), url);
        Ok(())
    }
}
