use crate::types::{Document, DocumentSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use interfaces::labels::identify_newsletter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A newsletter email saved as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEmail {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub date: Option<String>,
    pub content: String,
    #[serde(default)]
    pub newsletter_type: Option<String>,
}

impl SampleEmail {
    pub fn into_document(self) -> Document {
        let label = self
            .newsletter_type
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| identify_newsletter(&self.from, &self.subject));
        let id = self
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut document = Document::new(id, label, self.content)
            .with_subject(self.subject)
            .with_sender(self.from);
        if let Some(date) = self.date {
            document = document.with_received_at(date);
        }
        document
    }
}

/// Reads `*.json` emails from a directory in file-name order.
///
/// Files that fail to parse are logged and skipped. Acknowledged files are
/// moved into the archive directory when one is set.
pub struct LocalFileSource {
    dir: PathBuf,
    archive_dir: Option<PathBuf>,
    origins: HashMap<String, PathBuf>,
}

impl LocalFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            archive_dir: None,
            origins: HashMap::new(),
        }
    }

    pub fn with_archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(archive_dir.into());
        self
    }

    async fn json_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading {}", self.dir.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Move the files behind `documents` into the archive directory.
    /// Returns how many files were moved.
    async fn archive(&mut self, documents: &[Document]) -> Result<usize> {
        let Some(archive_dir) = &self.archive_dir else {
            debug!("No archive directory configured, leaving {} files in place", documents.len());
            return Ok(0);
        };
        tokio::fs::create_dir_all(archive_dir).await?;

        let mut archived = 0;
        for document in documents {
            let Some(path) = self.origins.remove(&document.id) else {
                warn!("No source file recorded for document {}", document.id);
                continue;
            };
            if let Some(name) = path.file_name() {
                tokio::fs::rename(&path, archive_dir.join(name))
                    .await
                    .with_context(|| format!("archiving {}", path.display()))?;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn load(path: &Path) -> Result<SampleEmail> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[async_trait]
impl DocumentSource for LocalFileSource {
    fn source_name(&self) -> String {
        format!("local files ({})", self.dir.display())
    }

    async fn collect(&mut self) -> Result<Vec<Document>> {
        let files = self.json_files().await?;
        info!("Found {} sample email files in {}", files.len(), self.dir.display());

        let mut documents = Vec::with_capacity(files.len());
        self.origins.clear();
        for path in files {
            match Self::load(&path).await {
                Ok(email) => {
                    let document = email.into_document();
                    debug!("Loaded {} as {}", path.display(), document.source_label);
                    self.origins.insert(document.id.clone(), path);
                    documents.push(document);
                }
                Err(e) => error!("Skipping {}: {:#}", path.display(), e),
            }
        }
        Ok(documents)
    }

    async fn acknowledge(&mut self, documents: &[Document]) -> Result<()> {
        let archived = self.archive(documents).await?;
        if self.archive_dir.is_some() {
            info!("Archived {} of {} processed files", archived, documents.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_label_is_identified_from_the_sender() {
        let email: SampleEmail = serde_json::from_str(
            r#"{"from": "dan@tldrnewsletter.com", "subject": "Daily", "content": "Body"}"#,
        )
        .unwrap();
        let document = email.into_document();
        assert_eq!(document.source_label, "TLDR AI");
        assert_eq!(document.sender.as_deref(), Some("dan@tldrnewsletter.com"));
        assert!(Uuid::parse_str(&document.id).is_ok());
    }

    #[test]
    fn explicit_label_wins() {
        let email = SampleEmail {
            message_id: Some("m1".to_string()),
            from: "dan@tldrnewsletter.com".to_string(),
            subject: "Daily".to_string(),
            date: Some("Fri, 17 Oct 2025".to_string()),
            content: "Body".to_string(),
            newsletter_type: Some("Custom".to_string()),
        };
        let document = email.into_document();
        assert_eq!(document.id, "m1");
        assert_eq!(document.source_label, "Custom");
        assert_eq!(document.received_at.as_deref(), Some("Fri, 17 Oct 2025"));
    }

    #[tokio::test]
    async fn archive_counts_only_moved_files() {
        let inbox = tempfile::TempDir::new().unwrap();
        std::fs::write(
            inbox.path().join("01.json"),
            r#"{"message_id": "m1", "from": "a@example.com", "subject": "S", "content": "Body"}"#,
        )
        .unwrap();

        let mut source = LocalFileSource::new(inbox.path()).with_archive_dir(inbox.path().join("done"));
        let mut documents = source.collect().await.unwrap();
        documents.push(Document::new("unknown", "Other", "never loaded"));

        assert_eq!(source.archive(&documents).await.unwrap(), 1);
        assert!(inbox.path().join("done/01.json").exists());
        // already archived documents are not moved twice
        assert_eq!(source.archive(&documents).await.unwrap(), 0);
    }
}
