//! Filesystem chunk corpus: one directory per document

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::domain::Chunk;
use crate::ports::{ChunkQuery, ChunkStore};

const CHUNKS_FILE: &str = "chunks.jsonl";

/// Persists `chunks.jsonl` under `{base_dir}/{doc_id}/`.
///
/// Re-ingestion replaces the document directory wholesale; the visual
/// artifact triple is regenerated afterwards by the job pipeline.
#[derive(Debug, Clone)]
pub struct FilesystemChunkStore {
    base_dir: PathBuf,
}

impl FilesystemChunkStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl ChunkStore for FilesystemChunkStore {
    async fn persist(&self, doc_id: &str, chunks: &[Chunk]) -> anyhow::Result<String> {
        let out_dir = self.base_dir.join(doc_id);
        if out_dir.exists() {
            tokio::fs::remove_dir_all(&out_dir).await?;
        }
        tokio::fs::create_dir_all(&out_dir).await?;

        let mut lines = String::new();
        for chunk in chunks {
            lines.push_str(&serde_json::to_string(chunk)?);
            lines.push('\n');
        }
        let out_path = out_dir.join(CHUNKS_FILE);
        tokio::fs::write(&out_path, lines).await?;
        Ok(out_path.display().to_string())
    }
}

/// Loads chunks back from the per-document `chunks.jsonl` files.
#[derive(Debug, Clone)]
pub struct FilesystemChunkQuery {
    assets_dir: PathBuf,
}

impl FilesystemChunkQuery {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
        }
    }

    async fn read_doc(&self, doc_dir: &Path, chunks: &mut Vec<Chunk>) -> anyhow::Result<()> {
        let jsonl_path = doc_dir.join(CHUNKS_FILE);
        if !jsonl_path.exists() {
            return Ok(());
        }
        let content = tokio::fs::read_to_string(&jsonl_path).await?;
        for line in content.lines() {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Chunk>(text) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => warn!("skipping malformed chunk row in {}: {}", jsonl_path.display(), e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkQuery for FilesystemChunkQuery {
    async fn list_chunks(&self, doc_id: Option<&str>) -> anyhow::Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        if !self.assets_dir.exists() {
            return Ok(chunks);
        }

        let mut docs: Vec<PathBuf> = Vec::new();
        match doc_id {
            Some(doc_id) => docs.push(self.assets_dir.join(doc_id)),
            None => {
                let mut entries = tokio::fs::read_dir(&self.assets_dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        docs.push(entry.path());
                    }
                }
                docs.sort();
            }
        }

        for doc_dir in &docs {
            self.read_doc(doc_dir, &mut chunks).await?;
        }
        Ok(chunks)
    }
}
