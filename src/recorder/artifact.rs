//! Recording artifacts
//!
//! The finished recording lives in memory and is reachable through a content
//! handle, a `blob:` URL registered in a `ContentRegistry`. Revoking the
//! handle is how a reset releases it.

use super::chunk::Chunk;
use crate::utils::error::RecorderResult;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Locally resolvable reference to an artifact's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHandle {
    url: String,
}

impl ContentHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Debug, Clone)]
struct ContentEntry {
    data: Arc<[u8]>,
    mime_type: String,
}

/// Object-URL style store for in-memory content
#[derive(Debug, Clone)]
pub struct ContentRegistry {
    origin: Arc<str>,
    entries: Arc<RwLock<HashMap<String, ContentEntry>>>,
}

impl ContentRegistry {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: Arc::from(origin),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register bytes and mint a fresh handle for them
    pub fn register(&self, data: Arc<[u8]>, mime_type: &str) -> ContentHandle {
        let url = format!(
            "blob:{}/{}",
            urlencoding::encode(&self.origin),
            Uuid::new_v4()
        );
        self.entries.write().insert(
            url.clone(),
            ContentEntry {
                data,
                mime_type: mime_type.to_string(),
            },
        );
        ContentHandle { url }
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.entries.read().get(url).map(|e| Arc::clone(&e.data))
    }

    pub fn mime_type(&self, url: &str) -> Option<String> {
        self.entries.read().get(url).map(|e| e.mime_type.clone())
    }

    /// Forget a handle. Returns `false` if it was not registered.
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self.entries.write().remove(url).is_some();
        if removed {
            tracing::debug!("Revoked content handle {}", url);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::new("open-recorder://local")
    }
}

/// Serializable summary of an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub id: Uuid,
    pub url: String,
    pub mime_type: String,
    pub size: usize,
    pub chunk_count: usize,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    /// The recording ended on an encoder failure
    pub partial: bool,
}

/// Immutable, concatenated recording
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    id: Uuid,
    data: Arc<[u8]>,
    mime_type: String,
    handle: ContentHandle,
    created_at: DateTime<Utc>,
    chunk_count: usize,
    duration: Duration,
    partial: bool,
}

impl RecordingArtifact {
    /// Concatenate chunks in emission order and register the result. Each
    /// chunk is released as soon as it has been copied.
    pub(super) fn assemble(
        chunks: Vec<Chunk>,
        mime_type: &str,
        registry: &ContentRegistry,
        duration: Duration,
        partial: bool,
    ) -> Self {
        let chunk_count = chunks.len();
        let size = chunks.iter().map(|c| c.data.len()).sum();
        let mut bytes = Vec::with_capacity(size);
        for chunk in chunks {
            bytes.extend_from_slice(&chunk.data);
        }
        let data: Arc<[u8]> = Arc::from(bytes);
        let handle = registry.register(Arc::clone(&data), mime_type);

        Self {
            id: Uuid::new_v4(),
            data,
            mime_type: mime_type.to_string(),
            handle,
            created_at: Utc::now(),
            chunk_count,
            duration,
            partial,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn handle(&self) -> &ContentHandle {
        &self.handle
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            id: self.id,
            url: self.handle.url.clone(),
            mime_type: self.mime_type.clone(),
            size: self.data.len(),
            chunk_count: self.chunk_count,
            duration_ms: self.duration.as_millis() as u64,
            created_at: self.created_at,
            partial: self.partial,
        }
    }

    /// Write the artifact into `dir` as `file_name`, replacing any existing
    /// file atomically
    pub fn download_to(&self, dir: &Path, file_name: &str) -> RecorderResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&self.data)?;
        file.flush()?;

        let path = dir.join(file_name);
        file.persist(&path).map_err(|e| e.error)?;
        tracing::info!("Saved recording ({} bytes) to {:?}", self.data.len(), path);
        Ok(path)
    }
}
