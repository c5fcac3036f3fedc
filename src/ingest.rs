//! Document ingestion: uploaded file → persisted bytes → text → chunks →
//! cached embeddings → [`Retriever`].
//!
//! [`Ingestor::ingest`] is memoised on file identity (name plus SHA-256 of
//! the bytes): ingesting the same file again returns the same retriever
//! without extracting, splitting or embedding anything. Only the
//! [`MEMO_CAPACITY`] most recently used retrievers are kept.
//!
//! # Cache layout
//!
//! ```text
//! <root>/files/<name>          raw upload
//! <root>/embeddings/<name>/    one entry per embedded chunk
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::chunk::split_text;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::cache::{CacheBackedEmbedder, LocalFileStore};
use crate::embedding::{create_embedder, Embedder};
use crate::extract::{extract_text, DocumentKind, ExtractError};
use crate::index::{Retriever, SimilarityIndex};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Number of retrievers kept in memory by an [`Ingestor`].
pub const MEMO_CAPACITY: usize = 8;

/// Directory layout of the local cache.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn embeddings_dir(&self) -> PathBuf {
        self.root.join("embeddings")
    }

    /// Create the root, `files/` and `embeddings/` directories if absent.
    pub async fn ensure(&self) -> Result<(), IngestError> {
        for dir in [self.root.clone(), self.files_dir(), self.embeddings_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| IngestError::Io {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// A file handed to the chat session.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Final path component of the original file name.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Build an upload, keeping only the final component of `name`.
    pub fn new(name: &str, bytes: Vec<u8>) -> Result<Self, IngestError> {
        let base = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| IngestError::InvalidName(name.to_string()))?;
        Ok(Self {
            name: base.to_string(),
            bytes,
        })
    }

    /// Read a file from disk as an upload.
    pub async fn from_path(path: &Path) -> Result<Self, IngestError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| IngestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(&path.to_string_lossy(), bytes)
    }

    /// Identity used for memoisation: name and content hash.
    pub fn identity(&self) -> FileIdentity {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        FileIdentity {
            name: self.name.clone(),
            sha256: format!("{:x}", hasher.finalize()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub name: String,
    pub sha256: String,
}

/// Turns uploads into retrievers, memoised per file identity.
pub struct Ingestor {
    layout: CacheLayout,
    chunking: ChunkingConfig,
    top_k: usize,
    dims: Option<usize>,
    embedder: Arc<dyn Embedder>,
    /// Least recently used first.
    memo: Mutex<VecDeque<(FileIdentity, Arc<Retriever>)>>,
}

impl Ingestor {
    /// Build an ingestor with the embedding backend selected by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(
            CacheLayout::new(&config.cache.root),
            config.chunking.clone(),
            config.retrieval.top_k,
            embedder,
        )
        .with_dims(config.embedding.dims))
    }

    pub fn new(
        layout: CacheLayout,
        chunking: ChunkingConfig,
        top_k: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            layout,
            chunking,
            top_k,
            dims: None,
            embedder,
            memo: Mutex::new(VecDeque::with_capacity(MEMO_CAPACITY)),
        }
    }

    /// Expected embedding width; vectors of any other length are rejected.
    pub fn with_dims(mut self, dims: Option<usize>) -> Self {
        self.dims = dims;
        self
    }

    /// Ingest `file`, or return the retriever built for it earlier.
    ///
    /// Nothing is memoised when any step fails.
    pub async fn ingest(&self, file: &UploadedFile) -> Result<Arc<Retriever>, IngestError> {
        let identity = file.identity();
        if let Some(hit) = self.lookup(&identity) {
            tracing::debug!(file = %file.name, "reusing retriever for previously ingested file");
            return Ok(hit);
        }

        let kind = DocumentKind::from_file_name(&file.name)?;
        self.layout.ensure().await?;
        let path = self.persist(file).await?;

        let bytes = file.bytes.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, kind)).await??;
        let chunks = split_text(
            &text,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );
        tracing::info!(file = %file.name, chunks = chunks.len(), path = %path.display(), "document split");

        let store_dir = self.layout.embeddings_dir().join(&file.name);
        let store = tokio::task::spawn_blocking(move || LocalFileStore::open(store_dir))
            .await?
            .map_err(IngestError::Embedding)?;
        let cached: Arc<dyn Embedder> = Arc::new(
            CacheBackedEmbedder::new(self.embedder.clone(), Arc::new(store)).with_dims(self.dims),
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            cached
                .embed_documents(&texts)
                .await
                .map_err(IngestError::Embedding)?
        };

        let index = SimilarityIndex::build(chunks, vectors).map_err(IngestError::Embedding)?;
        let retriever = Arc::new(Retriever::new(cached, index, self.top_k));

        self.remember(identity, retriever.clone());
        tracing::info!(file = %file.name, "document indexed");
        Ok(retriever)
    }

    /// Memoised retriever for `identity`, marking it most recently used.
    fn lookup(&self, identity: &FileIdentity) -> Option<Arc<Retriever>> {
        let mut memo = self
            .memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pos = memo.iter().position(|(id, _)| id == identity)?;
        let entry = memo.remove(pos)?;
        let hit = entry.1.clone();
        memo.push_back(entry);
        Some(hit)
    }

    fn remember(&self, identity: FileIdentity, retriever: Arc<Retriever>) {
        let mut memo = self
            .memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memo.retain(|(id, _)| *id != identity);
        memo.push_back((identity, retriever));
        while memo.len() > MEMO_CAPACITY {
            if let Some((evicted, _)) = memo.pop_front() {
                tracing::debug!(file = %evicted.name, "evicting retriever from memo");
            }
        }
    }

    /// Write the raw bytes to `files/<name>` unless identical bytes are
    /// already there.
    async fn persist(&self, file: &UploadedFile) -> Result<PathBuf, IngestError> {
        let path = self.layout.files_dir().join(&file.name);
        match tokio::fs::read(&path).await {
            Ok(existing) if existing == file.bytes => {
                tracing::debug!(path = %path.display(), "upload already cached");
                return Ok(path);
            }
            Ok(_) => tracing::warn!(path = %path.display(), "replacing cached upload with new content"),
            Err(_) => {}
        }
        tokio::fs::write(&path, &file.bytes)
            .await
            .map_err(|source| IngestError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}
