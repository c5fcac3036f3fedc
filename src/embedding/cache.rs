//! On-disk embedding cache.
//!
//! [`CacheBackedEmbedder`] sits in front of any [`Embedder`] and stores each
//! document vector in a [`ByteStore`] under a key derived from the model
//! name and the SHA-256 of the text. Identical chunks are embedded once,
//! across runs. Query embeddings bypass the cache.
//!
//! Store I/O runs on the blocking pool. Entries are written to a temporary
//! file and renamed into place, so a reader never sees a half-written vector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use super::{blob_to_vec, vec_to_blob, Embedder};
use crate::chunk::content_hash;

/// A key/value store of byte blobs.
pub trait ByteStore: Send + Sync {
    /// Fetch values for `keys`, `None` where absent. Output order matches `keys`.
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
    fn mset(&self, items: &[(String, Vec<u8>)]) -> Result<()>;
}

/// A [`ByteStore`] keeping one file per key under a root directory.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory: {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ByteStore for LocalFileStore {
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter()
            .map(|key| match std::fs::read(self.path_for(key)) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e).with_context(|| format!("Failed to read cache entry {}", key)),
            })
            .collect()
    }

    fn mset(&self, items: &[(String, Vec<u8>)]) -> Result<()> {
        for (key, value) in items {
            let path = self.path_for(key);
            let tmp = self.path_for(&format!("{}.tmp", key));
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("Failed to write cache entry {}", key))?;
            file.write_all(value)
                .and_then(|_| file.sync_all())
                .with_context(|| format!("Failed to write cache entry {}", key))?;
            std::fs::rename(&tmp, &path)
                .with_context(|| format!("Failed to commit cache entry {}", key))?;
        }
        Ok(())
    }
}

/// An [`Embedder`] that consults a [`ByteStore`] before the wrapped backend.
pub struct CacheBackedEmbedder {
    inner: Arc<dyn Embedder>,
    store: Arc<dyn ByteStore>,
    namespace: String,
    dims: Option<usize>,
}

impl CacheBackedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, store: Arc<dyn ByteStore>) -> Self {
        let namespace = sanitize_namespace(inner.model_name());
        Self {
            inner,
            store,
            namespace,
            dims: None,
        }
    }

    /// Require every vector to have `dims` components.
    ///
    /// Cached entries of another length are treated as misses and
    /// re-embedded; backend vectors of another length are an error.
    pub fn with_dims(mut self, dims: Option<usize>) -> Self {
        self.dims = dims;
        self
    }

    /// Cache key for a document text.
    pub fn key_for(&self, text: &str) -> String {
        format!("{}{}", self.namespace, content_hash(text))
    }

    fn decode(&self, bytes: Vec<u8>) -> Option<Vec<f32>> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return None;
        }
        match self.dims {
            Some(dims) if bytes.len() != dims * 4 => None,
            _ => Some(blob_to_vec(&bytes)),
        }
    }
}

/// Model names may contain path separators; keep keys file-name safe.
fn sanitize_namespace(model: &str) -> String {
    let cleaned: String = model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{}_", cleaned)
}

#[async_trait]
impl Embedder for CacheBackedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.key_for(t)).collect();
        let store = self.store.clone();
        let lookup = keys.clone();
        let blobs = tokio::task::spawn_blocking(move || store.mget(&lookup))
            .await
            .context("embedding cache read task failed")??;
        let mut vectors: Vec<Option<Vec<f32>>> = blobs
            .into_iter()
            .map(|bytes| bytes.and_then(|b| self.decode(b)))
            .collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| vectors[i].is_none()).collect();
        tracing::debug!(
            hits = texts.len() - missing.len(),
            misses = missing.len(),
            "embedding cache lookup"
        );

        if !missing.is_empty() {
            let missing_texts: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_documents(&missing_texts).await?;
            if fresh.len() != missing.len() {
                anyhow::bail!(
                    "embedding backend returned {} vectors for {} texts",
                    fresh.len(),
                    missing.len()
                );
            }
            if let Some(dims) = self.dims {
                if let Some(bad) = fresh.iter().find(|v| v.len() != dims) {
                    anyhow::bail!(
                        "embedding backend returned a {}-dimensional vector, expected {}",
                        bad.len(),
                        dims
                    );
                }
            }

            let items: Vec<(String, Vec<u8>)> = missing
                .iter()
                .zip(fresh.iter())
                .map(|(&i, v)| (keys[i].clone(), vec_to_blob(v)))
                .collect();
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || store.mset(&items))
                .await
                .context("embedding cache write task failed")??;

            for (i, v) in missing.into_iter().zip(fresh) {
                vectors[i] = Some(v);
            }
        }

        vectors
            .into_iter()
            .map(|v| v.ok_or_else(|| anyhow::anyhow!("missing embedding after cache fill")))
            .collect()
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }
}
