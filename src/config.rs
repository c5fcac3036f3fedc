//! TOML configuration.
//!
//! Every section is optional; a missing section falls back to the same
//! defaults as [`Config::minimal`]. [`load_config`] parses and validates a
//! file; validation failures are reported before any process starts.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::prompt::{DEFAULT_PLAIN_TEMPLATE, DEFAULT_RAG_TEMPLATE};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

impl Config {
    /// Built-in defaults, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path prefix for the model routes.
    #[serde(default = "default_route_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_route_path(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_route_path() -> String {
    "/llm".to_string()
}

/// The chat model wrapped by `ragserve serve`.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model: default_model_name(),
            url: None,
            temperature: None,
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_model_provider() -> String {
    "ollama".to_string()
}
fn default_model_name() -> String {
    "llama3".to_string()
}
fn default_model_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote model routes, e.g. `http://localhost:8000/llm/`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            greeting: default_greeting(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:8000/llm/".to_string()
}
fn default_greeting() -> String {
    "How can I help you?".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(".cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Expected vector width. When set, cached vectors of another width are
    /// re-embedded and backend vectors of another width fail the upload.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// `auto`, `cpu` or `cuda`. Only read by the local provider.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            normalize: true,
            device: default_device(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_true() -> bool {
    true
}
fn default_device() -> String {
    "auto".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_rag_template")]
    pub rag_template: String,
    #[serde(default = "default_plain_template")]
    pub plain_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            rag_template: default_rag_template(),
            plain_template: default_plain_template(),
        }
    }
}

fn default_rag_template() -> String {
    DEFAULT_RAG_TEMPLATE.to_string()
}
fn default_plain_template() -> String {
    DEFAULT_PLAIN_TEMPLATE.to_string()
}

/// Load the config at `path`, or the built-in defaults if it does not exist.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !config.server.path.starts_with('/') {
        anyhow::bail!("server.path must start with '/'");
    }

    match config.model.provider.as_str() {
        "ollama" | "openai" | "echo" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be ollama, openai, or echo.",
            other
        ),
    }

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.device.as_str() {
        "auto" | "cpu" | "cuda" => {}
        other => anyhow::bail!(
            "Unknown embedding device: '{}'. Must be auto, cpu, or cuda.",
            other
        ),
    }

    for placeholder in ["{question}", "{context}"] {
        if !config.prompt.rag_template.contains(placeholder) {
            anyhow::bail!("prompt.rag_template must contain {}", placeholder);
        }
    }
    if !config.prompt.plain_template.contains("{input}") {
        anyhow::bail!("prompt.plain_template must contain {{input}}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.server.path, "/llm");
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.cache.root, PathBuf::from(".cache"));
        assert_eq!(config.client.endpoint, "http://localhost:8000/llm/");
        assert!(config.embedding.normalize);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse("[chunking]\nchunk_size = 50\nchunk_overlap = 50\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn unknown_model_provider_rejected() {
        let err = parse("[model]\nprovider = \"mystery\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown model provider"));
    }

    #[test]
    fn remote_embedding_requires_model() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn zero_embedding_dims_rejected() {
        let err = parse("[embedding]\ndims = 0\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
        let config = parse("[embedding]\ndims = 384\n").unwrap();
        assert_eq!(config.embedding.dims, Some(384));
    }

    #[test]
    fn rag_template_needs_context_placeholder() {
        let err = parse("[prompt]\nrag_template = \"Question: {question}\"\n").unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.model.provider, "ollama");
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragserve.toml");
        std::fs::write(
            &path,
            "[server]\nbind = \"127.0.0.1:9000\"\n\n[retrieval]\ntop_k = 2\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.retrieval.top_k, 2);
    }
}
