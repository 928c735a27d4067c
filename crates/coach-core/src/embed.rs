//! Embedding providers. Maps text to fixed-length vectors.
//!
//! The retriever stores only the provider's name in a bundle, so a provider must be
//! reconstructible from that name at load time.

use async_trait::async_trait;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;

pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Text to vector. Implementations must be deterministic for a given name.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier persisted with a bundle and used to resolve the provider on reload.
    fn name(&self) -> &str;

    /// Embed multiple strings. Returns one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }
}

/// Embeddings served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    inner: Ollama,
    model: String,
}

impl OllamaEmbedder {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, EmbedError> {
        let inner = Ollama::try_new(url)?;
        Ok(Self {
            inner,
            model: DEFAULT_EMBED_MODEL.to_string(),
        })
    }

    /// Set the embedding model (e.g. `all-minilm`, `nomic-embed-text`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Rebuild an embedder from the identifier stored in a bundle.
    pub fn resolve(url: &str, name: &str) -> Result<Self, EmbedError> {
        Ok(Self::from_url(url)?.with_model(name))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self.inner.generate_embeddings(req).await?;
        if res.embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: res.embeddings.len(),
            });
        }
        Ok(res.embeddings)
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("embedding provider returned {got} vector(s) for {expected} input(s)")]
    CountMismatch { expected: usize, got: usize },
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uses_stored_name() {
        let e = OllamaEmbedder::resolve(DEFAULT_BASE_URL, "nomic-embed-text").unwrap();
        assert_eq!(e.name(), "nomic-embed-text");
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(
            OllamaEmbedder::from_url("not a url"),
            Err(EmbedError::ParseUrl(_))
        ));
    }
}
