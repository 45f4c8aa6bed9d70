// Embeddings module
// Turns text into fixed-dimension vectors, via Ollama or a deterministic hash fallback

pub mod hashing;
pub mod ollama;


use std::fmt;
use std::sync::OnceLock;

use tracing::{debug, info, warn};

use crate::IndexError;
use crate::config::{EmbeddingConfig, EmbeddingMode};

pub use hashing::HashEmbedder;
pub use ollama::OllamaClient;

/// Output dimension of `all-minilm` (all-MiniLM-L6-v2)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// A source of fixed-dimension text embeddings
pub trait EmbeddingBackend: Send + Sync {
    /// Short name used in logs and status output
    fn name(&self) -> &str;

    /// Length of every vector this backend produces
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Embedding generator shared by the whole pipeline.
///
/// The backend is resolved once, on the first call to [`Embedder::embed`],
/// behind a `OnceLock`: concurrent first callers wait on the same
/// initialization. In [`EmbeddingMode::Auto`] an unreachable Ollama server or
/// missing model degrades to [`HashEmbedder`] for the rest of the process.
/// Embedding never fails: any per-call backend error falls back to the hash
/// vector of the same text, which has the same dimension.
pub struct Embedder {
    config: EmbeddingConfig,
    fallback: HashEmbedder,
    backend: OnceLock<Box<dyn EmbeddingBackend>>,
}

impl fmt::Debug for Embedder {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("mode", &self.config.mode)
            .field("dimension", &self.dimension())
            .field("backend", &self.backend.get().map(|b| b.name().to_string()))
            .finish()
    }
}

impl Embedder {
    /// Create an embedder that picks its backend lazily from `config`
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            config: config.clone(),
            fallback: HashEmbedder::new(config.dimension),
            backend: OnceLock::new(),
        }
    }

    /// Create an embedder around an already constructed backend
    #[inline]
    pub fn with_backend(backend: Box<dyn EmbeddingBackend>) -> Self {
        let dimension = backend.dimension();

        Self {
            config: EmbeddingConfig {
                dimension,
                ..EmbeddingConfig::default()
            },
            fallback: HashEmbedder::new(dimension),
            backend: OnceLock::from(backend),
        }
    }

    /// Hash-only embedder, never touches the network
    #[inline]
    pub fn mock(dimension: usize) -> Self {
        Self::with_backend(Box::new(HashEmbedder::new(dimension)))
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.fallback.dimension()
    }

    /// Name of the active backend, resolving it if needed
    #[inline]
    pub fn backend_name(&self) -> &str {
        self.backend().name()
    }

    /// Whether the hash fallback is the active backend
    #[inline]
    pub fn is_mock(&self) -> bool {
        self.backend_name() == HashEmbedder::NAME
    }

    /// Embed `text` into a vector of exactly [`Embedder::dimension`] values
    #[inline]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_with_backend(text).0
    }

    /// Like [`Embedder::embed`], also naming the backend that produced the
    /// vector. Fallback vectors report [`HashEmbedder::NAME`].
    #[inline]
    pub fn embed_with_backend(&self, text: &str) -> (Vec<f32>, &str) {
        if text.trim().is_empty() {
            debug!("Blank input, using hash embedding");
            return (self.fallback.embed_text(text), HashEmbedder::NAME);
        }

        let backend = self.backend();
        match backend.embed(text) {
            Ok(vector) if vector.len() == self.dimension() => (vector, backend.name()),
            Ok(vector) => {
                warn!(
                    "{} returned {} dimensions instead of {}, using hash embedding",
                    backend.name(),
                    vector.len(),
                    self.dimension()
                );
                (self.fallback.embed_text(text), HashEmbedder::NAME)
            }
            Err(e) => {
                warn!(
                    "{} failed to embed text, using hash embedding: {:#}",
                    backend.name(),
                    e
                );
                (self.fallback.embed_text(text), HashEmbedder::NAME)
            }
        }
    }

    fn backend(&self) -> &dyn EmbeddingBackend {
        self.backend
            .get_or_init(|| self.select_backend())
            .as_ref()
    }

    fn select_backend(&self) -> Box<dyn EmbeddingBackend> {
        debug!("Selecting embedding backend (mode: {})", self.config.mode);

        let mock = || -> Box<dyn EmbeddingBackend> { Box::new(self.fallback.clone()) };

        match self.config.mode {
            EmbeddingMode::Mock => {
                info!("Using hash embeddings ({} dimensions)", self.dimension());
                mock()
            }
            EmbeddingMode::Ollama => match OllamaClient::new(&self.config) {
                Ok(client) => {
                    info!("Using Ollama model {}", self.config.model);
                    Box::new(client)
                }
                Err(e) => {
                    warn!("{}", IndexError::ModelUnavailable(format!("{:#}", e)));
                    mock()
                }
            },
            EmbeddingMode::Auto => {
                let ready = OllamaClient::new(&self.config).and_then(|client| {
                    client.readiness_check()?;
                    Ok(client)
                });

                match ready {
                    Ok(client) => {
                        info!("Using Ollama model {}", self.config.model);
                        Box::new(client)
                    }
                    Err(e) => {
                        warn!(
                            "{}; falling back to hash embeddings",
                            IndexError::ModelUnavailable(format!("{:#}", e))
                        );
                        mock()
                    }
                }
            }
        }
    }
}
