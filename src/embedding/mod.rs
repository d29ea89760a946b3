//! Text-to-vector embedding capability.
//!
//! Provides the [`EmbeddingProvider`] trait, a local implementation using
//! paraphrase-multilingual-MiniLM-L12-v2 (384 dimensions, L2-normalized), and
//! [`embed_posts`], which embeds a whole run's posts before matching starts.
//! The provider is created via [`create_provider`] from configuration.

pub mod local;

use std::collections::HashMap;

use crate::error::{ConfigError, EmbeddingFailure};
use crate::post::{Post, PostKey};

/// Default number of dimensions (paraphrase-multilingual-MiniLM-L12-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations must be deterministic within a run. All methods are
/// synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingFailure> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + sentence-transformers model).
/// Returns an error if model files are not found; run `crossmatch model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => Err(ConfigError::UnknownProvider(other.to_string()).into()),
    }
}

/// An immutable, validated embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Box<[f32]>);

impl Embedding {
    /// Validate a raw provider vector: exact dimension, finite, non-zero norm.
    pub fn new(values: Vec<f32>, expected_dims: usize) -> Result<Self, EmbeddingFailure> {
        if values.len() != expected_dims {
            return Err(EmbeddingFailure::DimensionMismatch {
                expected: expected_dims,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingFailure::NonFinite);
        }
        if values.iter().all(|v| *v == 0.0) {
            return Err(EmbeddingFailure::ZeroVector);
        }
        Ok(Self(values.into_boxed_slice()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}

/// Embeddings for one run, plus the posts whose embedding could not be produced.
#[derive(Debug, Default)]
pub struct EmbeddingSet {
    vectors: HashMap<PostKey, Embedding>,
    failures: Vec<(PostKey, EmbeddingFailure)>,
}

impl EmbeddingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a vector to a post. A later insert for the same key is ignored.
    pub fn insert(&mut self, key: PostKey, embedding: Embedding) {
        self.vectors.entry(key).or_insert(embedding);
    }

    pub fn record_failure(&mut self, key: PostKey, failure: EmbeddingFailure) {
        self.failures.push((key, failure));
    }

    pub fn get(&self, key: &PostKey) -> Option<&Embedding> {
        self.vectors.get(key)
    }

    pub fn failures(&self) -> &[(PostKey, EmbeddingFailure)] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Embed every post, `batch_size` texts at a time.
///
/// When a batch call fails, each post of that batch is retried on its own so a
/// single bad text only degrades itself. `on_progress` receives the number of
/// posts finished after each batch. Returns once all posts are processed.
pub fn embed_posts(
    provider: &dyn EmbeddingProvider,
    posts: &[Post],
    batch_size: usize,
    mut on_progress: impl FnMut(usize),
) -> EmbeddingSet {
    let dims = provider.dimensions();
    let mut set = EmbeddingSet::new();

    for chunk in posts.chunks(batch_size.max(1)) {
        let texts: Vec<String> = chunk.iter().map(Post::embedding_text).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let batch = match provider.embed_batch(&refs) {
            Ok(vectors) if vectors.len() == chunk.len() => Some(vectors),
            Ok(vectors) => {
                tracing::warn!(
                    expected = chunk.len(),
                    actual = vectors.len(),
                    "provider returned a short batch, retrying posts individually"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, size = chunk.len(), "batch embedding failed, retrying posts individually");
                None
            }
        };

        match batch {
            Some(vectors) => {
                for (post, values) in chunk.iter().zip(vectors) {
                    accept(&mut set, post, Embedding::new(values, dims));
                }
            }
            None => {
                for (post, text) in chunk.iter().zip(&refs) {
                    let result = provider
                        .embed(text)
                        .and_then(|values| Embedding::new(values, dims));
                    accept(&mut set, post, result);
                }
            }
        }

        on_progress(chunk.len());
    }

    tracing::info!(
        embedded = set.len(),
        failed = set.failures().len(),
        "embedding complete"
    );
    set
}

fn accept(set: &mut EmbeddingSet, post: &Post, result: Result<Embedding, EmbeddingFailure>) {
    match result {
        Ok(embedding) => set.insert(post.key(), embedding),
        Err(failure) => {
            tracing::warn!(source = %post.source, id = %post.id, %failure, "embedding failed, post routed to unmatched");
            set.record_failure(post.key(), failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps text length to a one-hot vector; fails on texts containing "boom".
    struct LengthProvider {
        batch_calls: AtomicUsize,
    }

    impl EmbeddingProvider for LengthProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
            if text.contains("boom") {
                return Err(EmbeddingFailure::Provider("text too long".into()));
            }
            let mut v = vec![0.0; 4];
            v[text.len() % 4] = 1.0;
            Ok(v)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingFailure> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    fn post(id: &str, body: &str) -> Post {
        Post {
            id: id.into(),
            source: Source::Habr,
            title: body.into(),
            body: body.into(),
            published_at: None,
            url: String::new(),
            title_derived: false,
        }
    }

    #[test]
    fn embedding_validation() {
        assert!(Embedding::new(vec![1.0, 0.0], 2).is_ok());
        assert_eq!(
            Embedding::new(vec![1.0], 2),
            Err(EmbeddingFailure::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            Embedding::new(vec![f32::NAN, 1.0], 2),
            Err(EmbeddingFailure::NonFinite)
        );
        assert_eq!(
            Embedding::new(vec![0.0, 0.0], 2),
            Err(EmbeddingFailure::ZeroVector)
        );
    }

    #[test]
    fn failed_batch_degrades_only_the_bad_post() {
        let provider = LengthProvider {
            batch_calls: AtomicUsize::new(0),
        };
        let posts = vec![post("1", "alpha"), post("2", "boom"), post("3", "gamma")];
        let mut progress = 0;

        let set = embed_posts(&provider, &posts, 8, |n| progress += n);

        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(progress, 3);
        assert_eq!(set.len(), 2);
        assert_eq!(set.failures().len(), 1);
        assert_eq!(set.failures()[0].0, PostKey::new(Source::Habr, "2"));
        assert!(set.get(&PostKey::new(Source::Habr, "1")).is_some());
        assert!(set.get(&PostKey::new(Source::Habr, "3")).is_some());
    }

    #[test]
    fn batches_respect_batch_size() {
        let provider = LengthProvider {
            batch_calls: AtomicUsize::new(0),
        };
        let posts: Vec<Post> = (0..5).map(|i| post(&i.to_string(), "text")).collect();
        let set = embed_posts(&provider, &posts, 2, |_| {});
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(set.len(), 5);
    }
}
