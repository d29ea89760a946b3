#![allow(dead_code)]

use crossmatch::config::{MatchingConfig, NormalizeConfig};
use crossmatch::embedding::{embed_posts, EmbeddingProvider, EmbeddingSet};
use crossmatch::error::{EmbeddingFailure, MatchResult};
use crossmatch::matching::{run_matching, MatchOutcome};
use crossmatch::post::normalize::normalize_records;
use crossmatch::post::{Post, RawRecord, RejectedRecord, Source};

/// Dimensions used by the fixture vectors.
pub const DIMS: usize = 3;

/// Deterministic provider: returns the vector registered for the first marker
/// contained in the text. Texts containing a failing marker, or no known
/// marker at all, fail.
pub struct StaticEmbeddingProvider {
    dims: usize,
    vectors: Vec<(String, Vec<f32>)>,
    failing: Vec<String>,
}

impl StaticEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Vec::new(),
            failing: Vec::new(),
        }
    }

    pub fn with(mut self, marker: &str, vector: Vec<f32>) -> Self {
        self.vectors.push((marker.to_string(), vector));
        self
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.failing.push(marker.to_string());
        self
    }
}

impl EmbeddingProvider for StaticEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
        if self.failing.iter().any(|m| text.contains(m.as_str())) {
            return Err(EmbeddingFailure::Provider("provider timeout".into()));
        }
        self.vectors
            .iter()
            .find(|(m, _)| text.contains(m.as_str()))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EmbeddingFailure::Provider(format!("no fixture for {text:?}")))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Generate a deterministic embedding with a spike at position `seed`.
/// Distinct seeds (mod `dims`) are orthogonal.
pub fn test_embedding(seed: usize, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    v[seed % dims] = 1.0;
    v
}

/// A raw record whose text carries `marker` so the static provider can find it.
pub fn record(id: &str, marker: &str) -> RawRecord {
    RawRecord {
        id: id.to_string(),
        title: format!("Story {marker}"),
        body: format!("Body of the story {marker} with details"),
        published_at: Some("2025-03-01 12:00".into()),
        url: format!("https://example.com/{id}"),
    }
}

pub fn matching_config(threshold: f64) -> MatchingConfig {
    MatchingConfig {
        threshold,
        ..MatchingConfig::default()
    }
}

/// Normalize the records of every source, keeping input order.
pub fn normalize_all(input: &[(Source, Vec<RawRecord>)]) -> (Vec<Post>, Vec<RejectedRecord>) {
    let config = NormalizeConfig::default();
    let mut posts = Vec::new();
    let mut rejected = Vec::new();
    for (source, records) in input {
        let (p, r) = normalize_records(*source, records, &config);
        posts.extend(p);
        rejected.extend(r);
    }
    (posts, rejected)
}

pub fn embed_all(provider: &dyn EmbeddingProvider, posts: &[Post]) -> EmbeddingSet {
    embed_posts(provider, posts, 4, |_| {})
}

/// Normalize, embed and match in one go.
pub fn run_pipeline(
    provider: &dyn EmbeddingProvider,
    input: &[(Source, Vec<RawRecord>)],
    threshold: f64,
) -> MatchResult<MatchOutcome> {
    let (posts, rejected) = normalize_all(input);
    let embeddings = embed_all(provider, &posts);
    run_matching(&matching_config(threshold), posts, rejected, &embeddings)
}

/// Member ids of every group, in group order.
pub fn group_ids(outcome: &MatchOutcome) -> Vec<Vec<String>> {
    outcome
        .partition
        .matched
        .iter()
        .map(|g| g.posts.iter().map(|p| p.id.clone()).collect())
        .collect()
}

pub fn unmatched_ids(outcome: &MatchOutcome, source: Source) -> Vec<String> {
    outcome
        .partition
        .unmatched(source)
        .iter()
        .map(|p| p.id.clone())
        .collect()
}

/// Small linear congruential generator for reproducible fixtures.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    /// Uniform-ish value in [-1, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    }

    pub fn vector(&mut self, dims: usize) -> Vec<f32> {
        (0..dims).map(|_| self.next_f32()).collect()
    }
}
