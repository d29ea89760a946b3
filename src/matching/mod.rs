//! Cross-source matching pipeline.
//!
//! posts + embeddings → [`similarity::SimilarityIndex`] → [`resolver::resolve`]
//! → [`partition::Partition`].

pub mod partition;
pub mod resolver;
pub mod similarity;

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::config::MatchingConfig;
use crate::embedding::EmbeddingSet;
use crate::error::{ConfigError, MatchResult};
use crate::post::{Post, PostKey, RejectedRecord, Source};
use partition::{FailedEmbedding, Partition};
use resolver::MatchLink;
use similarity::SimilarityIndex;

/// Counts describing one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub threshold: f64,
    pub input_posts: usize,
    pub excluded: usize,
    pub embedding_failures: usize,
    pub groups: usize,
    /// Group count keyed by group size (2, 3, ...).
    pub groups_by_size: BTreeMap<usize, usize>,
    pub matched_posts: usize,
    pub unmatched: BTreeMap<Source, usize>,
    pub dropped_links: usize,
}

/// Output of [`run_matching`].
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub partition: Partition,
    pub stats: RunStats,
    /// Links confirmed per source pair but dropped while closing groups.
    pub dropped_links: Vec<MatchLink>,
}

/// Check that every post belongs to a configured source.
pub fn check_sources(sources: &[Source], posts: &[Post]) -> Result<(), ConfigError> {
    match posts.iter().find(|p| !sources.contains(&p.source)) {
        Some(post) => Err(ConfigError::UnconfiguredSource(post.source)),
        None => Ok(()),
    }
}

/// Match a finished run's posts.
///
/// `posts` are the normalized posts in input order; `excluded` are the records
/// rejected during normalization. Every embedding must already be computed:
/// posts missing from `embeddings` go straight to their source's unmatched
/// residue. Configuration is validated before anything else happens, and a
/// `(source, id)` key repeated in `posts` fails the run.
pub fn run_matching(
    config: &MatchingConfig,
    posts: Vec<Post>,
    excluded: Vec<RejectedRecord>,
    embeddings: &EmbeddingSet,
) -> MatchResult<MatchOutcome> {
    let sources = config.validate()?;
    check_sources(&sources, &posts)?;
    partition::check_unique_keys(&posts)?;

    let mut failures: Vec<FailedEmbedding> = embeddings
        .failures()
        .iter()
        .map(|(key, failure)| FailedEmbedding::new(key.clone(), failure))
        .collect();
    let failed: HashSet<PostKey> = failures.iter().map(|f| f.key.clone()).collect();
    for post in &posts {
        let key = post.key();
        if embeddings.get(&key).is_none() && !failed.contains(&key) {
            failures.push(FailedEmbedding {
                key,
                reason: "no embedding produced".into(),
            });
        }
    }

    let index = SimilarityIndex::build(&sources, &posts, embeddings);
    let resolution = resolver::resolve(&index, config.threshold)?;

    let input_posts = posts.len();
    let partition = Partition::build(&sources, posts, &resolution.groups, excluded, failures)?;

    let mut groups_by_size = BTreeMap::new();
    for group in &partition.matched {
        *groups_by_size.entry(group.len()).or_insert(0) += 1;
    }
    let stats = RunStats {
        threshold: config.threshold,
        input_posts,
        excluded: partition.excluded.len(),
        embedding_failures: partition.embedding_failures.len(),
        groups: partition.matched.len(),
        groups_by_size,
        matched_posts: partition.matched_post_count(),
        unmatched: partition
            .unmatched
            .iter()
            .map(|(s, posts)| (*s, posts.len()))
            .collect(),
        dropped_links: resolution.rejected_links.len(),
    };

    tracing::info!(
        posts = stats.input_posts,
        groups = stats.groups,
        matched = stats.matched_posts,
        excluded = stats.excluded,
        embedding_failures = stats.embedding_failures,
        "matching complete"
    );

    Ok(MatchOutcome {
        partition,
        stats,
        dropped_links: resolution.rejected_links,
    })
}
