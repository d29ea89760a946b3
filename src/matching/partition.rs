//! Splits a run's posts into match groups and per-source unmatched residues.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::resolver::{MatchLink, ResolvedGroup};
use crate::error::{EmbeddingFailure, InvariantViolation};
use crate::post::{Post, PostKey, RejectedRecord, Source};

/// Posts judged to describe the same story, at most one per source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchGroup {
    /// Sorted by source, then id.
    pub posts: Vec<Post>,
    pub links: Vec<MatchLink>,
}

impl MatchGroup {
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn post(&self, source: Source) -> Option<&Post> {
        self.posts.iter().find(|p| p.source == source)
    }

    pub fn keys(&self) -> Vec<PostKey> {
        self.posts.iter().map(Post::key).collect()
    }
}

/// A post whose embedding failed. The post itself sits in its source's
/// unmatched residue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEmbedding {
    pub key: PostKey,
    pub reason: String,
}

impl FailedEmbedding {
    pub fn new(key: PostKey, failure: &EmbeddingFailure) -> Self {
        Self {
            key,
            reason: failure.to_string(),
        }
    }
}

/// Terminal output of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Partition {
    pub matched: Vec<MatchGroup>,
    /// One entry per configured source, in input order.
    pub unmatched: BTreeMap<Source, Vec<Post>>,
    /// Records rejected during normalization. Never part of matching.
    pub excluded: Vec<RejectedRecord>,
    /// Posts routed to unmatched because no embedding could be produced.
    pub embedding_failures: Vec<FailedEmbedding>,
}

/// Every post of a run must have its own `(source, id)` key. Reports the
/// first repeated key in input order with its total count.
pub fn check_unique_keys(posts: &[Post]) -> Result<(), InvariantViolation> {
    let mut counts: HashMap<PostKey, usize> = HashMap::with_capacity(posts.len());
    for post in posts {
        *counts.entry(post.key()).or_default() += 1;
    }
    match posts.iter().map(Post::key).find(|k| counts[k] > 1) {
        Some(key) => {
            let count = counts[&key];
            Err(InvariantViolation::PartitionMismatch { key, count })
        }
        None => Ok(()),
    }
}

impl Partition {
    /// Build the partition from the run's valid posts (in input order) and the
    /// resolved groups, then verify that every post landed exactly once.
    pub fn build(
        sources: &[Source],
        posts: Vec<Post>,
        groups: &[ResolvedGroup],
        excluded: Vec<RejectedRecord>,
        embedding_failures: Vec<FailedEmbedding>,
    ) -> Result<Self, InvariantViolation> {
        check_unique_keys(&posts)?;
        let input_keys: Vec<PostKey> = posts.iter().map(Post::key).collect();
        let mut by_key: HashMap<PostKey, Post> =
            posts.into_iter().map(|p| (p.key(), p)).collect();

        let mut matched = Vec::with_capacity(groups.len());
        for group in groups {
            if group.members.len() < 2 {
                return Err(InvariantViolation::DegenerateGroup(group.members.len()));
            }
            let mut members = Vec::with_capacity(group.members.len());
            for key in &group.members {
                let post = by_key.remove(key).ok_or_else(|| {
                    if input_keys.contains(key) {
                        InvariantViolation::PostInMultipleGroups(key.clone())
                    } else {
                        InvariantViolation::PartitionMismatch {
                            key: key.clone(),
                            count: 0,
                        }
                    }
                })?;
                members.push(post);
            }
            members.sort_by(|a, b| a.key().cmp(&b.key()));
            matched.push(MatchGroup {
                posts: members,
                links: group.links.clone(),
            });
        }

        let mut unmatched: BTreeMap<Source, Vec<Post>> =
            sources.iter().map(|&s| (s, Vec::new())).collect();
        for key in &input_keys {
            if let Some(post) = by_key.remove(key) {
                unmatched.entry(post.source).or_default().push(post);
            }
        }

        let partition = Self {
            matched,
            unmatched,
            excluded,
            embedding_failures,
        };
        partition.verify(&input_keys)?;
        Ok(partition)
    }

    /// Unmatched residue of one source.
    pub fn unmatched(&self, source: Source) -> &[Post] {
        self.unmatched.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every input post appears exactly once across matched groups and
    /// unmatched residues, and no group repeats a source.
    pub fn verify(&self, input_keys: &[PostKey]) -> Result<(), InvariantViolation> {
        let mut counts: HashMap<PostKey, usize> =
            input_keys.iter().map(|k| (k.clone(), 0)).collect();

        for group in &self.matched {
            let mut sources: BTreeMap<Source, PostKey> = BTreeMap::new();
            for post in &group.posts {
                let key = post.key();
                if let Some(first) = sources.insert(post.source, key.clone()) {
                    return Err(InvariantViolation::SourceCollision { first, second: key });
                }
                *counts.entry(key).or_default() += 1;
            }
        }
        for post in self.unmatched.values().flatten() {
            *counts.entry(post.key()).or_default() += 1;
        }

        let mut bad: Vec<(PostKey, usize)> =
            counts.into_iter().filter(|(_, n)| *n != 1).collect();
        bad.sort();
        match bad.into_iter().next() {
            Some((key, count)) => Err(InvariantViolation::PartitionMismatch { key, count }),
            None => Ok(()),
        }
    }

    pub fn matched_post_count(&self) -> usize {
        self.matched.iter().map(MatchGroup::len).sum()
    }

    pub fn unmatched_post_count(&self) -> usize {
        self.unmatched.values().map(Vec::len).sum()
    }
}
