//! Turns pairwise score matrices into match groups.
//!
//! 1. Per source pair, greedy maximum-score assignment: repeatedly take the
//!    highest remaining entry at or above τ, consume both posts, repeat.
//!    Equal scores are ordered by the smaller left key, then the smaller
//!    right key.
//! 2. The confirmed links of all pairs form an undirected graph whose
//!    connected components are the match groups. Links are merged strongest
//!    first; a link that would put two posts of one source into a component
//!    is dropped.
//! 3. The resulting groups are verified before they are returned.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::similarity::{ScoreMatrix, SimilarityIndex};
use crate::config::validate_threshold;
use crate::error::{InvariantViolation, MatchResult};
use crate::post::{PostKey, Source};

/// A confirmed pairwise match between posts of two different sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchLink {
    pub a: PostKey,
    pub b: PostKey,
    pub score: f64,
}

/// Strongest first; equal scores by `a`, then `b`.
fn link_order(x: &MatchLink, y: &MatchLink) -> Ordering {
    y.score
        .total_cmp(&x.score)
        .then_with(|| x.a.cmp(&y.a))
        .then_with(|| x.b.cmp(&y.b))
}

/// A resolved group: 2+ posts, at most one per source, plus the links that
/// joined them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedGroup {
    /// Sorted by source, then id.
    pub members: Vec<PostKey>,
    pub links: Vec<MatchLink>,
}

/// Result of resolving one run.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub groups: Vec<ResolvedGroup>,
    /// Pairwise links confirmed by the greedy step but dropped during closure.
    pub rejected_links: Vec<MatchLink>,
}

/// Greedy maximum-score assignment over one source-pair matrix.
///
/// Each post takes part in at most one returned link. Non-finite scores never
/// match.
pub fn greedy_assign(matrix: &ScoreMatrix, threshold: f64) -> Vec<MatchLink> {
    let mut candidates: Vec<(usize, usize, f64)> = matrix
        .entries()
        .filter(|&(_, _, score)| score.is_finite() && score >= threshold)
        .collect();

    candidates.sort_by(|&(ri, ci, si), &(rj, cj, sj)| {
        sj.total_cmp(&si)
            .then_with(|| matrix.rows()[ri].cmp(&matrix.rows()[rj]))
            .then_with(|| matrix.cols()[ci].cmp(&matrix.cols()[cj]))
    });

    let (rows, cols) = matrix.shape();
    let mut row_used = vec![false; rows];
    let mut col_used = vec![false; cols];
    let mut links = Vec::new();

    for (i, j, score) in candidates {
        if row_used[i] || col_used[j] {
            continue;
        }
        row_used[i] = true;
        col_used[j] = true;
        tracing::trace!(
            a = %matrix.rows()[i],
            b = %matrix.cols()[j],
            score,
            "pair confirmed"
        );
        links.push(MatchLink {
            a: matrix.rows()[i].clone(),
            b: matrix.cols()[j].clone(),
            score,
        });
    }

    links
}

/// Union-find over post keys, tracking which sources each component holds.
struct Components {
    index: HashMap<PostKey, usize>,
    keys: Vec<PostKey>,
    parent: Vec<usize>,
    sources: Vec<BTreeSet<Source>>,
}

impl Components {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            keys: Vec::new(),
            parent: Vec::new(),
            sources: Vec::new(),
        }
    }

    fn node(&mut self, key: &PostKey) -> usize {
        if let Some(&i) = self.index.get(key) {
            return i;
        }
        let i = self.keys.len();
        self.index.insert(key.clone(), i);
        self.keys.push(key.clone());
        self.parent.push(i);
        self.sources.push(BTreeSet::from([key.source]));
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Join the components of `a` and `b` unless that would repeat a source.
    /// Returns false when the link must be dropped.
    fn try_union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return true;
        }
        if !self.sources[ra].is_disjoint(&self.sources[rb]) {
            return false;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        let moved = std::mem::take(&mut self.sources[child]);
        self.sources[root].extend(moved);
        self.parent[child] = root;
        true
    }
}

/// Merge confirmed links into connected components.
pub fn close_links(mut links: Vec<MatchLink>) -> Resolution {
    links.sort_by(link_order);

    let mut components = Components::new();
    let mut accepted = Vec::with_capacity(links.len());
    let mut rejected_links = Vec::new();

    for link in links {
        let a = components.node(&link.a);
        let b = components.node(&link.b);
        if components.try_union(a, b) {
            accepted.push((a, link));
        } else {
            tracing::debug!(
                a = %link.a,
                b = %link.b,
                score = link.score,
                "link dropped: would place two posts of one source in a group"
            );
            rejected_links.push(link);
        }
    }

    let mut by_root: BTreeMap<usize, ResolvedGroup> = BTreeMap::new();
    for (node, link) in accepted {
        let root = components.find(node);
        by_root
            .entry(root)
            .or_insert_with(|| ResolvedGroup {
                members: Vec::new(),
                links: Vec::new(),
            })
            .links
            .push(link);
    }

    let mut groups: Vec<ResolvedGroup> = by_root
        .into_values()
        .map(|mut group| {
            let members: BTreeSet<PostKey> = group
                .links
                .iter()
                .flat_map(|l| [l.a.clone(), l.b.clone()])
                .collect();
            group.members = members.into_iter().collect();
            group.links.sort_by(|x, y| x.a.cmp(&y.a).then_with(|| x.b.cmp(&y.b)));
            group
        })
        .collect();
    groups.sort_by(|x, y| x.members.cmp(&y.members));

    Resolution {
        groups,
        rejected_links,
    }
}

/// Check the group invariants: 2+ members, one post per source, no post in
/// two groups.
pub fn verify_groups(groups: &[ResolvedGroup]) -> Result<(), InvariantViolation> {
    let mut seen: BTreeSet<&PostKey> = BTreeSet::new();
    for group in groups {
        if group.members.len() < 2 {
            return Err(InvariantViolation::DegenerateGroup(group.members.len()));
        }
        let mut by_source: BTreeMap<Source, &PostKey> = BTreeMap::new();
        for key in &group.members {
            if let Some(first) = by_source.insert(key.source, key) {
                return Err(InvariantViolation::SourceCollision {
                    first: first.clone(),
                    second: key.clone(),
                });
            }
            if !seen.insert(key) {
                return Err(InvariantViolation::PostInMultipleGroups(key.clone()));
            }
        }
    }
    Ok(())
}

/// Resolve every matrix of the index into verified match groups.
///
/// Fails fast with a config error when τ lies outside (0, 1].
pub fn resolve(index: &SimilarityIndex, threshold: f64) -> MatchResult<Resolution> {
    validate_threshold(threshold)?;

    let mut links = Vec::new();
    for matrix in index.matrices() {
        let pair_links = greedy_assign(matrix, threshold);
        tracing::debug!(
            left = %matrix.left(),
            right = %matrix.right(),
            links = pair_links.len(),
            "pair resolved"
        );
        links.extend(pair_links);
    }

    let resolution = close_links(links);
    verify_groups(&resolution.groups)?;

    if !resolution.rejected_links.is_empty() {
        tracing::warn!(
            dropped = resolution.rejected_links.len(),
            "conflicting links dropped during group closure"
        );
    }
    Ok(resolution)
}
