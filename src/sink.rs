//! JSON result sink.
//!
//! Writes one file per output bucket, each wrapped in a `{"metadata", ...}`
//! envelope:
//!
//! - `matched_posts.json`: match groups with their link scores
//! - `unmatched_<source>.json`: per-source residues
//! - `excluded.json`: records rejected during normalization
//! - `summary.json`: run statistics, embedding failures and dropped links

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::matching::partition::{FailedEmbedding, MatchGroup};
use crate::matching::resolver::MatchLink;
use crate::matching::{MatchOutcome, RunStats};
use crate::post::{Post, RejectedRecord};

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub run_id: String,
    pub generated_at: String,
    pub threshold: f64,
    pub posts_count: usize,
}

#[derive(Serialize)]
struct MatchedFile<'a> {
    metadata: Metadata,
    groups: &'a [MatchGroup],
}

#[derive(Serialize)]
struct PostsFile<'a> {
    metadata: Metadata,
    posts: &'a [Post],
}

#[derive(Serialize)]
struct ExcludedFile<'a> {
    metadata: Metadata,
    records: &'a [RejectedRecord],
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    metadata: Metadata,
    stats: &'a RunStats,
    embedding_failures: &'a [FailedEmbedding],
    dropped_links: &'a [MatchLink],
}

/// Write a run's outcome into `dir`, creating it if needed. Returns the paths
/// written, in a fixed order.
pub fn write_outcome(dir: &Path, outcome: &MatchOutcome) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;

    let run_id = Uuid::now_v7().to_string();
    let generated_at = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();
    let meta = |posts_count: usize| Metadata {
        run_id: run_id.clone(),
        generated_at: generated_at.clone(),
        threshold: outcome.stats.threshold,
        posts_count,
    };

    let partition = &outcome.partition;
    let mut written = Vec::new();

    let path = dir.join("matched_posts.json");
    write_json(
        &path,
        &MatchedFile {
            metadata: meta(partition.matched_post_count()),
            groups: &partition.matched,
        },
    )?;
    written.push(path);

    for (source, posts) in &partition.unmatched {
        let path = dir.join(format!("unmatched_{}.json", source.as_str()));
        write_json(
            &path,
            &PostsFile {
                metadata: meta(posts.len()),
                posts,
            },
        )?;
        written.push(path);
    }

    let path = dir.join("excluded.json");
    write_json(
        &path,
        &ExcludedFile {
            metadata: meta(partition.excluded.len()),
            records: &partition.excluded,
        },
    )?;
    written.push(path);

    let path = dir.join("summary.json");
    write_json(
        &path,
        &SummaryFile {
            metadata: meta(outcome.stats.input_posts),
            stats: &outcome.stats,
            embedding_failures: &partition.embedding_failures,
            dropped_links: &outcome.dropped_links,
        },
    )?;
    written.push(path);

    tracing::info!(dir = %dir.display(), files = written.len(), %run_id, "results written");
    Ok(written)
}

/// Serialize to pretty JSON. Uses atomic write (tmp + rename).
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {}", tmp_path.display()))?;
    Ok(())
}
