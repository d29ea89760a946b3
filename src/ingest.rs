//! Reading scraper dumps into [`RawRecord`]s.
//!
//! Each source's scraper writes `<source>.json` shaped as
//! `{"metadata": {...}, "posts": [...]}`; a bare array is accepted too. Field
//! names differ per source and are mapped here:
//!
//! | RawRecord      | Accepted keys                  |
//! |----------------|--------------------------------|
//! | `id`           | `id` (number or string)        |
//! | `title`        | `title`                        |
//! | `body`         | `content`, `text`, `body`      |
//! | `published_at` | `date`, `published_at`         |
//! | `url`          | `post_url`, `url`              |
//!
//! Records without an id (Habr dumps carry none) get their 1-based position,
//! or `pos-<n>` when another record of the dump already carries that id.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::post::{RawRecord, Source};

#[derive(Debug, Deserialize)]
struct DumpRecord {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "content", alias = "text")]
    body: Option<String>,
    #[serde(default, alias = "date")]
    published_at: Option<String>,
    #[serde(default, alias = "post_url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Dump {
    Envelope { posts: Vec<DumpRecord> },
    Bare(Vec<DumpRecord>),
}

impl DumpRecord {
    fn explicit_id(&self) -> Option<String> {
        match &self.id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    fn into_raw(self, id: String) -> RawRecord {
        RawRecord {
            id,
            title: self.title.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            published_at: self.published_at,
            url: self.url.unwrap_or_default(),
        }
    }
}

/// Id for a record without one: its 1-based position, or `pos-<n>` when the
/// dump already uses that id.
fn positional_id(position: usize, taken: &HashSet<String>) -> String {
    let plain = position.to_string();
    if !taken.contains(&plain) {
        return plain;
    }
    let mut candidate = format!("pos-{position}");
    let mut n = 1;
    while taken.contains(&candidate) {
        n += 1;
        candidate = format!("pos-{position}-{n}");
    }
    candidate
}

/// `<dir>/<source>.json`
pub fn default_dump_path(dir: &Path, source: Source) -> PathBuf {
    dir.join(format!("{}.json", source.as_str()))
}

/// Parse a dump from a JSON string.
pub fn parse_dump(json: &str) -> Result<Vec<RawRecord>> {
    let dump: Dump = serde_json::from_str(json).context("dump is not a post list or envelope")?;
    let records = match dump {
        Dump::Envelope { posts } => posts,
        Dump::Bare(posts) => posts,
    };

    let mut taken: HashSet<String> = records.iter().filter_map(DumpRecord::explicit_id).collect();
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let id = record.explicit_id().unwrap_or_else(|| {
                let id = positional_id(i + 1, &taken);
                taken.insert(id.clone());
                id
            });
            record.into_raw(id)
        })
        .collect())
}

/// Read one source's dump. A missing file is an empty source.
pub fn read_dump(path: &Path, source: Source) -> Result<Vec<RawRecord>> {
    if !path.exists() {
        tracing::warn!(source = %source, path = %path.display(), "no dump found, source is empty");
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let records =
        parse_dump(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::info!(source = %source, records = records.len(), path = %path.display(), "dump loaded");
    Ok(records)
}
