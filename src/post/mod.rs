//! Canonical post model shared by every source.
//!
//! Source adapters hand the core [`RawRecord`]s; [`normalize`] turns them into
//! [`Post`]s or reports them as [`RejectedRecord`]s.

pub mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of content sources. Declaration order is the canonical
/// source ordering used to enumerate source pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Link-aggregator site.
    Pikabu,
    /// Technical blog platform.
    Habr,
    /// Messaging channel.
    Telegram,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Pikabu, Source::Habr, Source::Telegram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pikabu => "pikabu",
            Self::Habr => "habr",
            Self::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pikabu" => Ok(Self::Pikabu),
            "habr" => Ok(Self::Habr),
            "telegram" | "tg" => Ok(Self::Telegram),
            _ => Err(crate::error::ConfigError::UnknownSource(s.to_string())),
        }
    }
}

/// Globally unique identity of a post: `(source, id)`.
///
/// Ordering is by source (canonical order) and then by id, lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PostKey {
    pub source: Source,
    pub id: String,
}

impl PostKey {
    pub fn new(source: Source, id: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for PostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// A record as delivered by a source adapter, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub url: String,
}

/// A normalized content item. `title` and `body` are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub source: Source,
    pub title: String,
    pub body: String,
    /// Source-reported publication time, `None` when unknown.
    pub published_at: Option<DateTime<Utc>>,
    /// Display only. Never used for matching.
    pub url: String,
    /// True when the source had no title and it was taken from the body.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub title_derived: bool,
}

impl Post {
    pub fn key(&self) -> PostKey {
        PostKey::new(self.source, self.id.clone())
    }

    /// Text handed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        if self.title_derived || self.title == self.body {
            self.body.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }
}

/// A raw record excluded from matching because it failed normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub source: Source,
    pub id: String,
    pub url: String,
    #[serde(serialize_with = "serialize_display")]
    pub reason: crate::error::InvalidPostError,
}

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
