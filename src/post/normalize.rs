//! Text normalization applied to every record before it enters the core.
//!
//! Strips HTML and markdown, collapses whitespace, caps lengths, and rejects
//! records that end up with no text at all.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Post, RawRecord, RejectedRecord, Source};
use crate::config::NormalizeConfig;
use crate::error::InvalidPostError;

static RE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6])\s*/?>").expect("valid regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[a-zA-Z][^>]*>").expect("valid regex"));
static RE_MD_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static RE_MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));
static RE_MD_LINE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(#{1,6}[ \t]+|>+[ \t]?|[-*+][ \t]+)").expect("valid regex"));
static RE_MD_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\*\*|__|~~|```|`)").expect("valid regex"));
static RE_HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w)").expect("valid regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize free text: decode entities, strip markup, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    out = RE_BREAKS.replace_all(&out, "\n").into_owned();
    out = RE_TAGS.replace_all(&out, " ").into_owned();

    out = RE_MD_IMAGE.replace_all(&out, "$1").into_owned();
    out = RE_MD_LINK.replace_all(&out, "$1").into_owned();
    out = RE_MD_LINE_PREFIX.replace_all(&out, "").into_owned();
    out = RE_MD_EMPHASIS.replace_all(&out, "").into_owned();
    out = RE_HASHTAG.replace_all(&out, "$1").into_owned();

    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => s[..end].trim_end().to_string(),
        None => s.to_string(),
    }
}

/// First sentence of `body`, capped at `max_chars`.
fn derive_title(body: &str, max_chars: usize) -> String {
    let mut end = body.len();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?' | '…')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace())
        {
            end = i;
            break;
        }
    }
    let sentence = body[..end].trim();
    truncate_chars(sentence, max_chars)
}

/// Parse a source-reported timestamp. Unknown formats yield `None`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

impl Post {
    /// Build a normalized post from a raw adapter record.
    ///
    /// A missing title is taken from the first sentence of the body; a missing
    /// body reuses the title. Fails when both are empty.
    pub fn from_raw(
        source: Source,
        raw: &RawRecord,
        config: &NormalizeConfig,
    ) -> Result<Post, InvalidPostError> {
        let id = raw.id.trim();
        if id.is_empty() {
            return Err(InvalidPostError::EmptyId);
        }

        let mut title = truncate_chars(&normalize_text(&raw.title), config.max_title_chars);
        let mut body = truncate_chars(&normalize_text(&raw.body), config.max_body_chars);
        let mut title_derived = false;

        match (title.is_empty(), body.is_empty()) {
            (true, true) => return Err(InvalidPostError::EmptyText),
            (true, false) => {
                title = derive_title(&body, config.max_title_chars);
                if title.is_empty() {
                    title = truncate_chars(&body, config.max_title_chars);
                }
                title_derived = true;
            }
            (false, true) => body = title.clone(),
            (false, false) => {}
        }
        // Only reachable with zero length caps.
        if title.is_empty() || body.is_empty() {
            return Err(InvalidPostError::EmptyText);
        }

        Ok(Post {
            id: id.to_string(),
            source,
            title,
            body,
            published_at: raw.published_at.as_deref().and_then(parse_timestamp),
            url: raw.url.trim().to_string(),
            title_derived,
        })
    }
}

/// Normalize every record of one source, separating valid posts from rejects.
///
/// The first occurrence of an id wins; later duplicates are rejected.
pub fn normalize_records(
    source: Source,
    records: &[RawRecord],
    config: &NormalizeConfig,
) -> (Vec<Post>, Vec<RejectedRecord>) {
    let mut posts = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for raw in records {
        let result = Post::from_raw(source, raw, config).and_then(|post| {
            if seen.insert(post.id.clone()) {
                Ok(post)
            } else {
                Err(InvalidPostError::DuplicateId {
                    source,
                    id: post.id,
                })
            }
        });

        match result {
            Ok(post) => posts.push(post),
            Err(reason) => {
                tracing::warn!(source = %source, id = %raw.id, %reason, "record excluded");
                rejected.push(RejectedRecord {
                    source,
                    id: raw.id.clone(),
                    url: raw.url.clone(),
                    reason,
                });
            }
        }
    }

    tracing::debug!(
        source = %source,
        kept = posts.len(),
        rejected = rejected.len(),
        "records normalized"
    );

    (posts, rejected)
}
