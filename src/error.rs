//! Error taxonomy for the matching core.
//!
//! Per-item errors ([`InvalidPostError`], [`EmbeddingFailure`]) degrade only the
//! affected post. Run-level errors ([`ConfigError`]) abort before any input is
//! processed. [`InvariantViolation`] means the resolver produced an inconsistent
//! result and is never swallowed.

use thiserror::Error;

use crate::post::{PostKey, Source};

/// A raw record that could not become a [`crate::post::Post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPostError {
    EmptyText,

    EmptyId,

    DuplicateId { source: Source, id: String },
}

// Hand-written because thiserror treats a field named `source` as the error
// cause, which `Source` is not.
impl std::fmt::Display for InvalidPostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyText => f.write_str("title and body are both empty after normalization"),
            Self::EmptyId => f.write_str("record has an empty id"),
            Self::DuplicateId { source, id } => {
                write!(f, "duplicate id {id:?} within source {source}")
            }
        }
    }
}

impl std::error::Error for InvalidPostError {}

/// The embedding capability could not produce a usable vector for a post.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingFailure {
    #[error("embedding provider failed: {0}")]
    Provider(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding contains non-finite values")]
    NonFinite,

    #[error("embedding is a zero vector")]
    ZeroVector,
}

/// Invalid or missing configuration. Fatal, raised before processing starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("similarity threshold {0} is outside (0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("invalid threshold value {0:?}")]
    ThresholdUnparsable(String),

    #[error("no sources configured")]
    NoSources,

    #[error("unknown source {0:?}. Supported: pikabu, habr, telegram")]
    UnknownSource(String),

    #[error("source {0} is configured more than once")]
    DuplicateSource(Source),

    #[error("input contains posts from source {0}, which is not configured")]
    UnconfiguredSource(Source),

    #[error("embedding dimensionality must be greater than zero")]
    ZeroDimensions,

    #[error("unknown embedding provider: {0}. Supported: local")]
    UnknownProvider(String),

    #[error("normalize.{0} must be greater than zero")]
    ZeroTextCap(&'static str),
}

/// Internal consistency failure. Indicates a bug in the resolver or partitioner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("match group contains both {first} and {second} from the same source")]
    SourceCollision { first: PostKey, second: PostKey },

    #[error("post {0} belongs to more than one match group")]
    PostInMultipleGroups(PostKey),

    #[error("match group with {0} post(s) would be emitted")]
    DegenerateGroup(usize),

    #[error("post {key} appears {count} times across the partition")]
    PartitionMismatch { key: PostKey, count: usize },

    #[error("score matrix of {rows}x{cols} cannot hold {values} values")]
    MatrixShape {
        rows: usize,
        cols: usize,
        values: usize,
    },

    #[error("similarity score {score} for {a} / {b} is outside [0, 1]")]
    ScoreOutOfRange { a: PostKey, b: PostKey, score: f64 },
}

/// Top-level error returned by the matching pipeline.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

pub type MatchResult<T> = Result<T, MatchError>;
