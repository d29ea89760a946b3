//! Cross-source semantic matching of posts.
//!
//! Crossmatch ingests posts from a link aggregator (Pikabu), a technical blog
//! platform (Habr) and messaging channels (Telegram), and decides which posts
//! across sources tell the same story. Matching is based on sentence-embedding
//! similarity, never on text or URL equality.
//!
//! # Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Normalize | [`post::normalize`] | [`post::Post`]s and rejected records |
//! | Embed | [`embedding`] | one vector per post, failures routed aside |
//! | Score | [`matching::similarity`] | one score matrix per source pair |
//! | Resolve | [`matching::resolver`] | match groups, at most one post per source |
//! | Partition | [`matching::partition`] | matched groups + per-source residues |
//! | Persist | [`sink`] | JSON files |
//!
//! Scores are `(cos + 1) / 2` in `[0, 1]`. Per source pair the resolver runs
//! greedy maximum-score assignment above a threshold τ, then merges the
//! confirmed pairs into connected components.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`error`]: Error taxonomy for per-item, configuration and invariant failures
//! - [`post`]: Canonical post model and normalization
//! - [`embedding`]: Text-to-vector embedding via ONNX Runtime
//! - [`matching`]: Similarity index, resolver and partitioner
//! - [`ingest`]: Reading scraper dumps
//! - [`sink`]: Writing results

pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod matching;
pub mod post;
pub mod sink;
