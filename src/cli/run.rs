//! CLI `run` command: load dumps, normalize, embed, match, write results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crossmatch::config::CrossmatchConfig;
use crossmatch::embedding::{create_provider, embed_posts};
use crossmatch::ingest::{default_dump_path, read_dump};
use crossmatch::matching::{run_matching, RunStats};
use crossmatch::post::normalize::normalize_records;
use crossmatch::post::Source;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Pikabu dump (defaults to <input-dir>/pikabu.json)
    #[arg(long)]
    pub pikabu: Option<PathBuf>,
    /// Habr dump (defaults to <input-dir>/habr.json)
    #[arg(long)]
    pub habr: Option<PathBuf>,
    /// Telegram dump (defaults to <input-dir>/telegram.json)
    #[arg(long)]
    pub telegram: Option<PathBuf>,
    /// Directory holding the source dumps (defaults to the output dir)
    #[arg(long)]
    pub input_dir: Option<PathBuf>,
    /// Similarity threshold in (0, 1], overrides the config file
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Directory for result files
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    fn dump_path(&self, source: Source) -> Option<&PathBuf> {
        match source {
            Source::Pikabu => self.pikabu.as_ref(),
            Source::Habr => self.habr.as_ref(),
            Source::Telegram => self.telegram.as_ref(),
        }
    }
}

/// Execute a full matching run.
pub async fn run(mut config: CrossmatchConfig, args: RunArgs) -> Result<()> {
    if let Some(threshold) = args.threshold {
        config.matching.threshold = threshold;
    }
    // Fail fast before touching any input.
    let sources = config.validate().context("invalid configuration")?;

    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| config.resolved_output_dir());
    let input_dir = args.input_dir.clone().unwrap_or_else(|| output_dir.clone());

    let mut posts = Vec::new();
    let mut excluded = Vec::new();
    for &source in &sources {
        let path = args
            .dump_path(source)
            .cloned()
            .unwrap_or_else(|| default_dump_path(&input_dir, source));
        let records = read_dump(&path, source)?;
        let (kept, rejected) = normalize_records(source, &records, &config.normalize);
        posts.extend(kept);
        excluded.extend(rejected);
    }
    tracing::info!(
        posts = posts.len(),
        excluded = excluded.len(),
        "input normalized"
    );

    let provider = create_provider(&config.embedding)?;
    let batch_size = config.embedding.batch_size;
    let pb = ProgressBar::new(posts.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  embedding {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    // All embeddings complete before similarity scoring starts.
    let progress = pb.clone();
    let (posts, embeddings) = tokio::task::spawn_blocking(move || {
        let set = embed_posts(provider.as_ref(), &posts, batch_size, |n| {
            progress.inc(n as u64)
        });
        (posts, set)
    })
    .await
    .context("embedding task failed")?;
    pb.finish_and_clear();

    let outcome = run_matching(&config.matching, posts, excluded, &embeddings)?;
    let written = crossmatch::sink::write_outcome(&output_dir, &outcome)?;

    print_summary(&outcome.stats);
    println!();
    for path in written {
        println!("  wrote {}", path.display());
    }
    Ok(())
}

fn print_summary(stats: &RunStats) {
    println!("Matching Summary");
    println!("{}", "=".repeat(40));
    println!("  Threshold:           {}", stats.threshold);
    println!("  Input posts:         {}", stats.input_posts);
    println!("  Excluded records:    {}", stats.excluded);
    println!("  Embedding failures:  {}", stats.embedding_failures);
    println!();
    println!("Matched:");
    println!("  Groups:              {}", stats.groups);
    for (size, count) in &stats.groups_by_size {
        println!("    {size}-source:          {count}");
    }
    println!("  Posts:               {}", stats.matched_posts);
    if stats.dropped_links > 0 {
        println!("  Conflicting links:   {}", stats.dropped_links);
    }
    println!();
    println!("Unmatched:");
    for (source, count) in &stats.unmatched {
        println!("  {:<12} {}", source.as_str(), count);
    }
}
