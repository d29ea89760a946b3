//! CLI `doctor` command: check configuration and model files.

use anyhow::Result;

use crossmatch::config::CrossmatchConfig;
use crossmatch::embedding::local::model_dir;

/// Validate the configuration and report whether the model is installed.
pub fn doctor(config: &CrossmatchConfig) -> Result<()> {
    println!("Crossmatch Health Report");
    println!("========================");
    println!();

    match config.validate() {
        Ok(sources) => {
            let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
            println!("Configuration:     OK");
            println!("  Threshold:       {}", config.matching.threshold);
            println!("  Sources:         {}", names.join(", "));
        }
        Err(e) => {
            println!("Configuration:     INVALID ({e})");
        }
    }
    println!("  Output dir:      {}", config.resolved_output_dir().display());
    println!();

    let dir = model_dir(&config.embedding);
    println!("Embedding model:");
    println!("  Provider:        {}", config.embedding.provider);
    println!("  Model:           {}", config.embedding.model);
    println!("  Dimensions:      {}", config.embedding.dimensions);
    println!("  Directory:       {}", dir.display());
    for file in ["model.onnx", "tokenizer.json"] {
        let path = dir.join(file);
        match std::fs::metadata(&path) {
            Ok(meta) => println!("  {file:<16} {}", format_bytes(meta.len())),
            Err(_) => println!("  {file:<16} MISSING"),
        }
    }
    if !dir.join("model.onnx").exists() || !dir.join("tokenizer.json").exists() {
        println!();
        println!("Run `crossmatch model download` to fetch the model.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
