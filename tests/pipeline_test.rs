mod helpers;

use std::fs;

use crossmatch::config::{CrossmatchConfig, NormalizeConfig};
use crossmatch::ingest::{default_dump_path, read_dump};
use crossmatch::matching::run_matching;
use crossmatch::post::normalize::normalize_records;
use crossmatch::post::Source;
use crossmatch::sink::write_outcome;
use helpers::*;
use tempfile::TempDir;

const PIKABU_DUMP: &str = r#"{
  "metadata": {"generated_at": "2025-04-01 10:00", "posts_count": 2},
  "posts": [
    {"id": 101, "title": "Вышел **Rust 1.86** mkrustx", "content": "<p>Новая версия языка</p>",
     "date": "2025-03-30 12:00", "post_url": "https://pikabu.ru/story/101", "rating": 50},
    {"id": 102, "title": "Кот и пылесос mkcatx", "content": "Смешное видео",
     "date": "2025-03-30 13:00", "post_url": "https://pikabu.ru/story/102", "rating": 900}
  ]
}"#;

const HABR_DUMP: &str = r#"[
  {"title": "Релиз Rust 1.86 mkrust2x", "date": "2025-03-30", "content": "Разбор изменений"},
  {"title": "Kubernetes в проде mkk8sx", "date": "2025-03-29", "content": "Опыт команды"}
]"#;

fn provider() -> StaticEmbeddingProvider {
    StaticEmbeddingProvider::new(DIMS)
        .with("mkrustx", vec![1.0, 0.0, 0.0])
        .with("mkrust2x", vec![0.98, 0.2, 0.0])
        .with("mkcatx", vec![0.0, 1.0, 0.0])
        .with("mkk8sx", vec![0.0, 0.0, 1.0])
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn dumps_to_result_files() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(default_dump_path(&input, Source::Pikabu), PIKABU_DUMP).unwrap();
    fs::write(default_dump_path(&input, Source::Habr), HABR_DUMP).unwrap();

    let normalize = NormalizeConfig::default();
    let mut posts = Vec::new();
    let mut excluded = Vec::new();
    for source in Source::ALL {
        let records = read_dump(&default_dump_path(&input, source), source).unwrap();
        let (kept, rejected) = normalize_records(source, &records, &normalize);
        posts.extend(kept);
        excluded.extend(rejected);
    }
    assert_eq!(posts.len(), 4);
    assert_eq!(posts[0].title, "Вышел Rust 1.86 mkrustx");
    assert_eq!(posts[0].body, "Новая версия языка");
    assert_eq!(posts[2].id, "1");

    let embeddings = embed_all(&provider(), &posts);
    let outcome = run_matching(&matching_config(0.9), posts, excluded, &embeddings).unwrap();
    assert_eq!(group_ids(&outcome), vec![vec!["101", "1"]]);
    assert_eq!(unmatched_ids(&outcome, Source::Pikabu), vec!["102"]);
    assert_eq!(unmatched_ids(&outcome, Source::Habr), vec!["2"]);

    let out = tmp.path().join("out");
    let written = write_outcome(&out, &outcome).unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "matched_posts.json",
            "unmatched_pikabu.json",
            "unmatched_habr.json",
            "unmatched_telegram.json",
            "excluded.json",
            "summary.json",
        ]
    );

    let matched = read_json(&out.join("matched_posts.json"));
    assert_eq!(matched["metadata"]["threshold"], 0.9);
    assert_eq!(matched["metadata"]["posts_count"], 2);
    let group = &matched["groups"][0];
    assert_eq!(group["posts"][0]["source"], "pikabu");
    assert_eq!(group["posts"][1]["source"], "habr");
    assert_eq!(group["links"][0]["a"]["id"], "101");

    let telegram = read_json(&out.join("unmatched_telegram.json"));
    assert_eq!(telegram["posts"].as_array().unwrap().len(), 0);

    let summary = read_json(&out.join("summary.json"));
    assert_eq!(summary["stats"]["groups"], 1);
    assert_eq!(summary["stats"]["input_posts"], 4);
    assert_eq!(
        summary["metadata"]["run_id"],
        matched["metadata"]["run_id"],
        "all files of a run share its id"
    );

    let leftovers: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn rerun_overwrites_previous_results() {
    let tmp = TempDir::new().unwrap();
    let input = vec![
        (Source::Pikabu, vec![record("p1", "mkrustx")]),
        (Source::Habr, vec![record("h1", "mkrust2x")]),
    ];

    let matched = run_pipeline(&provider(), &input, 0.9).unwrap();
    write_outcome(tmp.path(), &matched).unwrap();
    let unmatched = run_pipeline(&provider(), &input, 1.0).unwrap();
    write_outcome(tmp.path(), &unmatched).unwrap();

    let file = read_json(&tmp.path().join("matched_posts.json"));
    assert_eq!(file["groups"].as_array().unwrap().len(), 0);
    assert_eq!(file["metadata"]["threshold"], 1.0);
    let pikabu = read_json(&tmp.path().join("unmatched_pikabu.json"));
    assert_eq!(pikabu["posts"][0]["id"], "p1");
}

#[test]
fn config_file_drives_the_run() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    fs::write(
        &path,
        r#"
[matching]
threshold = 0.95
sources = ["habr", "pikabu"]

[normalize]
max_title_chars = 12
"#,
    )
    .unwrap();

    let config = CrossmatchConfig::load_from(&path).unwrap();
    let sources = config.validate().unwrap();
    assert_eq!(sources, vec![Source::Habr, Source::Pikabu]);
    assert_eq!(config.embedding.dimensions, 384);

    let (posts, _) = normalize_records(
        Source::Habr,
        &[record("h1", "mkrust2x")],
        &config.normalize,
    );
    assert_eq!(posts[0].title.chars().count(), 12);

    // score(p1, h1) is about 0.99, above 0.95
    let (pikabu, _) = normalize_records(Source::Pikabu, &[record("p1", "mkrustx")], &config.normalize);
    let mut all = pikabu;
    all.extend(posts);
    let embeddings = embed_all(&provider(), &all);
    let outcome = run_matching(&config.matching, all, Vec::new(), &embeddings).unwrap();
    assert_eq!(outcome.partition.matched.len(), 1);
    assert_eq!(
        outcome.partition.unmatched.keys().copied().collect::<Vec<_>>(),
        vec![Source::Pikabu, Source::Habr]
    );
}
