//! End-to-end tests: source files on disk → build → search.
//!
//! All tests use the TF-IDF backend so nothing is downloaded.

use std::fs;
use std::path::Path;

use oeuvre::config::{load_config, Config};
use oeuvre::pipeline::{add_source, build_corpus};
use oeuvre::persist::{self, IndexLayout};
use oeuvre::progress::NoProgress;
use oeuvre::run_log::{RunKind, RunLog};
use oeuvre::search::SearchEngine;
use oeuvre::sources::load_documents;
use oeuvre::stats::index_stats;
use oeuvre_core::models::SourceType;
use oeuvre_core::search::SearchFilter;
use oeuvre_core::Error;
use serde_json::json;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn passage(topic: &str, details: &[&str]) -> String {
    let paragraphs: Vec<String> = details
        .iter()
        .map(|d| {
            format!(
                "The essay on {topic} begins with {d}. It follows the argument carefully \
                 through several examples drawn from local history. Readers are asked to \
                 weigh {d} against the older accounts of {topic}. The conclusion returns \
                 to {d} and to what it meant for ordinary families."
            )
        })
        .collect();
    paragraphs.join("\n\n")
}

fn write_sources(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let books = json!([
        {
            "source_type": "book",
            "filename": "rivers.txt",
            "title": "Rivers of the North",
            "text": passage("rivers", &["spring floods", "timber rafts", "frozen harbours"]),
        },
        {
            "source_type": "book",
            "filename": "bread.txt",
            "text": passage("bread", &["rye harvests", "village ovens", "wartime rationing"]),
        }
    ]);
    fs::write(dir.join("books.json"), serde_json::to_string(&books).unwrap()).unwrap();

    let news = [
        json!({
            "source_type": "news",
            "filename": "election.html",
            "date": "2011-10-09",
            "category": "politics",
            "url": "https://example.org/election",
            "text": passage("elections", &["coalition talks", "turnout figures", "regional ballots"]),
        }),
        json!({
            "source_type": "news",
            "filename": "markets.html",
            "category": "economy",
            "text": passage("markets", &["currency reform", "grain prices", "export tariffs"]),
        }),
        json!({
            "source_type": "news",
            "filename": "stub.html",
            "text": "Click here. Subscribe to our newsletter.",
        }),
    ];
    let lines: Vec<String> = news.iter().map(|v| v.to_string()).collect();
    fs::write(dir.join("news.jsonl"), lines.join("\n")).unwrap();
}

fn forum_docs() -> serde_json::Value {
    json!([{
        "source_type": "forum",
        "filename": "thread-42",
        "category": "chess",
        "text": passage("chess", &["opening theory", "endgame studies", "correspondence matches"]),
    }])
}

fn write_config(root: &Path) -> Config {
    let path = root.join("oeuvre.toml");
    fs::write(
        &path,
        format!(
            r#"
[index]
dir = "{}"
keep_backups = 2

[embedding]
backend = "tfidf"
fallback = "none"

[embedding.tfidf]
max_features = 512

[retrieval]
default_k = 5
max_k = 20
"#,
            root.join("index").display()
        ),
    )
    .unwrap();
    load_config(&path).unwrap()
}

#[test]
fn test_build_then_search_end_to_end() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    write_sources(&tmp.path().join("sources"));

    let batch = load_documents(&tmp.path().join("sources")).unwrap();
    assert!(batch.errors.is_empty());
    assert_eq!(batch.documents.len(), 5);

    let report = build_corpus(&config, &batch.documents, &NoProgress).unwrap();
    assert_eq!(report.ingest.processed, 5);
    assert_eq!(report.ingest.skipped_low_quality, 1);
    assert_eq!(report.ingest.retained, 4);
    assert_eq!(report.total_documents, report.ingest.chunks);

    let engine = SearchEngine::open(&config).unwrap();
    assert!(!engine.is_ready());

    // A query identical to an indexed chunk finds that chunk at distance ~0.
    let layout = IndexLayout::new(&config.index.dir);
    let combined = persist::read_combined(&layout).unwrap();
    let target = combined
        .documents()
        .iter()
        .find(|c| c.metadata.category == "economy")
        .unwrap()
        .clone();
    let results = engine.search(&target.text, Some(3), None).unwrap();
    assert!(engine.is_ready());
    assert_eq!(results[0].metadata.chunk_id, target.metadata.chunk_id);
    assert!(results[0].distance.abs() < 1e-4, "distance {}", results[0].distance);

    let results = engine.search("grain prices and currency", None, None).unwrap();
    assert!(results.len() <= 5);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));

    let filter = SearchFilter::source(SourceType::Book);
    let books = engine.search("timber rafts", Some(20), Some(&filter)).unwrap();
    assert!(!books.is_empty());
    assert!(books.iter().all(|r| r.metadata.source == Some(SourceType::Book)));
    assert!(books.iter().any(|r| r.title.as_deref() == Some("Rivers of the North")));

    let filter = SearchFilter::category("POLITICS");
    let politics = engine.search("ballots", Some(20), Some(&filter)).unwrap();
    assert!(!politics.is_empty());
    assert!(politics
        .iter()
        .all(|r| r.metadata.url.as_deref() == Some("https://example.org/election")));

    assert!(matches!(
        engine.search("", None, None),
        Err(Error::MalformedQuery(_))
    ));
}

#[test]
fn test_rebuilding_identical_input_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    write_sources(&tmp.path().join("sources"));
    let docs = load_documents(&tmp.path().join("sources")).unwrap().documents;
    let layout = IndexLayout::new(&config.index.dir);

    build_corpus(&config, &docs, &NoProgress).unwrap();
    let first: Vec<String> = persist::read_combined(&layout)
        .unwrap()
        .documents()
        .iter()
        .map(|c| c.id().to_string())
        .collect();

    build_corpus(&config, &docs, &NoProgress).unwrap();
    let second = persist::read_combined(&layout).unwrap();
    let ids: Vec<String> = second.documents().iter().map(|c| c.id().to_string()).collect();
    assert_eq!(first, ids);
    assert_eq!(second.index().len(), second.documents().len());

    // The first build was backed up before the second replaced it.
    let backups = persist::list_backups(&layout).unwrap();
    assert_eq!(backups.len(), 1);
    persist::restore_backup(&layout, &backups[0]).unwrap();
    assert_eq!(persist::read_combined(&layout).unwrap().len(), first.len());
}

#[test]
fn test_incremental_source_addition() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    write_sources(&tmp.path().join("sources"));
    let docs = load_documents(&tmp.path().join("sources")).unwrap().documents;
    let built = build_corpus(&config, &docs, &NoProgress).unwrap();

    let forum_dir = tmp.path().join("forum");
    fs::create_dir_all(&forum_dir).unwrap();
    fs::write(forum_dir.join("threads.json"), forum_docs().to_string()).unwrap();
    let forum = load_documents(&forum_dir).unwrap().documents;

    let added = add_source(&config, &forum, &NoProgress).unwrap();
    assert_eq!(added.kind, RunKind::Incremental);
    assert_eq!(added.total_documents, built.total_documents + added.chunks_indexed());

    let again = add_source(&config, &forum, &NoProgress).unwrap();
    assert_eq!(again.total_documents, added.total_documents);

    let engine = SearchEngine::open(&config).unwrap();
    let filter = SearchFilter::source(SourceType::Forum);
    let hits = engine.search("endgame studies", None, Some(&filter)).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata.category == "chess"));

    let layout = IndexLayout::new(&config.index.dir);
    let stats = index_stats(&layout).unwrap();
    assert_eq!(stats.total_documents, again.total_documents);
    assert!(stats.sources.iter().any(|s| s.source == "forum" && s.has_shard));

    let kinds: Vec<RunKind> = RunLog::open(layout.run_log())
        .unwrap()
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![RunKind::FullRebuild, RunKind::Incremental, RunKind::Incremental]
    );
}

#[test]
fn test_search_before_any_build_is_not_ready() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let err = SearchEngine::open(&config).err().unwrap();
    assert!(err.is_not_ready());
}

#[test]
fn test_restored_backup_stays_searchable_after_refit() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    write_sources(&tmp.path().join("sources"));
    let docs = load_documents(&tmp.path().join("sources")).unwrap().documents;
    let first = build_corpus(&config, &docs, &NoProgress).unwrap();

    fs::create_dir_all(tmp.path().join("forum")).unwrap();
    fs::write(tmp.path().join("forum/threads.json"), forum_docs().to_string()).unwrap();
    let forum = load_documents(&tmp.path().join("forum")).unwrap().documents;
    let second = build_corpus(&config, &forum, &NoProgress).unwrap();
    assert_ne!(first.embedding_model, second.embedding_model);

    let layout = IndexLayout::new(&config.index.dir);
    let backups = persist::list_backups(&layout).unwrap();
    assert_eq!(backups.len(), 1);
    persist::restore_backup(&layout, &backups[0]).unwrap();

    let engine = SearchEngine::open(&config).unwrap();
    let hits = engine.search("timber rafts", Some(3), None).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata.source != Some(SourceType::Forum)));
}
