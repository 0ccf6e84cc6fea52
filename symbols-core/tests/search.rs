mod common;

use common::{all_symbols, record, searcher, FakeRepo};
use std::sync::Arc;
use std::time::Duration;
use symbols_core::{Context, IndexStore, SearchArgs, Searcher, SymbolsError};
use tempfile::TempDir;

const C1: &str = "c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1";
const C2: &str = "c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2";
const C3: &str = "c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3";

fn history() -> FakeRepo {
    FakeRepo::new()
        .commit(
            C1,
            &[
                ("src/lib.rs", "open close"),
                ("src/util.rs", "helper"),
                ("src/old.rs", "legacy"),
            ],
        )
        .commit(
            C2,
            &[
                ("src/lib.rs", "open close flush"),
                ("src/util.rs", "helper"),
                ("src/new.rs", "fresh_start"),
            ],
        )
        .commit(
            C3,
            &[
                ("src/lib.rs", "open"),
                ("src/new.rs", "fresh_start"),
                ("tests/it.rs", "smoke"),
            ],
        )
}

/// Artifact mtimes order incremental bases; keep them distinct.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn index_path(searcher: &Searcher, commit: &str) -> std::path::PathBuf {
    searcher
        .cache()
        .path_for(&Searcher::cache_key("repo", commit))
        .unwrap()
}

#[tokio::test]
async fn test_incremental_matches_fresh_build() {
    let incremental_dir = TempDir::new().unwrap();
    let fresh_dir = TempDir::new().unwrap();
    let repo = Arc::new(history());

    let incremental = searcher(incremental_dir.path(), repo.clone());
    all_symbols(&incremental, "repo", C1).await;
    tick().await;
    let patched = all_symbols(&incremental, "repo", C2).await;
    assert_eq!(repo.diff_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let fresh = searcher(fresh_dir.path(), repo.clone());
    let rebuilt = all_symbols(&fresh, "repo", C2).await;

    assert_eq!(patched, rebuilt);
    assert!(patched.contains(&record("src/new.rs", "fresh_start", 1)));
    assert!(patched.contains(&record("src/lib.rs", "flush", 3)));
    assert!(!patched.iter().any(|s| s.path == "src/old.rs"));
}

#[tokio::test]
async fn test_metadata_tracks_latest_commit() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(history());
    let searcher = searcher(dir.path(), repo.clone());

    for commit in [C1, C2, C3] {
        all_symbols(&searcher, "repo", commit).await;
        tick().await;
    }
    // One fresh build, then two diffs
    assert_eq!(repo.diff_calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    let path = index_path(&searcher, C3);
    let conn = rusqlite::Connection::open(&path).unwrap();
    let rows: Vec<String> = conn
        .prepare("SELECT revision FROM meta")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, vec![C3.to_string()]);

    let store = IndexStore::open_read_only(&path).unwrap();
    assert_eq!(store.read_commit().unwrap().as_deref(), Some(C3));
}

#[tokio::test]
async fn test_cache_hit_does_no_work() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(history());
    let searcher = searcher(dir.path(), repo.clone());

    all_symbols(&searcher, "repo", C1).await;
    assert_eq!(repo.parses(), 1);
    all_symbols(&searcher, "repo", C1).await;
    all_symbols(&searcher, "repo", C1).await;
    assert_eq!(repo.parses(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_searches_build_once() {
    let dir = TempDir::new().unwrap();
    let mut repo = history();
    repo.parse_delay = Duration::from_millis(200);
    let repo = Arc::new(repo);
    let searcher = searcher(dir.path(), repo.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let searcher = searcher.clone();
        tasks.push(tokio::spawn(async move {
            all_symbols(&searcher, "repo", C1).await
        }));
    }
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(repo.parses(), 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0].len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_caller_leaves_build_running() {
    let dir = TempDir::new().unwrap();
    let mut repo = history();
    repo.parse_delay = Duration::from_millis(300);
    let repo = Arc::new(repo);
    let searcher = searcher(dir.path(), repo.clone());

    let impatient = SearchArgs {
        timeout_ms: Some(20),
        ..Default::default()
    };
    let err = searcher
        .search(&Context::background(), "repo", C1, &impatient)
        .await
        .unwrap_err();
    assert!(err.is_cancellation(), "unexpected error: {err}");

    let symbols = all_symbols(&searcher, "repo", C1).await;
    assert_eq!(symbols.len(), 4);
    assert_eq!(repo.parses(), 1);
}

#[tokio::test]
async fn test_failed_build_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut repo = history();
    repo.broken_paths = vec!["src/util.rs".to_string()];
    let repo = Arc::new(repo);
    let searcher = searcher(dir.path(), repo.clone());

    let err = searcher
        .search(&Context::background(), "repo", C1, &SearchArgs::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SymbolsError::Parse { ref path, .. } if path == "src/util.rs"));

    let path = index_path(&searcher, C1);
    assert!(!path.exists());
    assert!(!path.with_extension("zip.part").exists());

    // The next request retries the build
    let _ = searcher
        .search(&Context::background(), "repo", C1, &SearchArgs::default())
        .await;
    assert_eq!(repo.parses(), 2);
}

#[tokio::test]
async fn test_bad_requests_do_not_build() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(history());
    let searcher = searcher(dir.path(), repo.clone());
    let ctx = Context::background();

    let bad_pattern = SearchArgs {
        query: "(unclosed".to_string(),
        ..Default::default()
    };
    let err = searcher.search(&ctx, "repo", C1, &bad_pattern).await.unwrap_err();
    assert!(matches!(err, SymbolsError::InvalidPattern { .. }));

    let err = searcher
        .search(&ctx, "", C1, &SearchArgs::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());
    assert_eq!(repo.parses(), 0);
}

#[tokio::test]
async fn test_symbolic_revisions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(history().commit("HEAD", &[("src/lib.rs", "open")]));
    let searcher = searcher(dir.path(), repo.clone());
    let ctx = Context::background();

    // A moving name must never become the commit recorded in an index
    let short = &C1[..12];
    let upper = C1.to_uppercase();
    for rev in ["HEAD", "main", short, upper.as_str()] {
        let err = searcher
            .search(&ctx, "repo", rev, &SearchArgs::default())
            .await
            .unwrap_err();
        assert!(err.is_invalid_request(), "{rev} was accepted");
    }
    assert_eq!(repo.parses(), 0);
    assert!(!index_path(&searcher, "HEAD").exists());

    all_symbols(&searcher, "repo", C1).await;
    assert!(repo.parses() > 0);
}

#[tokio::test]
async fn test_query_filters_through_searcher() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(history());
    let searcher = searcher(dir.path(), repo);

    let args = SearchArgs {
        query: "^OPEN$".to_string(),
        ..Default::default()
    };
    let results = searcher
        .search(&Context::background(), "repo", C3, &args)
        .await
        .unwrap();
    assert_eq!(results.symbols, vec![record("src/lib.rs", "open", 1)]);

    let args = SearchArgs {
        exclude_pattern: "^src/".to_string(),
        ..Default::default()
    };
    let results = searcher
        .search(&Context::background(), "repo", C3, &args)
        .await
        .unwrap();
    assert_eq!(results.symbols, vec![record("tests/it.rs", "smoke", 1)]);

    let args = SearchArgs {
        first: 1,
        ..Default::default()
    };
    let results = searcher
        .search(&Context::background(), "repo", C3, &args)
        .await
        .unwrap();
    assert_eq!(results.symbols.len(), 1);
    assert!(results.limit_hit);
}

#[tokio::test]
async fn test_eviction_keeps_cache_usable() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(history());
    let searcher = searcher(dir.path(), repo.clone());

    all_symbols(&searcher, "repo", C1).await;
    tick().await;
    all_symbols(&searcher, "repo", C2).await;

    let stats = searcher.cache().evict(0).unwrap();
    assert_eq!(stats.evicted, 2);
    assert!(stats.cache_size > 0);
    assert!(!index_path(&searcher, C1).exists());

    // Evicted indexes are rebuilt from scratch on demand
    let symbols = all_symbols(&searcher, "repo", C2).await;
    assert_eq!(symbols.len(), 4);
    assert_eq!(repo.parses(), 3);
}
