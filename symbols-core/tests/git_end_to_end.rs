//! Real git repositories parsed with tree-sitter.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use symbols_core::{
    Context, DiskCache, GitClient, IndexWriter, SearchArgs, Searcher, SymbolRecord,
    TreeSitterParser,
};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// `<root>/app` with two commits. Returns (root, first, second).
fn create_test_repo() -> (TempDir, String, String) {
    let root = TempDir::new().unwrap();
    let repo = root.path().join("app");
    std::fs::create_dir_all(repo.join("src")).unwrap();
    std::fs::create_dir_all(repo.join("web")).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["config", "user.email", "test@test.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);

    std::fs::write(
        repo.join("src/server.rs"),
        "pub struct Server {\n    port: u16,\n}\n\nimpl Server {\n    pub fn start(&self) {}\n}\n",
    )
    .unwrap();
    std::fs::write(repo.join("src/util.py"), "def slugify(text):\n    return text\n").unwrap();
    std::fs::write(repo.join("web/api.ts"), "export function fetchUser(id: string) {}\n").unwrap();
    std::fs::write(repo.join("README.md"), "# app\n").unwrap();
    let first = commit_all(&repo, "first");

    std::fs::write(
        repo.join("src/server.rs"),
        "pub struct Server {\n    port: u16,\n}\n\nimpl Server {\n    pub fn start(&self) {}\n    pub fn stop(&self) {}\n}\n",
    )
    .unwrap();
    std::fs::remove_file(repo.join("src/util.py")).unwrap();
    std::fs::write(repo.join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
    let second = commit_all(&repo, "second");

    (root, first, second)
}

fn searcher(repos_root: &Path, cache_dir: &Path) -> Searcher {
    let git = Arc::new(GitClient::new(repos_root));
    let parser = Arc::new(TreeSitterParser::new(git.clone(), 1 << 20));
    let cache = DiskCache::new(cache_dir).with_background_timeout(Some(Duration::from_secs(60)));
    let writer = IndexWriter::new(cache.clone(), parser, git);
    Searcher::new(cache, Arc::new(writer))
}

async fn everything(searcher: &Searcher, commit: &str) -> Vec<SymbolRecord> {
    let results = searcher
        .search(&Context::background(), "app", commit, &SearchArgs::default())
        .await
        .unwrap();
    let mut symbols = results.symbols;
    symbols.sort();
    symbols
}

fn names(symbols: &[SymbolRecord]) -> Vec<&str> {
    let mut names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_indexes_supported_languages() {
    let (root, first, _) = create_test_repo();
    let cache = TempDir::new().unwrap();
    let searcher = searcher(root.path(), cache.path());

    let symbols = everything(&searcher, &first).await;
    assert_eq!(
        names(&symbols),
        vec!["Server", "fetchUser", "slugify", "start"]
    );

    let start = symbols.iter().find(|s| s.name == "start").unwrap();
    assert_eq!(start.path, "src/server.rs");
    assert_eq!(start.line, 6);
    assert_eq!(start.parent, "Server");
    assert_eq!(start.language, "rust");
}

#[tokio::test]
async fn test_incremental_build_matches_fresh_build() {
    let (root, first, second) = create_test_repo();
    let patched_cache = TempDir::new().unwrap();
    let fresh_cache = TempDir::new().unwrap();

    let patched = searcher(root.path(), patched_cache.path());
    everything(&patched, &first).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let incremental = everything(&patched, &second).await;

    let fresh = searcher(root.path(), fresh_cache.path());
    let rebuilt = everything(&fresh, &second).await;

    assert_eq!(incremental, rebuilt);
    let found = names(&incremental);
    assert!(found.contains(&"stop"));
    assert!(found.contains(&"main"));
    assert!(!found.contains(&"slugify"));
}

#[tokio::test]
async fn test_search_by_path_and_case() {
    let (root, first, _) = create_test_repo();
    let cache = TempDir::new().unwrap();
    let searcher = searcher(root.path(), cache.path());
    let ctx = Context::background();

    let args = SearchArgs {
        query: "fetch".to_string(),
        include_patterns: vec!["\\.ts$".to_string()],
        ..Default::default()
    };
    let results = searcher.search(&ctx, "app", &first, &args).await.unwrap();
    assert_eq!(names(&results.symbols), vec!["fetchUser"]);

    let args = SearchArgs {
        query: "^server$".to_string(),
        is_case_sensitive: true,
        ..Default::default()
    };
    let results = searcher.search(&ctx, "app", &first, &args).await.unwrap();
    assert!(results.symbols.is_empty());
}

#[tokio::test]
async fn test_unknown_commit_is_git_error() {
    let (root, _, _) = create_test_repo();
    let cache = TempDir::new().unwrap();
    let searcher = searcher(root.path(), cache.path());

    let err = searcher
        .search(
            &Context::background(),
            "app",
            "0000000000000000000000000000000000000000",
            &SearchArgs::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, symbols_core::SymbolsError::Git { .. }), "{err}");
}

#[test]
fn test_resolve_commit() {
    let (root, _, second) = create_test_repo();
    let git = GitClient::new(root.path());
    let ctx = Context::background();
    assert_eq!(git.resolve_commit(&ctx, "app", "HEAD").unwrap(), second);
    assert!(git.resolve_commit(&ctx, "app", "no-such-branch").is_err());
}
