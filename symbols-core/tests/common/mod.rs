#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symbols_core::{
    Changes, Context, DiskCache, IndexWriter, SearchArgs, Searcher, SymbolParser, SymbolRecord,
    SymbolStream, SymbolsError, VcsClient,
};

/// In-memory repository: commit -> path -> symbol names.
#[derive(Default)]
pub struct FakeRepo {
    commits: HashMap<String, BTreeMap<String, Vec<String>>>,
    pub parse_calls: AtomicUsize,
    pub diff_calls: AtomicUsize,
    /// Sleep per parse call, to hold builds open
    pub parse_delay: Duration,
    /// Paths whose parse yields an error
    pub broken_paths: Vec<String>,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit. Each file is a path and its space-separated symbol names.
    pub fn commit(mut self, id: &str, files: &[(&str, &str)]) -> Self {
        let tree = files
            .iter()
            .map(|(path, names)| {
                (
                    path.to_string(),
                    names.split_whitespace().map(str::to_string).collect(),
                )
            })
            .collect();
        self.commits.insert(id.to_string(), tree);
        self
    }

    pub fn parses(&self) -> usize {
        self.parse_calls.load(Ordering::SeqCst)
    }

    fn tree(&self, repo: &str, commit: &str) -> symbols_core::Result<&BTreeMap<String, Vec<String>>> {
        self.commits.get(commit).ok_or_else(|| SymbolsError::Git {
            repo: repo.to_string(),
            message: format!("unknown commit {commit}"),
        })
    }
}

pub fn record(path: &str, name: &str, line: u32) -> SymbolRecord {
    SymbolRecord {
        name: name.to_string(),
        path: path.to_string(),
        line,
        character: 3,
        kind: "function".to_string(),
        language: "rust".to_string(),
        parent: String::new(),
        parent_kind: String::new(),
        signature: format!("fn {name}()"),
        file_limited: false,
    }
}

impl SymbolParser for FakeRepo {
    fn parse(
        &self,
        _ctx: &Context,
        repo: &str,
        commit: &str,
        paths: &[String],
    ) -> symbols_core::Result<SymbolStream> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.parse_delay);

        let tree = self.tree(repo, commit)?;
        let wanted: Vec<&String> = if paths.is_empty() {
            tree.keys().collect()
        } else {
            paths.iter().collect()
        };

        let mut items = Vec::new();
        for path in wanted {
            if self.broken_paths.contains(path) {
                items.push(Err(SymbolsError::Parse {
                    path: path.clone(),
                    message: "syntax error".to_string(),
                }));
                continue;
            }
            let names = tree.get(path).cloned().unwrap_or_default();
            for (i, name) in names.iter().enumerate() {
                items.push(Ok(record(path, name, i as u32 + 1)));
            }
        }
        Ok(Box::new(items.into_iter()))
    }
}

impl VcsClient for FakeRepo {
    fn diff(
        &self,
        _ctx: &Context,
        repo: &str,
        old: &str,
        new: &str,
    ) -> symbols_core::Result<Changes> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        let before = self.tree(repo, old)?;
        let after = self.tree(repo, new)?;

        let mut changes = Changes::default();
        for (path, names) in after {
            match before.get(path) {
                None => changes.added.push(path.clone()),
                Some(old_names) if old_names != names => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in before.keys() {
            if !after.contains_key(path) {
                changes.deleted.push(path.clone());
            }
        }
        Ok(changes)
    }
}

pub fn searcher(cache_dir: &Path, repo: Arc<FakeRepo>) -> Searcher {
    let cache = DiskCache::new(cache_dir).with_background_timeout(Some(Duration::from_secs(30)));
    let writer = IndexWriter::new(cache.clone(), repo.clone(), repo);
    Searcher::new(cache, Arc::new(writer))
}

/// Every row of the index for `commit`, sorted.
pub async fn all_symbols(searcher: &Searcher, repo: &str, commit: &str) -> Vec<SymbolRecord> {
    let results = searcher
        .search(&Context::background(), repo, commit, &SearchArgs::default())
        .await
        .unwrap();
    assert!(!results.limit_hit, "test repositories must fit one page");
    let mut symbols = results.symbols;
    symbols.sort();
    symbols
}
