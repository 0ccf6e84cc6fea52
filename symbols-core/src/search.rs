//! Top-level search: resolve the cached index for repo@commit, building it on
//! a miss, then query it.

use crate::context::Context;
use crate::diskcache::DiskCache;
use crate::error::SymbolsError;
use crate::query::{compile_search, SearchArgs};
use crate::store::{IndexStore, SearchResults, SCHEMA_VERSION};
use crate::writer::IndexWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Searcher {
    cache: DiskCache,
    writer: Arc<IndexWriter>,
    timeout: Duration,
}

impl Searcher {
    pub fn new(cache: DiskCache, writer: Arc<IndexWriter>) -> Self {
        Self {
            cache,
            writer,
            timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    /// Bound on a whole search, including any index build it waits for.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Cache key of the index for `repo` at `commit`. The schema version is
    /// part of the key so a layout change never serves old files.
    pub fn cache_key(repo: &str, commit: &str) -> Vec<String> {
        vec![repo.to_string(), format!("{commit}-{SCHEMA_VERSION}")]
    }

    pub async fn search(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        args: &SearchArgs,
    ) -> crate::Result<SearchResults> {
        if repo.is_empty() || commit.is_empty() {
            return Err(SymbolsError::InvalidRequest(
                "repo and commit are required".to_string(),
            ));
        }
        // Indexes record their commit as the base for later incremental
        // builds, so only immutable ids are accepted here
        if !is_object_id(commit) {
            return Err(SymbolsError::InvalidRequest(format!(
                "commit must be a full lowercase object id, got {commit:?} (resolve revisions first)"
            )));
        }
        // Reject bad patterns before paying for a build
        compile_search(args)?;

        let timeout = args
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.timeout);
        let ctx = ctx.with_timeout(timeout);
        let started = Instant::now();

        let writer = Arc::clone(&self.writer);
        let (build_repo, build_commit) = (repo.to_string(), commit.to_string());
        let artifact = self
            .cache
            .open(&ctx, &Self::cache_key(repo, commit), move |build_ctx, dest| {
                writer
                    .build(build_ctx, &build_repo, &build_commit, dest)
                    .map(|_| ())
            })
            .await?;

        let query_ctx = ctx.clone();
        let args = args.clone();
        let query = tokio::task::spawn_blocking(move || {
            // Holding the handle keeps the file alive if it is evicted meanwhile
            let _held = artifact.file;
            IndexStore::open_read_only(&artifact.path)?.search(&query_ctx, &args)
        });

        let results = tokio::select! {
            _ = ctx.done() => return Err(ctx.done_err()),
            joined = query => joined.map_err(|e| SymbolsError::BuildTask(e.to_string()))??,
        };

        tracing::debug!(
            parent: ctx.span(),
            repo,
            commit,
            matches = results.symbols.len(),
            limit_hit = results.limit_hit,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(results)
    }
}

/// Full SHA-1 or SHA-256 object id in git's canonical lowercase form.
fn is_object_id(commit: &str) -> bool {
    matches!(commit.len(), 40 | 64)
        && commit.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
