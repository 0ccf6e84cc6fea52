//! Builds the index file for a repository at a commit.
//!
//! With no earlier index for the repository the whole tree is parsed. Otherwise
//! the most recently used earlier index is copied and patched with the files
//! that changed between its commit and the requested one.

use crate::context::Context;
use crate::diskcache::{newest_artifact, DiskCache};
use crate::error::SymbolsError;
use crate::git::VcsClient;
use crate::parse::SymbolParser;
use crate::store::{IndexStore, SCHEMA_VERSION};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BuildMode {
    Fresh,
    Incremental { base_commit: String },
}

/// What a build did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub mode: BuildMode,
    pub symbols_written: usize,
    /// Rows removed for changed paths (incremental builds only)
    pub rows_deleted: usize,
    /// Paths reported by the diff (incremental builds only)
    pub paths_changed: usize,
}

pub struct IndexWriter {
    cache: DiskCache,
    parser: Arc<dyn SymbolParser>,
    vcs: Arc<dyn VcsClient>,
}

impl IndexWriter {
    /// `cache` is where earlier indexes for the same repository are looked up.
    pub fn new(cache: DiskCache, parser: Arc<dyn SymbolParser>, vcs: Arc<dyn VcsClient>) -> Self {
        Self { cache, parser, vcs }
    }

    /// Write the index for `repo` at `commit` to `dest`.
    pub fn build(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        dest: &Path,
    ) -> crate::Result<BuildOutcome> {
        let started = Instant::now();
        let outcome = match self.find_base(ctx, repo)? {
            Some(base) => self.build_incremental(ctx, repo, commit, &base, dest)?,
            None => self.build_fresh(ctx, repo, commit, dest)?,
        };

        match &outcome.mode {
            BuildMode::Fresh => tracing::info!(
                parent: ctx.span(),
                repo,
                commit,
                symbols = outcome.symbols_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "built fresh index"
            ),
            BuildMode::Incremental { base_commit } => tracing::info!(
                parent: ctx.span(),
                repo,
                commit,
                base_commit = %base_commit,
                paths_changed = outcome.paths_changed,
                deleted = outcome.rows_deleted,
                symbols = outcome.symbols_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "built incremental index"
            ),
        }
        Ok(outcome)
    }

    /// Most recently used earlier index for `repo`, if it has the current layout.
    ///
    /// Recency is by file mtime, not commit ancestry.
    fn find_base(&self, ctx: &Context, repo: &str) -> crate::Result<Option<PathBuf>> {
        let Some(base) = newest_artifact(&self.cache.dir_for(&[repo]))? else {
            return Ok(None);
        };
        let version = IndexStore::open_read_only(&base)?.schema_version()?;
        if version != SCHEMA_VERSION {
            tracing::debug!(
                parent: ctx.span(),
                base = %base.display(),
                version,
                "ignoring index with other schema version"
            );
            return Ok(None);
        }
        Ok(Some(base))
    }

    fn build_fresh(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        dest: &Path,
    ) -> crate::Result<BuildOutcome> {
        tracing::debug!(parent: ctx.span(), repo, commit, "building fresh index");
        let mut store = IndexStore::create(dest)?;
        let symbols_written = store.with_transaction(|tx| {
            tx.create_schema()?;
            tx.insert_commit(commit)?;
            let symbols = self.parser.parse(ctx, repo, commit, &[])?;
            let written = tx.write_symbols(ctx, symbols)?;
            tx.create_indexes()?;
            Ok(written)
        })?;
        store.close()?;

        Ok(BuildOutcome {
            mode: BuildMode::Fresh,
            symbols_written,
            rows_deleted: 0,
            paths_changed: 0,
        })
    }

    fn build_incremental(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        base: &Path,
        dest: &Path,
    ) -> crate::Result<BuildOutcome> {
        let base_commit = IndexStore::open_read_only(base)?
            .read_commit()?
            .ok_or_else(|| SymbolsError::MissingCommit(base.to_path_buf()))?;
        tracing::debug!(parent: ctx.span(), repo, commit, base_commit = %base_commit, "patching index");

        let changes = self.vcs.diff(ctx, repo, &base_commit, commit)?;
        ctx.check()?;
        fs::copy(base, dest)?;

        let mut store = IndexStore::create(dest)?;
        let (rows_deleted, symbols_written) = store.with_transaction(|tx| {
            tx.update_commit(commit)?;
            let deleted = tx.delete_paths(&changes.touched())?;
            let reparse = changes.added_or_modified();
            // An empty path list would mean "every file"
            let written = if reparse.is_empty() {
                0
            } else {
                let symbols = self.parser.parse(ctx, repo, commit, &reparse)?;
                tx.write_symbols(ctx, symbols)?
            };
            Ok((deleted, written))
        })?;
        store.close()?;

        Ok(BuildOutcome {
            mode: BuildMode::Incremental { base_commit },
            symbols_written,
            rows_deleted,
            paths_changed: changes.touched().len(),
        })
    }
}
