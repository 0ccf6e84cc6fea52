//! Version-control collaborators: commit diffs and file contents at a commit.

use crate::context::Context;
use crate::error::SymbolsError;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Paths that differ between two commits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl Changes {
    /// Paths whose symbols must be re-parsed at the new commit.
    pub fn added_or_modified(&self) -> Vec<String> {
        self.added.iter().chain(&self.modified).cloned().collect()
    }

    /// Every path whose old symbols are stale.
    pub fn touched(&self) -> Vec<String> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

pub trait VcsClient: Send + Sync {
    fn diff(&self, ctx: &Context, repo: &str, old: &str, new: &str) -> crate::Result<Changes>;
}

pub trait FileSource: Send + Sync {
    /// Every file path in the tree at `commit`.
    fn list_files(&self, ctx: &Context, repo: &str, commit: &str) -> crate::Result<Vec<String>>;

    fn read_file(&self, ctx: &Context, repo: &str, commit: &str, path: &str)
        -> crate::Result<Vec<u8>>;
}

/// Runs the `git` binary against repositories under `repos_root`.
#[derive(Debug, Clone)]
pub struct GitClient {
    repos_root: PathBuf,
}

impl GitClient {
    pub fn new(repos_root: impl Into<PathBuf>) -> Self {
        Self {
            repos_root: repos_root.into(),
        }
    }

    pub fn repos_root(&self) -> &Path {
        &self.repos_root
    }

    /// Directory of `repo`, rejecting names that escape `repos_root`.
    pub fn repo_dir(&self, repo: &str) -> crate::Result<PathBuf> {
        let relative = Path::new(repo);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if repo.is_empty() || escapes {
            return Err(SymbolsError::InvalidRequest(format!(
                "invalid repository name: {repo:?}"
            )));
        }
        Ok(self.repos_root.join(relative))
    }

    /// Full commit id for any revision git understands (`HEAD`, a branch, a short sha).
    pub fn resolve_commit(&self, ctx: &Context, repo: &str, rev: &str) -> crate::Result<String> {
        check_rev(repo, rev)?;
        let spec = format!("{rev}^{{commit}}");
        let out = self.run(ctx, repo, &["rev-parse", "--verify", "--quiet", &spec])?;
        let commit = String::from_utf8_lossy(&out).trim().to_string();
        if commit.is_empty() {
            return Err(SymbolsError::git(repo, format!("unknown revision {rev}")));
        }
        Ok(commit)
    }

    fn run(&self, ctx: &Context, repo: &str, args: &[&str]) -> crate::Result<Vec<u8>> {
        ctx.check()?;
        let dir = self.repo_dir(repo)?;
        let output = Command::new("git")
            .args(args)
            .current_dir(&dir)
            .output()
            .map_err(|e| SymbolsError::git(repo, format!("failed to run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SymbolsError::git(
                repo,
                format!("git {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

impl VcsClient for GitClient {
    fn diff(&self, ctx: &Context, repo: &str, old: &str, new: &str) -> crate::Result<Changes> {
        check_rev(repo, old)?;
        check_rev(repo, new)?;
        let out = self.run(
            ctx,
            repo,
            &["diff", "--name-status", "-z", "--no-renames", old, new, "--"],
        )?;
        parse_name_status(&out).map_err(|message| SymbolsError::git(repo, message))
    }
}

impl FileSource for GitClient {
    fn list_files(&self, ctx: &Context, repo: &str, commit: &str) -> crate::Result<Vec<String>> {
        check_rev(repo, commit)?;
        let out = self.run(ctx, repo, &["ls-tree", "-r", "-z", commit])?;
        Ok(parse_ls_tree_blobs(&out))
    }

    fn read_file(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        path: &str,
    ) -> crate::Result<Vec<u8>> {
        check_rev(repo, commit)?;
        let object = format!("{commit}:{path}");
        self.run(ctx, repo, &["cat-file", "blob", &object])
    }
}

/// Revisions are passed as arguments, so one starting with `-` would be an option.
fn check_rev(repo: &str, rev: &str) -> crate::Result<()> {
    if rev.is_empty() || rev.starts_with('-') {
        return Err(SymbolsError::InvalidRequest(format!(
            "invalid revision {rev:?} for {repo}"
        )));
    }
    Ok(())
}

/// Parse `git diff --name-status -z` output: NUL-separated status, path pairs.
pub fn parse_name_status(out: &[u8]) -> Result<Changes, String> {
    let mut changes = Changes::default();
    let mut fields = out
        .split(|b| *b == 0)
        .filter(|f| !f.is_empty())
        .map(|f| String::from_utf8_lossy(f).into_owned());

    while let Some(status) = fields.next() {
        let path = fields
            .next()
            .ok_or_else(|| format!("missing path after status {status:?}"))?;
        match status.chars().next() {
            Some('A') => changes.added.push(path),
            Some('M') | Some('T') => changes.modified.push(path),
            Some('D') => changes.deleted.push(path),
            _ => return Err(format!("unexpected diff status {status:?} for {path}")),
        }
    }
    Ok(changes)
}

/// Blob paths from `git ls-tree -r -z`. Submodule entries are skipped.
fn parse_ls_tree_blobs(out: &[u8]) -> Vec<String> {
    out.split(|b| *b == 0)
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (meta, path) = entry.split_once('\t')?;
            let kind = meta.split(' ').nth(1)?;
            (kind == "blob").then(|| path.to_string())
        })
        .collect()
}
