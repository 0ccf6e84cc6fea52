//! Content-addressed on-disk artifact cache with single-flight builds.
//!
//! A key is an ordered list of strings. Each component is hashed (SHA-256,
//! hex) and the hashes form a path under the cache root, the last one
//! carrying [`ARTIFACT_SUFFIX`]. On a miss the caller's builder writes the
//! artifact to a sibling `.part` file which is fsynced and renamed into place,
//! so readers only ever see complete artifacts. File mtimes double as the
//! recency signal for [`DiskCache::evict`].

mod keyed_mutex;

pub use keyed_mutex::KeyedMutex;

use crate::context::Context;
use crate::error::SymbolsError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Suffix of published artifacts. Eviction only ever removes these.
pub const ARTIFACT_SUFFIX: &str = ".zip";
const PART_SUFFIX: &str = ".part";

/// An opened artifact. The file handle stays valid even if the artifact is
/// evicted while in use.
#[derive(Debug)]
pub struct CachedFile {
    pub file: fs::File,
    pub path: PathBuf,
}

/// Result of an eviction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvictStats {
    /// Total size of all files under the cache root before eviction
    pub cache_size: u64,
    /// Number of artifacts removed
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    background_timeout: Option<Duration>,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            background_timeout: None,
        }
    }

    /// Run builders under their own timeout instead of the caller's context.
    pub fn with_background_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.background_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem path of the artifact for `key`.
    pub fn path_for<S: AsRef<str>>(&self, key: &[S]) -> crate::Result<PathBuf> {
        let Some((last, prefix)) = key.split_last() else {
            return Err(SymbolsError::InvalidRequest(
                "cache key must have at least one component".to_string(),
            ));
        };
        let mut path = self.dir_for(prefix);
        path.push(format!(
            "{}{}",
            encode_key_component(last.as_ref()),
            ARTIFACT_SUFFIX
        ));
        Ok(path)
    }

    /// Directory holding every artifact whose key starts with `prefix`.
    pub fn dir_for<S: AsRef<str>>(&self, prefix: &[S]) -> PathBuf {
        let mut path = self.dir.clone();
        for component in prefix {
            path.push(encode_key_component(component.as_ref()));
        }
        path
    }

    /// Open the artifact for `key`, building it with `build` on a miss.
    ///
    /// Concurrent calls for the same key within the process wait for a single
    /// build. The build runs on its own task: if `ctx` ends first this call
    /// returns a cancellation error but the build continues for other waiters.
    pub async fn open<F>(&self, ctx: &Context, key: &[String], build: F) -> crate::Result<CachedFile>
    where
        F: FnOnce(&Context, &Path) -> crate::Result<()> + Send + 'static,
    {
        let path = self.path_for(key)?;

        if let Some(file) = open_existing(&path)? {
            tracing::debug!(parent: ctx.span(), path = %path.display(), "cache hit");
            return Ok(file);
        }

        tracing::debug!(parent: ctx.span(), path = %path.display(), "cache miss");
        let build_ctx = match self.background_timeout {
            Some(timeout) => ctx.isolated_with_timeout(timeout),
            None => ctx.clone(),
        };
        let fetch = tokio::spawn(fetch(path, build_ctx, build));

        tokio::select! {
            _ = ctx.done() => Err(ctx.done_err()),
            joined = fetch => joined.map_err(|e| SymbolsError::BuildTask(e.to_string()))?,
        }
    }

    /// Delete least recently used artifacts until the cache root holds at
    /// most `max_total_bytes`.
    ///
    /// Files without [`ARTIFACT_SUFFIX`] count towards the total but are never
    /// removed. A missing cache root is an empty cache.
    pub fn evict(&self, max_total_bytes: u64) -> crate::Result<EvictStats> {
        let mut entries = match self.entries() {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(EvictStats::default()),
            Err(err) => return Err(err.into()),
        };

        let cache_size: u64 = entries.iter().map(|e| e.size).sum();
        let mut stats = EvictStats {
            cache_size,
            evicted: 0,
        };
        if cache_size <= max_total_bytes {
            return Ok(stats);
        }

        entries.sort_by_key(|e| e.modified);

        let mut remaining = cache_size;
        for entry in &entries {
            if remaining <= max_total_bytes {
                break;
            }
            if !is_artifact(&entry.path) {
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    stats.evicted += 1;
                    remaining = remaining.saturating_sub(entry.size);
                }
                Err(err) => {
                    tracing::warn!(path = %entry.path.display(), error = %err, "failed to evict cache entry");
                }
            }
        }

        tracing::info!(
            cache_size,
            remaining,
            max_total_bytes,
            evicted = stats.evicted,
            "evicted cache entries"
        );
        Ok(stats)
    }

    /// Every regular file under the cache root.
    fn entries(&self) -> io::Result<Vec<CacheEntry>> {
        // Surface a missing root as NotFound before walking.
        fs::metadata(&self.dir)?;

        let mut entries = Vec::new();
        let walker = ignore::WalkBuilder::new(&self.dir)
            .standard_filters(false)
            .follow_links(false)
            .build();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Err(io::Error::other(err.to_string())),
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            // Files can vanish between listing and stat (concurrent eviction).
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) if is_not_found(&err) => continue,
                Err(err) => return Err(io::Error::other(err.to_string())),
            };
            entries.push(CacheEntry {
                path: entry.into_path(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(entries)
    }
}

struct CacheEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Hex SHA-256 of one key component.
pub fn encode_key_component(component: &str) -> String {
    hex::encode(Sha256::digest(component.as_bytes()))
}

/// The most recently modified artifact directly inside `dir`.
///
/// In-progress `.part` files and anything else without [`ARTIFACT_SUFFIX`]
/// are ignored. A missing directory yields `None`.
pub fn newest_artifact(dir: &Path) -> io::Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !is_artifact(&path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }
    Ok(newest.map(|(_, path)| path))
}

pub fn is_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(ARTIFACT_SUFFIX))
}

fn is_not_found(err: &ignore::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

/// Open a published artifact and refresh its mtime. `None` when absent.
fn open_existing(path: &Path) -> crate::Result<Option<CachedFile>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    touch(&file, path);
    Ok(Some(CachedFile {
        file,
        path: path.to_path_buf(),
    }))
}

/// Mark an artifact as recently used. Failing to do so only skews eviction
/// order, so it is logged rather than returned.
fn touch(file: &fs::File, path: &Path) {
    if let Err(err) = file.set_modified(SystemTime::now()) {
        tracing::debug!(path = %path.display(), error = %err, "failed to refresh artifact mtime");
    }
}

/// Wait for the key's lock, then build and publish unless someone else did.
async fn fetch<F>(path: PathBuf, ctx: Context, build: F) -> crate::Result<CachedFile>
where
    F: FnOnce(&Context, &Path) -> crate::Result<()> + Send + 'static,
{
    let lock = keyed_mutex::global().lock_for(&path);
    let _guard = lock.lock_owned().await;

    // Another waiter may have published while we queued on the lock.
    if let Some(file) = open_existing(&path)? {
        return Ok(file);
    }

    tokio::task::spawn_blocking(move || publish(&path, &ctx, build))
        .await
        .map_err(|e| SymbolsError::BuildTask(e.to_string()))?
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_os_string();
    part.push(PART_SUFFIX);
    PathBuf::from(part)
}

/// Build into `<path>.part`, fsync, rename over `path`, fsync the directory.
fn publish<F>(path: &Path, ctx: &Context, build: F) -> crate::Result<CachedFile>
where
    F: FnOnce(&Context, &Path) -> crate::Result<()>,
{
    let started = Instant::now();
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("cache path has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let tmp = part_path(path);
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;

    let result = (|| -> crate::Result<()> {
        build(ctx, &tmp)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, path)?;
        sync_dir(parent)?;
        Ok(())
    })();

    if let Err(err) = result {
        if let Err(remove_err) = fs::remove_file(&tmp) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %remove_err, "failed to remove partial artifact");
            }
        }
        return Err(err);
    }

    tracing::debug!(
        parent: ctx.span(),
        path = %path.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "published artifact"
    );
    open_existing(path)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "artifact vanished after publish").into())
}

/// Persist a rename by syncing the directory that holds it.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
