use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use symbols_core::{
    Config, DiskCache, EvictStats, GitClient, IndexWriter, Searcher, TreeSitterParser,
};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub git: Arc<GitClient>,
    pub searcher: Searcher,
    pub cache_dir: PathBuf,
    pub repos_root: PathBuf,
    pub cache_max_bytes: u64,
    pub eviction_interval: Duration,
    pub searches: AtomicU64,
    pub search_errors: AtomicU64,
    last_eviction: Mutex<Option<EvictStats>>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let git = Arc::new(GitClient::new(&config.git.repos_root));
        let parser = Arc::new(TreeSitterParser::new(
            git.clone(),
            config.parser.max_file_size,
        ));
        let cache = DiskCache::new(&config.cache.dir)
            .with_background_timeout(config.background_timeout());
        let writer = IndexWriter::new(cache.clone(), parser, git.clone());
        let searcher =
            Searcher::new(cache, Arc::new(writer)).with_timeout(config.search_timeout());

        Self {
            git,
            searcher,
            cache_dir: config.cache.dir.clone(),
            repos_root: config.git.repos_root.clone(),
            cache_max_bytes: config.cache_max_bytes(),
            eviction_interval: config.eviction_interval(),
            searches: AtomicU64::new(0),
            search_errors: AtomicU64::new(0),
            last_eviction: Mutex::new(None),
        }
    }

    pub fn record_eviction(&self, stats: EvictStats) {
        if let Ok(mut last) = self.last_eviction.lock() {
            *last = Some(stats);
        }
    }

    pub fn last_eviction(&self) -> Option<EvictStats> {
        self.last_eviction.lock().ok().and_then(|last| *last)
    }

    pub fn record_search(&self, ok: bool) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.search_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Evict down to the configured budget every `eviction_interval`.
pub async fn run_janitor(state: SharedState) {
    let mut ticker = tokio::time::interval(state.eviction_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let cache = state.searcher.cache().clone();
        let max = state.cache_max_bytes;
        match tokio::task::spawn_blocking(move || cache.evict(max)).await {
            Ok(Ok(stats)) => state.record_eviction(stats),
            Ok(Err(err)) => tracing::warn!(error = %err, "eviction pass failed"),
            Err(err) => tracing::warn!(error = %err, "eviction task failed"),
        }
    }
}
