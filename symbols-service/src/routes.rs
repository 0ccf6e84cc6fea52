use crate::error::AppError;
use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use symbols_core::{Context, EvictStats, SearchArgs, SearchResults, SymbolsError};
use tracing::Instrument;

// POST /search
#[derive(Deserialize)]
pub struct SearchRequest {
    pub repo: String,
    pub commit_id: String,
    #[serde(flatten)]
    pub args: SearchArgs,
}

pub async fn search(
    State(state): State<SharedState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResults>, AppError> {
    let start = Instant::now();
    let span = tracing::info_span!("search", repo = %req.repo, commit = %req.commit_id);
    let ctx = Context::background().with_span(span.clone());

    // Dropping the handler future (client went away) cancels the search
    let _guard = CancelOnDrop(ctx.clone());
    let result = resolve_and_search(&state, &ctx, &req)
        .instrument(span.clone())
        .await;
    state.record_search(result.is_ok());

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(results) => tracing::info!(
            parent: &span,
            duration_ms,
            matches = results.symbols.len(),
            limit_hit = results.limit_hit,
            "POST /search"
        ),
        Err(err) => tracing::warn!(parent: &span, duration_ms, error = %err, "POST /search failed"),
    }

    Ok(Json(result?))
}

/// `commit_id` may be any revision; the index is keyed by the commit it names now.
async fn resolve_and_search(
    state: &SharedState,
    ctx: &Context,
    req: &SearchRequest,
) -> symbols_core::Result<SearchResults> {
    let git = Arc::clone(&state.git);
    let (resolve_ctx, repo, rev) = (ctx.clone(), req.repo.clone(), req.commit_id.clone());
    let commit = tokio::task::spawn_blocking(move || git.resolve_commit(&resolve_ctx, &repo, &rev))
        .await
        .map_err(|e| SymbolsError::BuildTask(e.to_string()))??;
    if commit != req.commit_id {
        tracing::debug!(rev = %req.commit_id, %commit, "resolved revision");
    }
    state.searcher.search(ctx, &req.repo, &commit, &req.args).await
}

struct CancelOnDrop(Context);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

// GET /status
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub cache_dir: String,
    pub repos_root: String,
    pub cache_max_bytes: u64,
    pub eviction_interval_secs: u64,
    pub searches: u64,
    pub search_errors: u64,
    pub last_eviction: Option<EvictStats>,
}

pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "symbols-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_dir: state.cache_dir.to_string_lossy().to_string(),
        repos_root: state.repos_root.to_string_lossy().to_string(),
        cache_max_bytes: state.cache_max_bytes,
        eviction_interval_secs: state.eviction_interval.as_secs(),
        searches: state.searches.load(Ordering::Relaxed),
        search_errors: state.search_errors.load(Ordering::Relaxed),
        last_eviction: state.last_eviction(),
    })
}
