//! Snapshot cache commands

use tracing::info;

use super::AppState;
use crate::cache::CacheStats;

pub async fn cache_stats(state: &AppState) -> CacheStats {
    state.cache.stats()
}

/// Drop every cached snapshot; the next scan refetches everything
pub async fn clear_cache(state: &AppState) {
    state.cache.clear();
    info!("snapshot cache cleared");
}

/// Drop snapshots past their grace period. Returns how many were removed.
pub async fn prune_cache(state: &AppState) -> usize {
    let removed = state.cache.evict_expired();
    if removed > 0 {
        info!(removed, "pruned expired snapshots");
    }
    removed
}
