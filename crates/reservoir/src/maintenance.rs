//! Periodic pool and cache maintenance

use std::sync::Arc;
use std::time::Duration;

use reservoir_cache::{CacheStatistics, ShardedCache};
use reservoir_pool::{ConnectionManager, PoolStatus, ResourcePool};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

/// What a maintenance pass did
#[derive(Debug, Clone)]
pub struct MaintenanceReport {
    pub stale_removed: usize,
    pub shrunk: usize,
    pub replenished: usize,
    pub pool_healthy: bool,
    pub available_nodes: usize,
    pub pool_status: PoolStatus,
    pub cache_stats: CacheStatistics,
}

/// Run one maintenance pass over the pool and the cache peers
pub async fn run_maintenance<M: ConnectionManager>(
    pool: &ResourcePool<M>,
    cache: &ShardedCache,
) -> MaintenanceReport {
    let stale_removed = pool.remove_stale_connections();
    let shrunk = pool.shrink();

    // Stale removal can leave the pool below its floor
    let deficit = pool.config().min_size.saturating_sub(pool.total_count());
    let replenished = pool.expand(deficit);

    let pool_healthy = pool.health_check();
    if !pool_healthy {
        warn!("Connection pool {} has unhealthy connections", pool.identifier());
    }

    let available_nodes = cache.health_check().await;
    let pool_status = pool.status();
    let cache_stats = cache.statistics();

    info!(
        "Maintenance complete: {} stale removed, {} shrunk, {} replenished; pool {}/{}/{} (active/idle/total); {}/{} cache nodes available; hit rate {:.2}",
        stale_removed,
        shrunk,
        replenished,
        pool_status.active,
        pool_status.idle,
        pool_status.total,
        available_nodes,
        cache.node_count(),
        cache_stats.hit_rate()
    );

    MaintenanceReport {
        stale_removed,
        shrunk,
        replenished,
        pool_healthy,
        available_nodes,
        pool_status,
        cache_stats,
    }
}

/// Spawn a background task that runs maintenance periodically
pub fn spawn_maintenance_task<M>(
    pool: Arc<ResourcePool<M>>,
    cache: Arc<ShardedCache>,
    period: Duration,
) -> JoinHandle<()>
where
    M: ConnectionManager + 'static,
{
    info!(
        "Starting background maintenance task (interval: {} seconds)",
        period.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(period);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if pool.is_shutting_down() {
                break;
            }
            run_maintenance(&pool, &cache).await;
        }
    })
}
