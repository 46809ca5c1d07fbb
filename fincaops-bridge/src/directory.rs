//! Canonical directory cache
//!
//! Read-only, periodically refreshed snapshot of the registry's communities
//! and operators, used for identity resolution and the console's pickers.
//! Refreshes are bounded by a timeout; on failure the last good snapshot
//! keeps being served with a degraded flag so callers never block on a slow
//! registry.

use crate::db::registry::{self, Community, Operator};
use chrono::{DateTime, Utc};
use fincaops_common::events::{BridgeEvent, EventBus};
use fincaops_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time view of the canonical directory
///
/// Immutable once published; shared across concurrent callers without
/// locking.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub communities: Vec<Community>,
    pub operators: Vec<Operator>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// True when the latest refresh attempt failed and this data is stale
    pub degraded: bool,
}

impl DirectorySnapshot {
    fn empty() -> Self {
        Self {
            communities: Vec::new(),
            operators: Vec::new(),
            refreshed_at: None,
            degraded: false,
        }
    }
}

/// Cache of canonical entities with periodic and on-demand refresh
pub struct DirectoryCache {
    registry: SqlitePool,
    event_bus: EventBus,
    refresh_timeout: Duration,
    current: RwLock<Arc<DirectorySnapshot>>,
}

impl DirectoryCache {
    pub fn new(registry: SqlitePool, event_bus: EventBus, refresh_timeout: Duration) -> Self {
        Self {
            registry,
            event_bus,
            refresh_timeout,
            current: RwLock::new(Arc::new(DirectorySnapshot::empty())),
        }
    }

    /// Current snapshot; may be stale, never blocks on the network
    pub async fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.read().await.clone()
    }

    /// Refresh from the registry, bounded by the configured timeout
    ///
    /// On failure the previous snapshot stays in place with its degraded
    /// flag set; the error is returned so explicit refreshes can surface it.
    pub async fn refresh(&self) -> Result<Arc<DirectorySnapshot>> {
        let fetch = async {
            let communities = registry::list_communities(&self.registry).await?;
            let operators = registry::list_operators(&self.registry).await?;
            Ok::<_, Error>((communities, operators))
        };

        let outcome = match tokio::time::timeout(self.refresh_timeout, fetch).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Internal(format!(
                "directory refresh timed out after {:?}",
                self.refresh_timeout
            ))),
        };

        match outcome {
            Ok((communities, operators)) => {
                let snapshot = Arc::new(DirectorySnapshot {
                    communities,
                    operators,
                    refreshed_at: Some(Utc::now()),
                    degraded: false,
                });
                *self.current.write().await = snapshot.clone();

                debug!(
                    communities = snapshot.communities.len(),
                    operators = snapshot.operators.len(),
                    "Directory cache refreshed"
                );
                self.event_bus.emit_lossy(BridgeEvent::DirectoryRefreshed {
                    communities: snapshot.communities.len(),
                    operators: snapshot.operators.len(),
                    degraded: false,
                    timestamp: Utc::now(),
                });

                Ok(snapshot)
            }
            Err(e) => {
                warn!("Directory refresh failed, serving stale snapshot: {}", e);

                let mut guard = self.current.write().await;
                let mut stale = (**guard).clone();
                stale.degraded = true;
                let stale = Arc::new(stale);
                *guard = stale.clone();
                drop(guard);

                self.event_bus.emit_lossy(BridgeEvent::DirectoryRefreshed {
                    communities: stale.communities.len(),
                    operators: stale.operators.len(),
                    degraded: true,
                    timestamp: Utc::now(),
                });

                Err(e)
            }
        }
    }

    /// Periodic refresh loop; runs until the token is cancelled
    pub fn spawn_refresh_task(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Failures already degraded the snapshot; nothing
                        // more to do until the next tick
                        let _ = self.refresh().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("Directory refresh task stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    async fn registry_fixture() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = db::init_registry_pool(&dir.path().join("registry.db"))
            .await
            .unwrap();

        sqlx::query("INSERT INTO communities (id, display_code, name) VALUES (5, 'SOL', 'Edificio Sol')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO operators (id, display_name, is_active) VALUES ('u-42', 'María', 1)")
            .execute(&pool)
            .await
            .unwrap();

        (dir, pool)
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let (_dir, pool) = registry_fixture().await;
        let cache = DirectoryCache::new(pool, EventBus::new(10), Duration::from_secs(5));

        assert!(cache.snapshot().await.refreshed_at.is_none());

        let snapshot = cache.refresh().await.unwrap();
        assert_eq!(snapshot.communities.len(), 1);
        assert_eq!(snapshot.operators.len(), 1);
        assert!(!snapshot.degraded);
        assert!(cache.snapshot().await.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_data_degraded() {
        let (_dir, pool) = registry_fixture().await;
        let cache = DirectoryCache::new(pool.clone(), EventBus::new(10), Duration::from_secs(5));
        cache.refresh().await.unwrap();

        // Break the registry out from under the cache
        sqlx::query("DROP TABLE communities")
            .execute(&pool)
            .await
            .unwrap();

        assert!(cache.refresh().await.is_err());

        let snapshot = cache.snapshot().await;
        assert!(snapshot.degraded, "stale snapshot must be flagged");
        assert_eq!(snapshot.communities.len(), 1, "last good data is retained");
    }
}
