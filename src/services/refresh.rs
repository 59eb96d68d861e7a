//! Periodic node refresh service
//!
//! Refreshes once at startup, then on every tick of the configured interval
//! until the shutdown channel flips. Ticks feed the same
//! [`ProxyManager::refresh`] as API-triggered refreshes, which serialises them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument};

use crate::pool::ProxyManager;

/// Refresh service configuration
#[derive(Clone, Default)]
pub struct RefreshConfig {
    /// Time between refreshes; `None` refreshes only at startup
    pub interval: Option<Duration>,
}

impl RefreshConfig {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            interval: (seconds > 0).then(|| Duration::from_secs(seconds)),
        }
    }
}

pub struct RefreshService {
    manager: Arc<ProxyManager>,
    config: RefreshConfig,
}

impl RefreshService {
    pub fn new(manager: Arc<ProxyManager>, config: RefreshConfig) -> Self {
        Self { manager, config }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.refresh_once("Initial").await;

        let Some(period) = self.config.interval else {
            info!("Periodic refresh disabled");
            return;
        };
        info!("Starting refresh service (interval: {}s)", period.as_secs());

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_once("Scheduled").await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn refresh_once(&self, trigger: &str) {
        match self.manager.refresh().await {
            Ok(summary) => info!(
                trigger,
                nodes = summary.nodes,
                endpoints = summary.endpoints,
                "Refresh finished"
            ),
            Err(e) => error!(trigger, "Refresh failed: {}", e),
        }
    }
}

/// Handle for stopping the refresh service
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RefreshHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig};
    use crate::error::Result;
    use crate::models::{ProxyEndpoint, ProxyNode};
    use crate::normalizer::NodeSource;
    use crate::pool::RelaySupervisor;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl NodeSource for CountingSource {
        async fn load(&self) -> Result<Vec<ProxyNode>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct NoRelay;

    #[async_trait]
    impl RelaySupervisor for NoRelay {
        async fn ensure(&self, _endpoint: &ProxyEndpoint, _backend_uri: &str) -> bool {
            true
        }
        async fn cleanup(&self, _active_ids: &HashSet<String>) {}
        async fn stop_all(&self) {}
        fn status(&self) -> Value {
            json!({})
        }
    }

    fn manager(dir: &TempDir, source: Arc<CountingSource>) -> Arc<ProxyManager> {
        let mut config = Config::default();
        config.storage = StorageConfig::in_dir(dir.path());
        Arc::new(ProxyManager::new(&config, source, Arc::new(NoRelay)))
    }

    #[test]
    fn test_zero_seconds_disables_interval() {
        assert!(RefreshConfig::from_seconds(0).interval.is_none());
        assert_eq!(
            RefreshConfig::from_seconds(30).interval,
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn test_startup_refresh_without_interval() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(CountingSource::default());
        let service = RefreshService::new(manager(&dir, source.clone()), RefreshConfig::default());
        let (_handle, rx) = RefreshHandle::new();

        service.run(rx).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(CountingSource::default());
        let manager = manager(&dir, source.clone());
        let (handle, rx) = RefreshHandle::new();

        let task = tokio::spawn(async move {
            RefreshService::new(manager, RefreshConfig::from_seconds(10))
                .run(rx)
                .await;
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 3);
    }
}
