use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::services::conversation::RetrievalProvider;
use crate::utils::error::RagError;

/// Builds a query-ready retrieval handle against the vector backend
#[async_trait::async_trait]
pub trait IndexConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RetrievalProvider>>;
}

enum IndexState {
    Uninitialized,
    Ready(Arc<dyn RetrievalProvider>),
    Failed {
        at: Instant,
        since: DateTime<Utc>,
        error: String,
    },
}

/// Set while a connect attempt is in flight, cleared even if the attempt is dropped
struct ConnectingFlag<'a>(&'a AtomicBool);

impl<'a> ConnectingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ConnectingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Readiness view of the shared index handle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed { since: String, error: String },
}

impl IndexStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, IndexStatus::Ready)
    }
}

/// Process-wide, lazily constructed retrieval handle.
///
/// Reads go through `state` and never wait on construction. `connect_lock`
/// is held only across `connect`, so concurrent first requests share one
/// attempt. A failure is cached for `retry_after`; the first request after
/// the window retries.
pub struct IndexManager {
    connector: Arc<dyn IndexConnector>,
    state: RwLock<IndexState>,
    connect_lock: Mutex<()>,
    connecting: AtomicBool,
    retry_after: Duration,
}

impl IndexManager {
    pub fn new(connector: Arc<dyn IndexConnector>, retry_after: Duration) -> Self {
        Self {
            connector,
            state: RwLock::new(IndexState::Uninitialized),
            connect_lock: Mutex::new(()),
            connecting: AtomicBool::new(false),
            retry_after,
        }
    }

    /// Cached outcome, or None when a connect attempt is due
    fn cached(&self) -> Option<Result<Arc<dyn RetrievalProvider>, RagError>> {
        match &*self.state.read() {
            IndexState::Ready(handle) => Some(Ok(handle.clone())),
            IndexState::Failed { at, error, .. } if at.elapsed() < self.retry_after => {
                Some(Err(RagError::IndexUnavailable(error.clone())))
            }
            _ => None,
        }
    }

    /// Ready handle, connecting on first use
    pub async fn acquire(&self) -> Result<Arc<dyn RetrievalProvider>, RagError> {
        if let Some(outcome) = self.cached() {
            return outcome;
        }

        let _guard = self.connect_lock.lock().await;

        // Another request may have finished connecting while we waited
        if let Some(outcome) = self.cached() {
            return outcome;
        }

        info!("Initializing retrieval index");
        let outcome = {
            let _connecting = ConnectingFlag::raise(&self.connecting);
            self.connector.connect().await
        };

        match outcome {
            Ok(handle) => {
                info!("Retrieval index ready");
                *self.state.write() = IndexState::Ready(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Failed to initialize retrieval index: {}", message);
                *self.state.write() = IndexState::Failed {
                    at: Instant::now(),
                    since: Utc::now(),
                    error: message.clone(),
                };
                Err(RagError::IndexUnavailable(message))
            }
        }
    }

    /// Drop the cached handle or failure so the next request reconnects
    pub fn invalidate(&self) {
        *self.state.write() = IndexState::Uninitialized;
        warn!("Retrieval index invalidated");
    }

    /// Invalidate, then connect again right away
    pub async fn reload(&self) -> IndexStatus {
        self.invalidate();
        // The outcome is reflected in the returned status
        let _ = self.acquire().await;
        self.status()
    }

    pub fn status(&self) -> IndexStatus {
        match &*self.state.read() {
            IndexState::Ready(_) => IndexStatus::Ready,
            _ if self.connecting.load(Ordering::SeqCst) => IndexStatus::Initializing,
            IndexState::Uninitialized => IndexStatus::Uninitialized,
            IndexState::Failed { since, error, .. } => IndexStatus::Failed {
                since: since.to_rfc3339(),
                error: error.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::Passage;
    use std::sync::atomic::AtomicUsize;

    struct EmptyIndex;

    #[async_trait::async_trait]
    impl RetrievalProvider for EmptyIndex {
        async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
            Ok(Vec::new())
        }
    }

    /// Fails the first `failures` attempts, then succeeds
    struct CountingConnector {
        attempts: AtomicUsize,
        failures: usize,
        delay: Duration,
    }

    impl CountingConnector {
        fn new(failures: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                failures,
                delay,
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IndexConnector for CountingConnector {
        async fn connect(&self) -> Result<Arc<dyn RetrievalProvider>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if attempt < self.failures {
                anyhow::bail!("connection refused");
            }
            Ok(Arc::new(EmptyIndex))
        }
    }

    #[tokio::test]
    async fn test_ready_handle_is_reused() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let manager = IndexManager::new(connector.clone(), Duration::from_secs(30));

        assert_eq!(manager.status(), IndexStatus::Uninitialized);
        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();

        assert_eq!(connector.attempts(), 1);
        assert!(manager.status().is_ready());
    }

    #[tokio::test]
    async fn test_failure_is_cached_within_window() {
        let connector = CountingConnector::new(1, Duration::ZERO);
        let manager = IndexManager::new(connector.clone(), Duration::from_secs(30));

        assert!(matches!(manager.acquire().await, Err(RagError::IndexUnavailable(_))));
        assert!(matches!(manager.acquire().await, Err(RagError::IndexUnavailable(_))));
        assert_eq!(connector.attempts(), 1);
        assert!(matches!(manager.status(), IndexStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_retry_after_window() {
        let connector = CountingConnector::new(1, Duration::ZERO);
        let manager = IndexManager::new(connector.clone(), Duration::from_millis(20));

        assert!(manager.acquire().await.is_err());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(manager.acquire().await.is_ok());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_retry() {
        let connector = CountingConnector::new(1, Duration::ZERO);
        let manager = IndexManager::new(connector.clone(), Duration::from_secs(30));

        assert!(manager.acquire().await.is_err());
        manager.invalidate();
        assert!(manager.acquire().await.is_ok());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_is_single_flight() {
        let connector = CountingConnector::new(0, Duration::from_millis(50));
        let manager = Arc::new(IndexManager::new(connector.clone(), Duration::from_secs(30)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.acquire().await.is_ok() })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_reload_reconnects_after_cached_failure() {
        let connector = CountingConnector::new(1, Duration::ZERO);
        let manager = IndexManager::new(connector.clone(), Duration::from_secs(30));

        assert!(manager.acquire().await.is_err());
        assert_eq!(manager.reload().await, IndexStatus::Ready);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_initializing_reported_while_connecting() {
        let connector = CountingConnector::new(0, Duration::from_millis(200));
        let manager = Arc::new(IndexManager::new(connector, Duration::from_secs(30)));

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.acquire().await.is_ok() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(manager.status(), IndexStatus::Initializing);
        assert!(pending.await.unwrap());
        assert_eq!(manager.status(), IndexStatus::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ready_status_stable_under_concurrent_acquire() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let manager = Arc::new(IndexManager::new(connector.clone(), Duration::from_secs(30)));
        manager.acquire().await.unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let manager = manager.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    while !stop.load(Ordering::Relaxed) {
                        manager.acquire().await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let not_ready = (0..50_000).filter(|_| !manager.status().is_ready()).count();

        stop.store(true, Ordering::Relaxed);
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(not_ready, 0);
        assert_eq!(connector.attempts(), 1);
    }
}
