use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
#[cfg(test)]
use tokio::sync::Notify;

use crate::metrics_consts::KEY_LOCK_WAIT_HISTOGRAM;

/// Error returned when lock acquisition fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Timed out waiting to acquire the lock.
    #[error("timed out acquiring lock {lock_id}")]
    Timeout { lock_id: String },
    /// Lock backend is not reachable.
    #[error("lock service unavailable: {0}")]
    Unavailable(String),
}

/// Held advisory locks. Dropping the guard releases all of them.
pub struct KeyLockGuard {
    held: Vec<Box<dyn Send + Sync>>,
}

impl KeyLockGuard {
    pub fn new(held: Vec<Box<dyn Send + Sync>>) -> Self {
        Self { held }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Service for acquiring advisory locks keyed by match-key value.
///
/// Implementations must acquire the ids in the order given; callers pass
/// them sorted so that two acquirers of overlapping sets cannot deadlock.
#[async_trait]
pub trait KeyLockService: Send + Sync {
    /// Acquire every lock in `lock_ids`, waiting for holders to release.
    async fn acquire(&self, lock_ids: &[String]) -> Result<KeyLockGuard, LockError>;
}

/// Sorted, de-duplicated lock ids.
pub fn lock_order(lock_ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = lock_ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    ids
}

const PRUNE_THRESHOLD: usize = 10_000;

/// Process-local lock service: one async mutex per key.
pub struct InMemoryKeyLockService {
    locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl InMemoryKeyLockService {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    fn mutex_for(&self, lock_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(lock_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops mutexes nobody holds or waits on.
    fn prune(&self) {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }
}

impl Default for InMemoryKeyLockService {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl KeyLockService for InMemoryKeyLockService {
    async fn acquire(&self, lock_ids: &[String]) -> Result<KeyLockGuard, LockError> {
        self.prune();
        let started = Instant::now();
        let mut held: Vec<Box<dyn Send + Sync>> = Vec::with_capacity(lock_ids.len());

        for lock_id in lock_ids {
            let mutex = self.mutex_for(lock_id);
            let remaining = self.timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, mutex.lock_owned()).await {
                Ok(guard) => held.push(Box::new(guard)),
                Err(_) => {
                    return Err(LockError::Timeout {
                        lock_id: lock_id.clone(),
                    })
                }
            }
        }

        metrics::histogram!(KEY_LOCK_WAIT_HISTOGRAM).record(started.elapsed().as_millis() as f64);
        Ok(KeyLockGuard::new(held))
    }
}

/// A breakpoint that fires before a lock is acquired.
#[cfg(test)]
pub struct LockBreakpoint {
    pub lock_id: String,
    notify: Arc<Notify>,
}

#[cfg(test)]
impl LockBreakpoint {
    pub fn before_acquire(lock_id: &str) -> Self {
        Self {
            lock_id: lock_id.to_string(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn complete(&self) {
        self.notify.notify_one();
    }
}

/// A lock service wrapper that pauses at breakpoints and can inject errors.
#[cfg(test)]
pub struct BreakpointedLockService<L: KeyLockService> {
    inner: L,
    breakpoints: Mutex<Vec<LockBreakpoint>>,
    injected_errors: Mutex<Vec<(String, LockError)>>,
}

#[cfg(test)]
impl<L: KeyLockService> BreakpointedLockService<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            breakpoints: Mutex::new(Vec::new()),
            injected_errors: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_breakpoint(&self, breakpoint: LockBreakpoint) {
        self.breakpoints.lock().await.push(breakpoint);
    }

    pub async fn complete_breakpoint(&self, lock_id: &str) {
        let breakpoints = self.breakpoints.lock().await;
        if let Some(bp) = breakpoints.iter().find(|bp| bp.lock_id == lock_id) {
            bp.complete();
        }
    }

    pub async fn inject_error(&self, lock_id: &str, error: LockError) {
        self.injected_errors
            .lock()
            .await
            .push((lock_id.to_string(), error));
    }

    async fn wait_for_breakpoints(&self, lock_ids: &[String]) {
        let notifies: Vec<Arc<Notify>> = {
            let breakpoints = self.breakpoints.lock().await;
            breakpoints
                .iter()
                .filter(|bp| lock_ids.contains(&bp.lock_id))
                .map(|bp| bp.notify.clone())
                .collect()
        };
        for notify in notifies {
            notify.notified().await;
        }
    }

    async fn take_injected_error(&self, lock_ids: &[String]) -> Option<LockError> {
        let mut errors = self.injected_errors.lock().await;
        let pos = errors.iter().position(|(id, _)| lock_ids.contains(id))?;
        Some(errors.remove(pos).1)
    }
}

#[cfg(test)]
#[async_trait]
impl<L: KeyLockService> KeyLockService for BreakpointedLockService<L> {
    async fn acquire(&self, lock_ids: &[String]) -> Result<KeyLockGuard, LockError> {
        self.wait_for_breakpoints(lock_ids).await;
        if let Some(error) = self.take_injected_error(lock_ids).await {
            return Err(error);
        }
        self.inner.acquire(lock_ids).await
    }
}
