//! Retry helpers for optimistic-concurrency conflicts and transient errors

use crate::domain::ports::{ResourceStore, StoreObject, WatchStream};
use crate::error::{Error, Result};
use crate::store::LabelSelector;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the interval
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            multiplier: 2.0,
            randomization_factor: 0.1,
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `op` until it succeeds, fails with an error `retryable` rejects, or
/// the attempt cap is reached.
pub async fn retry_when<T, F, Fut, P>(config: &RetryConfig, retryable: P, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut backoff = config.backoff();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && attempt < config.max_attempts => {
                let wait = backoff.next_backoff().unwrap_or(config.max_interval);
                debug!("Attempt {} failed ({}); retrying in {:?}", attempt, err, wait);
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Re-run a read-modify-write closure on resource-version conflicts
pub async fn retry_on_conflict<T, F, Fut>(config: &RetryConfig, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(config, Error::is_conflict, op).await
}

/// Re-run a call on transient remote failures
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(config, Error::is_transient, op).await
}

/// Store decorator retrying every call on transient remote failures.
///
/// Conflicts and not-found pass straight through to the caller.
pub struct TransientRetryStore<S> {
    inner: S,
    retry: RetryConfig,
}

impl<S> TransientRetryStore<S> {
    pub fn new(inner: S, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl<K, S> ResourceStore<K> for TransientRetryStore<S>
where
    K: StoreObject,
    S: ResourceStore<K>,
{
    async fn get(&self, name: &str) -> Result<K> {
        retry_transient(&self.retry, || self.inner.get(name)).await
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        retry_transient(&self.retry, || self.inner.list(selector)).await
    }

    async fn create(&self, object: &K) -> Result<K> {
        retry_transient(&self.retry, || self.inner.create(object)).await
    }

    async fn update(&self, object: &K) -> Result<K> {
        retry_transient(&self.retry, || self.inner.update(object)).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        retry_transient(&self.retry, || self.inner.delete(name)).await
    }

    async fn delete_collection(&self, selector: &LabelSelector) -> Result<()> {
        retry_transient(&self.retry, || self.inner.delete_collection(selector)).await
    }

    async fn watch(&self, selector: &LabelSelector) -> Result<WatchStream<K>> {
        retry_transient(&self.retry, || self.inner.watch(selector)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DirectPVNode;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use kube::ResourceExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_conflict_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_on_conflict(&fast(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::conflict("DirectPVDrive", "d1"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflict_cap_exhausted() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_on_conflict(&fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::conflict("DirectPVDrive", "d1"))
        })
        .await;
        assert_matches!(result, Err(Error::Conflict { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_on_conflict(&fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::State("source drive is not cordoned".into()))
        })
        .await;
        assert_matches!(result, Err(Error::State(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Fails the first `failures` calls of every kind with a watch error
    struct FlakyStore {
        inner: MemoryStore<DirectPVNode>,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn trip(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::Watch("connection reset by peer".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ResourceStore<DirectPVNode> for FlakyStore {
        async fn get(&self, name: &str) -> Result<DirectPVNode> {
            self.trip()?;
            self.inner.get(name).await
        }

        async fn list(&self, selector: &LabelSelector) -> Result<Vec<DirectPVNode>> {
            self.trip()?;
            self.inner.list(selector).await
        }

        async fn create(&self, object: &DirectPVNode) -> Result<DirectPVNode> {
            self.trip()?;
            self.inner.create(object).await
        }

        async fn update(&self, object: &DirectPVNode) -> Result<DirectPVNode> {
            self.trip()?;
            self.inner.update(object).await
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.trip()?;
            self.inner.delete(name).await
        }

        async fn delete_collection(&self, selector: &LabelSelector) -> Result<()> {
            self.trip()?;
            self.inner.delete_collection(selector).await
        }

        async fn watch(&self, selector: &LabelSelector) -> Result<WatchStream<DirectPVNode>> {
            self.trip()?;
            self.inner.watch(selector).await
        }
    }

    fn flaky(failures: u32) -> TransientRetryStore<FlakyStore> {
        TransientRetryStore::new(
            FlakyStore {
                inner: MemoryStore::new(),
                failures,
                calls: AtomicU32::new(0),
            },
            fast(),
        )
    }

    #[tokio::test]
    async fn test_transient_failures_retried_by_store() {
        let store = flaky(2);
        let node = DirectPVNode::new("node-1", Default::default());
        store.create(&node).await.unwrap();
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("node-1").await.unwrap().name_any(), "node-1");
    }

    #[tokio::test]
    async fn test_transient_store_gives_up_and_passes_not_found() {
        let store = flaky(10);
        assert_matches!(store.list(&LabelSelector::new()).await, Err(Error::Watch(_)));
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 5);

        let store = flaky(0);
        assert_matches!(store.get("missing").await, Err(Error::NotFound { .. }));
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 1);
    }
}
