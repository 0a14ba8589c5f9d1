//! Heartbeat supervision: one renewal task per registry key
//!
//! A renewal task sleeps for the beat interval, then refreshes its key. It
//! ends when a refresh fails or when its cancellation token fires. A failed
//! refresh is retried if a new record was handed over while it ran. The
//! heartbeat set is only locked for membership changes, never across a
//! sleep or a store call.

use crate::metrics::RegistryMetrics;
use crate::record::ServiceRecord;
use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Heartbeat {
    generation: u64,
    token: CancellationToken,
    record: watch::Sender<ServiceRecord>,
}

struct Inner {
    hearts: Mutex<HashMap<String, Heartbeat>>,
    next_generation: AtomicU64,
    metrics: RegistryMetrics,
}

/// HeartbeatSupervisor owns the set of keys currently being renewed
#[derive(Clone)]
pub struct HeartbeatSupervisor {
    inner: Arc<Inner>,
}

impl HeartbeatSupervisor {
    pub fn new(metrics: RegistryMetrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                hearts: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Start renewing `key` unless a renewal task already owns it.
    ///
    /// Returns `true` when a new task was spawned. When the key is already
    /// renewed the running task adopts `record` for its next refresh.
    pub async fn start<F, Fut>(
        &self,
        key: String,
        record: ServiceRecord,
        beat: Duration,
        renew: F,
    ) -> bool
    where
        F: Fn(ServiceRecord) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut hearts = self.inner.hearts.lock().await;
        if let Some(existing) = hearts.get(&key) {
            existing.record.send_replace(record);
            debug!(key = %key, "Heartbeat already running");
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let (record_tx, record_rx) = watch::channel(record);
        hearts.insert(
            key.clone(),
            Heartbeat {
                generation,
                token: token.clone(),
                record: record_tx,
            },
        );
        self.inner.metrics.active_heartbeats.inc();
        drop(hearts);

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor
                .renew_loop(&key, generation, token, record_rx, beat, renew)
                .await;
        });

        true
    }

    async fn renew_loop<F, Fut>(
        &self,
        key: &str,
        generation: u64,
        token: CancellationToken,
        mut record: watch::Receiver<ServiceRecord>,
        beat: Duration,
        renew: F,
    ) where
        F: Fn(ServiceRecord) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        debug!(key = %key, generation, "Heartbeat started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(beat) => {}
            }

            let current = record.borrow_and_update().clone();
            // a refresh still in flight when the key is stopped must not land
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = renew(current) => result,
            };
            RegistryMetrics::record(&self.inner.metrics.heartbeats_total, result.is_ok());
            if let Err(e) = result {
                if self.release_unless_replaced(key, generation, &record).await {
                    warn!(key = %key, error = %e, "Heartbeat failed, no longer renewing");
                    return;
                }
                debug!(key = %key, error = %e, "Heartbeat failed but key was re-registered, renewing");
            }
        }
        debug!(key = %key, generation, "Heartbeat cancelled");
        self.release(key, generation).await;
    }

    /// Release the entry for `key` after a failed refresh, unless a newer
    /// record was handed over while the refresh was in flight. Returns
    /// `true` when the task should exit.
    async fn release_unless_replaced(
        &self,
        key: &str,
        generation: u64,
        record: &watch::Receiver<ServiceRecord>,
    ) -> bool {
        let mut hearts = self.inner.hearts.lock().await;
        if hearts.get(key).map(|h| h.generation) != Some(generation) {
            return true;
        }
        if record.has_changed().unwrap_or(false) {
            return false;
        }
        hearts.remove(key);
        self.inner.metrics.active_heartbeats.dec();
        true
    }

    /// Remove the entry for `key` if it still belongs to `generation`
    async fn release(&self, key: &str, generation: u64) {
        let mut hearts = self.inner.hearts.lock().await;
        if hearts.get(key).map(|h| h.generation) == Some(generation) {
            hearts.remove(key);
            self.inner.metrics.active_heartbeats.dec();
        }
    }

    /// Stop renewing `key`. Returns `false` if no task was renewing it.
    pub async fn stop(&self, key: &str) -> bool {
        let removed = self.inner.hearts.lock().await.remove(key);
        match removed {
            Some(heart) => {
                heart.token.cancel();
                self.inner.metrics.active_heartbeats.dec();
                debug!(key = %key, "Heartbeat stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every renewal task
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<(String, Heartbeat)> = self.inner.hearts.lock().await.drain().collect();
        for (_, heart) in &drained {
            heart.token.cancel();
        }
        self.inner.metrics.active_heartbeats.sub(drained.len() as i64);
        info!("Stopped {} heartbeats", drained.len());
        drained.len()
    }

    pub async fn is_renewing(&self, key: &str) -> bool {
        self.inner.hearts.lock().await.contains_key(key)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.hearts.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, wait_until_async};
    use crate::CoreError;
    use crate::StoreError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const BEAT: Duration = Duration::from_millis(10);

    fn supervisor() -> HeartbeatSupervisor {
        HeartbeatSupervisor::new(RegistryMetrics::default())
    }

    fn counting_renew(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(ServiceRecord) -> std::future::Ready<Result<()>> + Send + 'static {
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_start_spawns_single_task() {
        let hearts = supervisor();
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(
            hearts
                .start("/k".into(), ServiceRecord::default(), BEAT, counting_renew(calls.clone()))
                .await
        );
        assert!(
            !hearts
                .start("/k".into(), ServiceRecord::default(), BEAT, counting_renew(calls.clone()))
                .await
        );
        assert_eq!(hearts.active_count().await, 1);

        let observed = calls.clone();
        assert!(wait_until(|| observed.load(Ordering::SeqCst) >= 3).await);
        hearts.stop_all().await;
    }

    #[tokio::test]
    async fn test_failed_renewal_removes_entry() {
        let hearts = supervisor();
        hearts
            .start("/k".into(), ServiceRecord::default(), BEAT, |_| async {
                Err::<(), _>(key_not_found())
            })
            .await;

        let watcher = hearts.clone();
        assert!(wait_until_async(|| {
            let watcher = watcher.clone();
            async move { !watcher.is_renewing("/k").await }
        })
        .await);
        assert_eq!(hearts.inner.metrics.active_heartbeats.get(), 0);
        assert_eq!(
            hearts
                .inner
                .metrics
                .heartbeats_total
                .with_label_values(&["failure"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_stop_cancels_task() {
        let hearts = supervisor();
        let calls = Arc::new(AtomicUsize::new(0));
        hearts
            .start("/k".into(), ServiceRecord::default(), BEAT, counting_renew(calls.clone()))
            .await;

        assert!(hearts.stop("/k").await);
        assert!(!hearts.stop("/k").await);
        assert!(!hearts.is_renewing("/k").await);

        let settled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(BEAT * 5).await;
        assert!(calls.load(Ordering::SeqCst) <= settled + 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_not_clobbered() {
        let hearts = supervisor();
        let calls = Arc::new(AtomicUsize::new(0));
        hearts
            .start("/k".into(), ServiceRecord::default(), BEAT, counting_renew(calls.clone()))
            .await;
        hearts.stop("/k").await;
        assert!(
            hearts
                .start("/k".into(), ServiceRecord::default(), BEAT, counting_renew(calls.clone()))
                .await
        );

        // the cancelled task must not remove the new entry on its way out
        tokio::time::sleep(BEAT * 5).await;
        assert!(hearts.is_renewing("/k").await);
        assert_eq!(hearts.inner.metrics.active_heartbeats.get(), 1);
        hearts.stop_all().await;
    }

    #[tokio::test]
    async fn test_duplicate_start_replaces_record() {
        let hearts = supervisor();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let renew = move |record: ServiceRecord| {
            sink.lock().unwrap().push(record.host.clone());
            std::future::ready(Ok(()))
        };

        hearts
            .start("/k".into(), ServiceRecord::with_host("10.0.0.1"), BEAT, renew)
            .await;
        hearts
            .start(
                "/k".into(),
                ServiceRecord::with_host("10.0.0.2"),
                BEAT,
                |_| std::future::ready(Ok(())),
            )
            .await;

        let observed = seen.clone();
        assert!(
            wait_until(move || {
                observed
                    .lock()
                    .unwrap()
                    .last()
                    .map(|host| host.as_deref() == Some("10.0.0.2"))
                    .unwrap_or(false)
            })
            .await
        );
        hearts.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_all_drains() {
        let hearts = supervisor();
        for key in ["/a", "/b", "/c"] {
            hearts
                .start(key.into(), ServiceRecord::default(), BEAT, |_| {
                    std::future::ready(Ok(()))
                })
                .await;
        }
        assert_eq!(hearts.active_count().await, 3);
        assert_eq!(hearts.stop_all().await, 3);
        assert_eq!(hearts.active_count().await, 0);
        assert_eq!(hearts.inner.metrics.active_heartbeats.get(), 0);
    }

    fn key_not_found() -> CoreError {
        CoreError::store(
            "refresh",
            "/k",
            StoreError::Rejected {
                code: 100,
                message: "Key not found".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_record_handed_over_during_failing_refresh_keeps_renewing() {
        let hearts = supervisor();
        let entered = Arc::new(Notify::new());
        let resume = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let renew = {
            let (entered, resume, calls) = (entered.clone(), resume.clone(), calls.clone());
            move |_: ServiceRecord| {
                let (entered, resume) = (entered.clone(), resume.clone());
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        entered.notify_one();
                        resume.notified().await;
                        return Err(key_not_found());
                    }
                    Ok(())
                }
            }
        };
        hearts
            .start("/k".into(), ServiceRecord::with_host("10.0.0.1"), BEAT, renew)
            .await;

        // the key expired; a fresh registration arrives while the refresh is pending
        entered.notified().await;
        assert!(
            !hearts
                .start(
                    "/k".into(),
                    ServiceRecord::with_host("10.0.0.2"),
                    BEAT,
                    |_| std::future::ready(Ok(())),
                )
                .await
        );
        resume.notify_one();

        let observed = calls.clone();
        assert!(wait_until(|| observed.load(Ordering::SeqCst) >= 3).await);
        assert!(hearts.is_renewing("/k").await);
        assert_eq!(hearts.inner.metrics.active_heartbeats.get(), 1);
        hearts.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_abandons_refresh_in_flight() {
        let hearts = supervisor();
        let entered = Arc::new(Notify::new());
        let resume = Arc::new(Notify::new());
        let landed = Arc::new(AtomicUsize::new(0));

        let renew = {
            let (entered, resume, landed) = (entered.clone(), resume.clone(), landed.clone());
            move |_: ServiceRecord| {
                let (entered, resume, landed) = (entered.clone(), resume.clone(), landed.clone());
                async move {
                    entered.notify_one();
                    resume.notified().await;
                    landed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        hearts
            .start("/k".into(), ServiceRecord::default(), BEAT, renew)
            .await;

        entered.notified().await;
        assert!(hearts.stop("/k").await);
        resume.notify_waiters();

        tokio::time::sleep(BEAT * 5).await;
        assert_eq!(landed.load(Ordering::SeqCst), 0);
    }
}
