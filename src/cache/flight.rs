//! Keyed single-flight coordination.
//!
//! At most one generation runs per key. Callers arriving while it runs attach to the
//! same shared outcome. The entry is removed as soon as the generation finishes, so a
//! later caller starts over and re-checks freshness. Failures are never retained.

use std::{future::Future, hash::Hash, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tokio::task::JoinError;
use tracing::debug;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Map from key to the in-flight generation for that key.
pub struct SingleFlight<K, T, E> {
    inflight: Arc<DashMap<K, Flight<T, E>>>,
}

impl<K, T, E> Clone for SingleFlight<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, T, E> Default for SingleFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a generation currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Await the outcome for `key`, starting `generate` only when nothing is in flight.
    ///
    /// The generation runs on its own task: dropping this future detaches the caller
    /// but never cancels work other callers are waiting on.
    pub async fn obtain<F, Fut>(&self, key: K, generate: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = match self.inflight.entry(key) {
            Entry::Occupied(entry) => {
                counter!("diarender_flight_joined_total").increment(1);
                debug!(
                    target = "cache::flight",
                    op = "flight::obtain",
                    result = "joined",
                    "Attached to in-flight generation"
                );
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // The guard's drop locks this shard, so it must not exist while `generate` can panic.
                let work = generate();
                let guard = FlightGuard {
                    key: entry.key().clone(),
                    inflight: Arc::clone(&self.inflight),
                };
                let handle = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });
                let flight = async move { handle.await.unwrap_or_else(|err| Err(E::from(err))) }
                    .boxed()
                    .shared();
                entry.insert(flight.clone());
                flight
            }
        };
        flight.await
    }
}

/// Unregisters the key when the generation task ends, including on panic.
struct FlightGuard<K, T, E>
where
    K: Eq + Hash,
{
    key: K,
    inflight: Arc<DashMap<K, Flight<T, E>>>,
}

impl<K, T, E> Drop for FlightGuard<K, T, E>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use futures::future::join_all;
    use tokio::sync::Notify;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Failed(String),
        Aborted,
    }

    impl From<JoinError> for TestError {
        fn from(_: JoinError) -> Self {
            TestError::Aborted
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_generation() {
        let flights: SingleFlight<&'static str, u32, TestError> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let releaser = {
            let flights = flights.clone();
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                while flights.in_flight() == 0 {
                    tokio::task::yield_now().await;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                release.notify_one();
            })
        };

        let outcomes = join_all((0..8).map(|_| {
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            flights.obtain("flow", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok(42)
            })
        }))
        .await;
        releaser.await.expect("releaser");

        assert!(outcomes.iter().all(|outcome| *outcome == Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_but_not_retained() {
        let flights: SingleFlight<u8, u32, TestError> = SingleFlight::new();

        let first = flights
            .obtain(1, || async { Err(TestError::Failed("boom".into())) })
            .await;
        assert_eq!(first, Err(TestError::Failed("boom".into())));
        assert_eq!(flights.in_flight(), 0);

        let second = flights.obtain(1, || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn unrelated_keys_run_independently() {
        let flights: SingleFlight<u8, u8, TestError> = SingleFlight::new();
        let gate = Arc::new(Notify::new());

        let blocked = {
            let flights = flights.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                flights
                    .obtain(1, move || async move {
                        gate.notified().await;
                        Ok(1)
                    })
                    .await
            })
        };

        let other = flights.obtain(2, || async { Ok(2) }).await;
        assert_eq!(other, Ok(2));

        gate.notify_one();
        assert_eq!(blocked.await.expect("join"), Ok(1));
    }

    #[tokio::test]
    async fn panicking_generation_surfaces_error_and_unregisters() {
        let flights: SingleFlight<u8, u8, TestError> = SingleFlight::new();

        let outcome = flights
            .obtain(3, || async {
                if true {
                    panic!("converter exploded");
                }
                Ok(0)
            })
            .await;
        assert_eq!(outcome, Err(TestError::Aborted));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn synchronous_panic_in_generate_leaves_map_usable() {
        let flights: SingleFlight<u8, u8, TestError> = SingleFlight::new();

        let panicked = {
            let flights = flights.clone();
            tokio::spawn(async move {
                flights
                    .obtain(4, || -> std::future::Ready<Result<u8, TestError>> {
                        panic!("bad closure")
                    })
                    .await
            })
        };
        assert!(panicked.await.is_err());
        assert_eq!(flights.in_flight(), 0);

        let retried = tokio::time::timeout(
            Duration::from_secs(5),
            flights.obtain(4, || async { Ok(4) }),
        )
        .await
        .expect("no deadlock");
        assert_eq!(retried, Ok(4));
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_cancel_generation() {
        let flights: SingleFlight<u8, u8, TestError> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let abandoned = {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                flights
                    .obtain(5, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(5)
                    })
                    .await
            })
        };
        while flights.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();

        let joined = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.obtain(5, || async { Ok(99) }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        assert_eq!(joined.await.expect("join"), Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
