//! Duplicate call suppression
//!
//! [`Singleflight::run`] runs at most one loader per key at a time. Callers
//! arriving while a load is in flight await the same shared result. The load
//! runs on its own task, so a caller that stops waiting does not cancel it
//! for the others. Once it completes the key is forgotten and the next call
//! starts fresh.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::trace;

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type InflightMap<K, V, E> = HashMap<K, (u64, SharedLoad<V, E>)>;

pub struct Singleflight<K, V, E> {
    inflight: Arc<Mutex<InflightMap<K, V, E>>>,
    next_id: AtomicU64,
}

impl<K, V, E> Default for Singleflight<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Singleflight<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with a load in flight
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Run `loader` for `key` unless a load for it is already in flight, in
    /// which case join that load. `loader` is only called by the leader.
    pub async fn run<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some((_, shared)) => {
                    trace!("Joining in-flight load");
                    shared.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let load = tokio::spawn(loader());
                    let map = Arc::clone(&self.inflight);
                    let owned_key = key.clone();

                    // The key is removed by the load's own task so it is
                    // forgotten even if every caller has stopped waiting.
                    // The removal blocks on this lock until the insert below.
                    let driver = tokio::spawn(async move {
                        let result = load.await.unwrap_or_else(|e| Err(E::from(e)));
                        let mut inflight = map.lock();
                        if inflight.get(&owned_key).map(|(current, _)| *current) == Some(id) {
                            inflight.remove(&owned_key);
                        }
                        result
                    });

                    let shared = driver
                        .map(|joined| joined.unwrap_or_else(|e| Err(E::from(e))))
                        .boxed()
                        .shared();
                    inflight.insert(key, (id, shared.clone()));
                    shared
                }
            }
        };
        shared.await
    }
}
