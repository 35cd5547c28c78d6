// Single-flight request coalescing.
// Concurrent calls for the same key share one underlying future.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::trace;

struct Flight<T> {
    id: u64,
    call: Shared<BoxFuture<'static, T>>,
    waiters: usize,
}

type Registry<T> = Arc<Mutex<HashMap<String, Flight<T>>>>;

fn lock<T>(registry: &Registry<T>) -> MutexGuard<'_, HashMap<String, Flight<T>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ensures at most one in-flight call per key.
///
/// The entry for a key is removed when its future completes, before any
/// waiter sees the output, so the next call after completion starts fresh.
/// If every waiter goes away first, the entry is removed and the call is
/// dropped with it.
pub struct RequestCoalescer<T> {
    in_flight: Registry<T>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for RequestCoalescer<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// One waiter's claim on a flight; releasing the last claim abandons it.
struct WaiterGuard<T> {
    registry: Registry<T>,
    key: String,
    id: u64,
}

impl<T> Drop for WaiterGuard<T> {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.registry);
        let abandoned = match in_flight.get_mut(&self.key) {
            Some(flight) if flight.id == self.id => {
                flight.waiters -= 1;
                flight.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            trace!(key = %self.key, "in-flight request abandoned");
            in_flight.remove(&self.key);
        }
    }
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight call for `key`, or start one with `factory`.
    pub async fn coalesce<F, Fut>(&self, key: &str, factory: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (call, id) = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get_mut(key) {
                Some(flight) => {
                    trace!(key, "joining in-flight request");
                    flight.waiters += 1;
                    (flight.call.clone(), flight.id)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    let call = factory();
                    let call = async move {
                        let output = call.await;
                        let mut in_flight = lock(&registry);
                        if in_flight.get(&owned_key).is_some_and(|f| f.id == id) {
                            in_flight.remove(&owned_key);
                        }
                        output
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        key.to_string(),
                        Flight {
                            id,
                            call: call.clone(),
                            waiters: 1,
                        },
                    );
                    (call, id)
                }
            }
        };

        let _guard = WaiterGuard {
            registry: Arc::clone(&self.in_flight),
            key: key.to_string(),
            id,
        };
        call.await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}
