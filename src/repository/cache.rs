//! Coalescing LRU cache for in-flight and resolved computations
//!
//! Each key maps to a shared cell. The first requester runs the computation;
//! concurrent requesters for the same key wait on the same cell and observe
//! the same value. When a computation fails, the next requester already
//! waiting on the cell takes over; if nobody is waiting the entry is
//! forgotten so a later request starts over.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::core::types::Result;

struct CacheState<K, V> {
    entries: HashMap<K, Arc<OnceCell<V>>>,
    /// Resolution order: oldest first, newest last
    access_order: Vec<K>,
}

/// Bounded request cache
///
/// When the cache grows past `max_entries` the least recently resolved entry
/// nobody is waiting on is evicted. In-flight entries are never evicted, so
/// the cache may temporarily hold more than `max_entries`.
pub struct RequestCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    max_entries: usize,
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(max_entries),
                access_order: Vec::with_capacity(max_entries),
            }),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        // Every critical section leaves the state consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the value for `key`, running `init` if nobody has produced or
    /// is producing it yet.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, init: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = {
            let mut state = self.lock();
            Arc::clone(state.entries.entry(key.clone()).or_default())
        };

        match cell.get_or_try_init(init).await {
            Ok(value) => {
                let value = value.clone();
                self.mark_resolved(&key);
                drop(cell);
                self.evict_overflow();
                Ok(value)
            }
            Err(e) => {
                self.forget_failed(&key, &cell);
                Err(e)
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of entries, in-flight ones included
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every resolved entry. In-flight computations are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.retain(|_, cell| !cell.initialized());
        let CacheState { entries, access_order } = &mut *state;
        access_order.retain(|k| entries.contains_key(k));
    }

    /// Record `key` as resolved. Every requester that sees the value calls
    /// this; only the first one enters it in the resolution order.
    fn mark_resolved(&self, key: &K) {
        let mut state = self.lock();
        if state.entries.contains_key(key) && !state.access_order.contains(key) {
            state.access_order.push(key.clone());
        }
    }

    /// Drop the entry of a failed computation unless another requester still
    /// holds the cell. A holder other than the map and `cell` itself either
    /// retries the computation or leaves an empty cell the next request
    /// retries.
    fn forget_failed(&self, key: &K, cell: &Arc<OnceCell<V>>) {
        let mut state = self.lock();
        let abandoned = state.entries.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if abandoned {
            state.entries.remove(key);
        }
    }

    fn evict_overflow(&self) {
        let mut state = self.lock();
        while state.entries.len() > self.max_entries {
            let CacheState { entries, access_order } = &mut *state;
            let victim = access_order.iter().position(|k| {
                entries
                    .get(k)
                    .is_some_and(|cell| cell.initialized() && Arc::strong_count(cell) == 1)
            });
            let Some(pos) = victim else { break };
            let key = access_order.remove(pos);
            entries.remove(&key);
            log::trace!("Evicted {:?} from request cache", key);
        }
    }
}
