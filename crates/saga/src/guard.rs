//! In-process serialization of sagas per key.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of keys (users, orders) with a mutation in progress.
#[derive(Debug)]
pub struct InFlight<K> {
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K> Clone for InFlight<K> {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
        }
    }
}

impl<K: Eq + Hash + Copy> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as busy. Returns `None` if it already is.
    ///
    /// The key is released when the returned guard is dropped.
    pub fn try_acquire(&self, key: K) -> Option<InFlightGuard<K>> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        inserted.then(|| InFlightGuard {
            key,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, key: K) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlightGuard<K: Eq + Hash> {
    key: K,
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;

    #[test]
    fn test_second_acquire_is_rejected_until_drop() {
        let in_flight = InFlight::new();
        let order_id = OrderId::new();

        let guard = in_flight.try_acquire(order_id).unwrap();
        assert!(in_flight.is_active(order_id));
        assert!(in_flight.try_acquire(order_id).is_none());
        assert!(in_flight.try_acquire(OrderId::new()).is_some());

        drop(guard);
        assert!(!in_flight.is_active(order_id));
        assert!(in_flight.try_acquire(order_id).is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let in_flight = InFlight::new();
        let other = in_flight.clone();
        let order_id = OrderId::new();

        let _guard = in_flight.try_acquire(order_id).unwrap();
        assert!(other.try_acquire(order_id).is_none());
    }
}
