use ahash::AHashMap as HashMap;
use mesh_policy_core::{destination::ConnectionPool, http_route::Destination, RouteError};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use tracing::debug;

/// Bounds the number of requests in flight to each destination.
#[derive(Debug, Default)]
pub struct PoolLimiter {
    in_flight: RwLock<HashMap<Destination, Arc<AtomicU32>>>,
}

/// Holds a slot in a destination's pool until dropped.
#[derive(Debug)]
#[must_use = "the slot is released when the permit is dropped"]
pub struct Permit {
    in_flight: Option<Arc<AtomicU32>>,
}

// === impl PoolLimiter ===

impl PoolLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a slot for a request to `dst`, failing immediately if the pool is full.
    pub fn try_acquire(
        &self,
        dst: &Destination,
        pool: Option<&ConnectionPool>,
    ) -> Result<Permit, RouteError> {
        let limit = match pool.and_then(ConnectionPool::max_in_flight) {
            Some(limit) => limit,
            None => return Ok(Permit { in_flight: None }),
        };

        let counter = self.counter(dst);
        let acquired = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < limit).then_some(n + 1)
        });
        match acquired {
            Ok(_) => Ok(Permit {
                in_flight: Some(counter),
            }),
            Err(n) => {
                debug!(destination = %dst, in_flight = n, limit, "pool overflow");
                Err(RouteError::Overflow {
                    destination: dst.to_string(),
                })
            }
        }
    }

    /// The number of requests currently in flight to `dst`.
    pub fn in_flight(&self, dst: &Destination) -> u32 {
        self.in_flight
            .read()
            .get(dst)
            .map_or(0, |n| n.load(Ordering::Acquire))
    }

    /// Discards idle counters for destinations that are no longer routed to.
    pub fn retain(&self, mut keep: impl FnMut(&Destination) -> bool) {
        self.in_flight
            .write()
            .retain(|dst, n| keep(dst) || n.load(Ordering::Acquire) > 0);
    }

    fn counter(&self, dst: &Destination) -> Arc<AtomicU32> {
        if let Some(counter) = self.in_flight.read().get(dst) {
            return counter.clone();
        }
        self.in_flight
            .write()
            .entry(dst.clone())
            .or_default()
            .clone()
    }
}

// === impl Permit ===

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_requests_in_flight() {
        let limiter = PoolLimiter::new();
        let dst = Destination::new("ratings.bookinfo.svc.cluster.local");
        let pool = ConnectionPool {
            max_requests: Some(2),
            ..Default::default()
        };

        let a = limiter.try_acquire(&dst, Some(&pool)).expect("slot available");
        let b = limiter.try_acquire(&dst, Some(&pool)).expect("slot available");
        assert_eq!(limiter.in_flight(&dst), 2);
        let err = limiter
            .try_acquire(&dst, Some(&pool))
            .expect_err("pool is full");
        assert_eq!(err.reason(), "overflow");

        // Other destinations have their own pools.
        let other = Destination::new("ratings.bookinfo.svc.cluster.local").with_subset("v2");
        let _c = limiter.try_acquire(&other, Some(&pool)).expect("slot available");

        drop(a);
        assert_eq!(limiter.in_flight(&dst), 1);
        let _d = limiter.try_acquire(&dst, Some(&pool)).expect("slot released");
        drop(b);
    }

    #[test]
    fn unlimited_without_a_pool() {
        let limiter = PoolLimiter::new();
        let dst = Destination::new("ratings.bookinfo.svc.cluster.local");
        let permits = (0..100)
            .map(|_| limiter.try_acquire(&dst, None).expect("unlimited"))
            .collect::<Vec<_>>();
        assert_eq!(permits.len(), 100);
        assert_eq!(limiter.in_flight(&dst), 0);
    }

    #[test]
    fn retains_busy_counters() {
        let limiter = PoolLimiter::new();
        let pool = ConnectionPool {
            max_requests: Some(1),
            ..Default::default()
        };
        let busy = Destination::new("busy.example.com");
        let idle = Destination::new("idle.example.com");
        let _permit = limiter.try_acquire(&busy, Some(&pool)).unwrap();
        drop(limiter.try_acquire(&idle, Some(&pool)).unwrap());

        limiter.retain(|_| false);
        assert_eq!(limiter.in_flight(&busy), 1);
        assert!(limiter.try_acquire(&busy, Some(&pool)).is_err());
    }
}
