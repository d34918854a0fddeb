//! Object pools with reset-on-release recycling
//!
//! A [`ResourcePool`] hands out owned values, so an object on loan can never
//! be handed out a second time. Returning an object always calls
//! [`Poolable::reset`] before it goes back on the free list.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

/// Objects that can be recycled through a [`ResourcePool`]
pub trait Poolable: Send {
    /// Clear every piece of state left by the previous borrower
    fn reset(&mut self);
}

impl<T: Poolable + ?Sized> Poolable for Box<T> {
    fn reset(&mut self) {
        (**self).reset();
    }
}

/// Pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool reached its hard limit
    #[error("Pool {pool} exhausted: {limit} objects on loan")]
    Exhausted { pool: String, limit: usize },
}

impl PoolError {
    pub fn exhausted(pool: impl Into<String>, limit: usize) -> Self {
        Self::Exhausted { pool: pool.into(), limit }
    }
}

/// Snapshot of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub outstanding: usize,
    pub created: usize,
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A growable free list of reusable objects
pub struct ResourcePool<T: Poolable> {
    name: String,
    free: Mutex<Vec<T>>,
    factory: Factory<T>,
    max: Option<usize>,
    created: AtomicUsize,
    outstanding: AtomicUsize,
}

impl<T: Poolable> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .field("max", &self.max)
            .finish()
    }
}

impl<T: Poolable> ResourcePool<T> {
    /// Create a pool pre-populated with `initial` objects. `max` caps the
    /// number of objects that may exist at once.
    pub fn new<F>(name: impl Into<String>, initial: usize, max: Option<usize>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let initial = max.map_or(initial, |max| initial.min(max));
        let free: Vec<T> = (0..initial).map(|_| factory()).collect();
        let pool = Self {
            name: name.into(),
            free: Mutex::new(free),
            factory: Box::new(factory),
            max,
            created: AtomicUsize::new(initial),
            outstanding: AtomicUsize::new(0),
        };
        debug!(pool = %pool.name, initial, ?max, "resource pool created");
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow an object, creating one if the free list is empty
    pub fn acquire(&self) -> Result<T, PoolError> {
        if let Some(object) = self.free.lock().pop() {
            self.outstanding.fetch_add(1, Ordering::AcqRel);
            trace!(pool = %self.name, "object borrowed from free list");
            return Ok(object);
        }

        if let Some(max) = self.max {
            let reserved = self
                .created
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                    (created < max).then_some(created + 1)
                });
            if reserved.is_err() {
                return Err(PoolError::exhausted(self.name.clone(), max));
            }
        } else {
            self.created.fetch_add(1, Ordering::AcqRel);
        }

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        trace!(pool = %self.name, "pool grown on demand");
        Ok((self.factory)())
    }

    /// Return an object. It is reset before it becomes available again.
    pub fn release(&self, mut object: T) {
        object.reset();
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().push(object);
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available(),
            outstanding: self.outstanding(),
            created: self.created.load(Ordering::Acquire),
        }
    }

    /// Drop idle objects until at most `keep` remain on the free list
    pub fn shrink_to(&self, keep: usize) -> usize {
        let mut free = self.free.lock();
        let excess = free.len().saturating_sub(keep);
        free.truncate(keep);
        self.created.fetch_sub(excess, Ordering::AcqRel);
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Slot {
        id: usize,
        dirty: bool,
    }

    impl Poolable for Slot {
        fn reset(&mut self) {
            self.dirty = false;
        }
    }

    fn pool(initial: usize, max: Option<usize>) -> ResourcePool<Slot> {
        let next = Arc::new(AtomicUsize::new(0));
        ResourcePool::new("slots", initial, max, move || Slot {
            id: next.fetch_add(1, Ordering::SeqCst),
            dirty: false,
        })
    }

    #[test]
    fn test_prepopulated_and_grows() {
        let pool = pool(2, None);
        assert_eq!(pool.available(), 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(pool.stats(), PoolStats { available: 0, outstanding: 3, created: 3 });
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
    }

    #[test]
    fn test_release_resets_object() {
        let pool = pool(1, None);
        let mut slot = pool.acquire().unwrap();
        slot.dirty = true;
        let id = slot.id;
        pool.release(slot);

        let again = pool.acquire().unwrap();
        assert_eq!(again.id, id);
        assert!(!again.dirty);
    }

    #[test]
    fn test_hard_limit() {
        let pool = pool(0, Some(1));
        let held = pool.acquire().unwrap();
        assert_eq!(
            pool.acquire().unwrap_err(),
            PoolError::exhausted("slots", 1)
        );
        pool.release(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_shrink() {
        let pool = pool(4, None);
        assert_eq!(pool.shrink_to(1), 3);
        assert_eq!(pool.stats(), PoolStats { available: 1, outstanding: 0, created: 1 });
    }
}
