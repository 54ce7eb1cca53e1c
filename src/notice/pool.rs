//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                          | Key Methods              |
// |---------------|------------------------------------------------------|--------------------------|
// | Poolable      | Objects that can be blanked before reuse             | reset                    |
// | ObjectPool    | Bounded store of idle reusable instances             | obtain_with, release     |
//--------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// An object that can be returned to a pool and reused.
pub trait Poolable {
    /// Restores the object to a blank state.
    fn reset(&mut self);
}

/// Bounded pool of reusable instances.
///
/// `max` bounds the number of *idle* instances kept around, not the number of live ones:
/// [`obtain_with`](Self::obtain_with) always succeeds, building a fresh instance when the pool is
/// empty. A pool created with `max == 0` never retains anything.
///
/// The idle queue is a bounded crossbeam channel, so concurrent `obtain`/`release` calls never
/// hand the same instance to two callers.
pub struct ObjectPool<T> {
    max: usize,
    idle: Option<(Sender<T>, Receiver<T>)>,
    peak: AtomicUsize,
}

impl<T: Poolable> ObjectPool<T> {
    /// Creates a pool retaining at most `max` idle instances.
    pub fn new(max: usize) -> Self {
        let idle = (max > 0).then(|| bounded(max));
        Self {
            max,
            idle,
            peak: AtomicUsize::new(0),
        }
    }

    /// Takes an idle instance if one is available.
    pub fn poll(&self) -> Option<T> {
        self.idle.as_ref().and_then(|(_, rx)| rx.try_recv().ok())
    }

    /// Takes an idle instance, or builds one with `factory`.
    pub fn obtain_with(&self, factory: impl FnOnce() -> T) -> T {
        self.poll().unwrap_or_else(factory)
    }

    /// Takes an idle instance, or tries to build one with `factory`.
    pub fn try_obtain_with<E>(&self, factory: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        match self.poll() {
            Some(object) => Ok(object),
            None => factory(),
        }
    }

    /// Resets `object` and keeps it for reuse if the pool has room, otherwise drops it.
    ///
    /// Returns `true` when the instance was retained.
    pub fn release(&self, mut object: T) -> bool {
        let Some((tx, _)) = &self.idle else {
            return false;
        };
        object.reset();
        match tx.try_send(object) {
            Ok(()) => {
                self.peak.fetch_max(tx.len(), Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drops every idle instance.
    pub fn clear(&self) {
        if let Some((_, rx)) = &self.idle {
            while rx.try_recv().is_ok() {}
        }
    }

    /// Number of idle instances currently retained.
    pub fn idle_count(&self) -> usize {
        self.idle.as_ref().map_or(0, |(_, rx)| rx.len())
    }

    /// Highest idle count observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Maximum number of idle instances retained.
    pub fn max(&self) -> usize {
        self.max
    }
}
