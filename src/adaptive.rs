//! DynamicConfig handles for live-updatable admission settings.
//!
//! Reads go through `ArcSwap`, so the hot path never takes a lock to see the
//! current policy table or allow/deny lists.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// `DynamicConfig<T>` gives cheap reads and controlled updates for shared config.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    /// Create a new `DynamicConfig` with the given initial value.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Update via closure. Concurrent updaters are serialised by `rcu`, so no
    /// update is lost.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> T,
    {
        self.inner.rcu(|cur| Arc::new(f(cur)));
    }
}
