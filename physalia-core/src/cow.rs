//! Copy-on-write smart pointer used for cheap state snapshots.
//!
//! An MCMC proposal needs two coexisting views of the chain state: the
//! current one and the proposed one. [`CowPtr`] makes cloning a snapshot
//! O(1); the first mutation through a shared handle clones the target.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted handle with clone-on-write mutation.
pub struct CowPtr<T> {
    inner: Arc<T>,
}

impl<T: Clone> CowPtr<T> {
    pub fn new(value: T) -> Self {
        CowPtr {
            inner: Arc::new(value),
        }
    }

    /// Mutable access, cloning the target first if the handle is shared.
    pub fn make_mut(&mut self) -> &mut T {
        Arc::make_mut(&mut self.inner)
    }

    /// True while no other handle points at the same target.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Do two handles share one target?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Exchange targets without copying either.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.inner, &mut other.inner);
    }
}

impl<T> Clone for CowPtr<T> {
    fn clone(&self) -> Self {
        CowPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for CowPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for CowPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}
