//! RAII-based root reference management for the garbage collector.
//!
//! [`GcRootGuard<T>`] wraps a [`Gc<T>`] in an [`Arc`] so the root it
//! represents can be shared across scopes/threads by cloning the guard
//! cheaply, with the underlying root slot unregistered only once the last
//! clone is dropped — the common "hold this alive for the scope" case that
//! plain `Gc::clone` (which registers a brand new, independent root every
//! time) does not address directly.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use crate::gc::Gc;

/// A cloneable, ref-counted handle to a single GC root.
///
/// Cloning a `GcRootGuard` is cheap (an `Arc` bump) and shares the same
/// underlying root slot; [`GcRootGuard::clone_gc`] instead produces an
/// independent `Gc<T>` with its own root slot, for callers that need a
/// plain handle decoupled from this guard's lifetime.
pub struct GcRootGuard<T> {
    root: Arc<Gc<T>>,
}

impl<T> GcRootGuard<T> {
    /// Wraps an existing root `Gc<T>` so it can be shared by cloning this
    /// guard instead of registering a new root per clone.
    #[must_use]
    pub fn new(root: Gc<T>) -> Self {
        Self { root: Arc::new(root) }
    }

    /// Returns a clone of the underlying `Gc<T>`, registering a new,
    /// independent root slot that keeps the value alive on its own,
    /// regardless of this guard's lifetime.
    #[must_use]
    pub fn clone_gc(&self) -> Gc<T> {
        (*self.root).clone()
    }
}

impl<T> Clone for GcRootGuard<T> {
    fn clone(&self) -> Self {
        Self { root: Arc::clone(&self.root) }
    }
}

impl<T> Deref for GcRootGuard<T> {
    type Target = Gc<T>;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl<T> From<Gc<T>> for GcRootGuard<T> {
    fn from(root: Gc<T>) -> Self {
        Self::new(root)
    }
}

impl<T: PartialEq> PartialEq for GcRootGuard<T> {
    fn eq(&self, other: &Self) -> bool {
        **self.root == **other.root
    }
}

impl<T: Eq> Eq for GcRootGuard<T> {}

impl<T: Hash> Hash for GcRootGuard<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self.root).hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for GcRootGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self.root, f)
    }
}

impl<T: fmt::Display> fmt::Display for GcRootGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self.root, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_derefs_to_the_underlying_value() {
        let guard = GcRootGuard::new(Gc::new(42));
        assert_eq!(**guard, 42);
    }

    #[test]
    fn clone_shares_the_same_root_slot() {
        let guard = GcRootGuard::new(Gc::new(42));
        let guard2 = guard.clone();
        assert!(Gc::ptr_eq(&guard, &guard2));
    }

    #[test]
    fn clone_gc_produces_an_independent_root() {
        let guard = GcRootGuard::new(Gc::new(42));
        let independent = guard.clone_gc();
        assert!(Gc::ptr_eq(&guard, &independent));
        drop(guard);
        assert_eq!(*independent, 42);
    }
}
