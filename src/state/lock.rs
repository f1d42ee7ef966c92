// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mutual-exclusion registry keyed by tenant namespace.
//!
//! [`NamedLocks`] is a set of held names with non-blocking acquisition. It gives no
//! fairness or ordering guarantee: a caller that loses should back off (with
//! jitter) and try again instead of waiting, so that one busy tenant never stalls
//! work for others.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Concurrent set of named locks with try-acquire semantics.
#[derive(Debug, Default)]
pub struct NamedLocks {
    held: Mutex<HashSet<String>>,
}

impl NamedLocks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked mid-call.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take `key` if nobody holds it. Never blocks.
    ///
    /// Returns `true` if the key was free and is now held by the caller.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.held().insert(key.to_string())
    }

    /// Give `key` back.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not held; releasing a lock twice is a programming error.
    pub fn release(&self, key: &str) {
        let removed = self.held().remove(key);
        assert!(removed, "release of lock {key:?} which is not held");
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.held().contains(key)
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held().len()
    }

    /// Whether no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held().is_empty()
    }

    /// Take `key` and return a guard that releases it on drop.
    #[must_use]
    pub fn try_lock(self: &Arc<Self>, key: &str) -> Option<NamedLockGuard> {
        self.try_acquire(key).then(|| NamedLockGuard {
            locks: Arc::clone(self),
            key: key.to_string(),
        })
    }
}

/// Holds a key of a [`NamedLocks`] registry until dropped.
#[derive(Debug)]
pub struct NamedLockGuard {
    locks: Arc<NamedLocks>,
    key: String,
}

impl NamedLockGuard {
    /// The held key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod lock_tests;
