// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard that holds a pipe-backed lock for the lifetime of the access.

use crate::{PipeMutex, Result};

/// Something that can be held and released: a [`PipeMutex`] or a
/// [`PipeSemaphore`](crate::PipeSemaphore) used as a lock.
pub trait Lockable {
    /// Acquire, blocking if needed.
    fn lock(&self) -> Result<()>;

    /// Release.
    fn unlock(&self) -> Result<()>;

    /// The underlying mutex, for primitives that need a real `PipeMutex`.
    fn as_mutex(&self) -> Option<&PipeMutex> {
        None
    }
}

/// RAII guard: locks on construction, unlocks on drop.
///
/// Unlock errors on drop are ignored. In particular, if the guarded code
/// already unlocked a mutex itself, the drop is a no-op.
pub struct ScopedAccess<'a, L: Lockable + ?Sized> {
    lock: &'a L,
}

impl<'a, L: Lockable + ?Sized> ScopedAccess<'a, L> {
    /// Create a new scoped access guard. Locks `lock` immediately.
    pub fn new(lock: &'a L) -> Result<Self> {
        lock.lock()?;
        Ok(Self { lock })
    }

    /// Wrap a lock the caller already holds. It is unlocked on drop.
    pub(crate) fn adopt(lock: &'a L) -> Self {
        Self { lock }
    }
}

impl<'a, L: Lockable + ?Sized> Drop for ScopedAccess<'a, L> {
    fn drop(&mut self) {
        let _ = self.lock.unlock();
    }
}
