// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-process counting semaphore.
// The token pipe holds one byte per available unit. A private mutex guards
// every inspection or mutation of the pipe, and a private condition variable
// parks acquirers while the count is zero instead of polling.

use std::io;

use crate::critical::Critical;
use crate::pipe::{TokenPipe, Wait};
use crate::scoped_access::{Lockable, ScopedAccess};
use crate::{PipeCondition, PipeMutex, Result};

/// An inter-process counting semaphore.
///
/// `release` may be called more often than `acquire`; the count simply
/// rises. It is bounded only by the token pipe's buffer: at least 64 KiB on
/// Linux, grown at construction to fit a larger initial count. A `release`
/// that would overflow the buffer fails with an `Io` error of kind
/// `WouldBlock` and leaves the count unchanged.
#[derive(Debug)]
pub struct PipeSemaphore {
    pipe: TokenPipe,
    mutex: PipeMutex,
    cond: PipeCondition,
}

impl PipeSemaphore {
    /// Create a semaphore holding `count` units.
    ///
    /// Fails if the token pipe cannot be made large enough for `count`.
    pub fn new(count: usize) -> io::Result<Self> {
        Ok(Self {
            pipe: TokenPipe::with_tokens(count)?,
            mutex: PipeMutex::new()?,
            cond: PipeCondition::new()?,
        })
    }

    // Drain-and-rewrite. Only valid while `self.mutex` is held by the caller;
    // otherwise another participant can observe the pipe half drained.
    fn count_locked(&self) -> Result<usize> {
        let _crit = Critical::enter()?;
        let n = self.pipe.drain()?;
        self.pipe.put(n)?;
        Ok(n)
    }

    /// Current number of available units.
    pub fn value(&self) -> Result<usize> {
        let _guard = self.mutex.hold()?;
        self.count_locked()
    }

    /// Take one unit, waiting while none is available.
    pub fn acquire(&self) -> Result<()> {
        let _guard = self.mutex.hold()?;
        while self.count_locked()? == 0 {
            self.cond.wait(&self.mutex)?;
        }
        // Positive count observed under the mutex: this read cannot block.
        let crit = Critical::enter()?;
        self.pipe.take(Wait::Uninterruptible, &crit)
    }

    /// Take one unit if one is available right now.
    pub fn try_acquire(&self) -> Result<bool> {
        let _guard = self.mutex.hold()?;
        let _crit = Critical::enter()?;
        Ok(self.pipe.try_take()?)
    }

    /// Return one unit and wake one blocked acquirer, if any.
    pub fn release(&self) -> Result<()> {
        let _guard = self.mutex.hold()?;
        let _crit = Critical::enter()?;
        self.pipe.put(1)?;
        self.cond.signal()?;
        Ok(())
    }

    /// Run `f` holding one unit. The unit is returned on every exit path,
    /// including a panic in `f`.
    pub fn synchronize<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = ScopedAccess::new(self)?;
        Ok(f())
    }
}

impl Lockable for PipeSemaphore {
    fn lock(&self) -> Result<()> {
        self.acquire()
    }

    fn unlock(&self) -> Result<()> {
        self.release()
    }
}
