// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-process mutex built on a single-token pipe.
// The pipe holds exactly one byte while the mutex is free and is empty while
// some (process, thread) holds it.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::critical::Critical;
use crate::pipe::{TokenPipe, Wait};
use crate::scoped_access::{Lockable, ScopedAccess};
use crate::{Error, Result};

/// Identity of the current lock holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner {
    pid: u32,
    thread: ThreadId,
}

impl Owner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            thread: thread::current().id(),
        }
    }
}

/// An inter-process mutex shared with child processes through `fork`.
///
/// Create it before forking; every participant then holds a copy of the same
/// pipe descriptors. Owner bookkeeping is per process: a child that inherits
/// a held mutex sees the parent's identity as owner and gets
/// [`Error::NotOwner`] from `unlock`, so do not fork while holding it.
///
/// Blocked `lock` callers are woken in no particular order.
#[derive(Debug)]
pub struct PipeMutex {
    pipe: TokenPipe,
    owner: Mutex<Option<Owner>>,
}

impl PipeMutex {
    /// Create an unlocked mutex.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            pipe: TokenPipe::with_tokens(1)?,
            owner: Mutex::new(None),
        })
    }

    fn owner(&self) -> MutexGuard<'_, Option<Owner>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the mutex, waiting for it if necessary.
    ///
    /// Fails with [`Error::AlreadyLocked`] if the calling thread already
    /// holds it, and with [`Error::Interrupted`] if a signal ends the wait.
    pub fn lock(&self) -> Result<()> {
        self.lock_with(Wait::Cancellable)
    }

    /// Like `lock`, but signals never end the wait. Used where the mutex
    /// must be held again before returning to the caller.
    pub(crate) fn relock(&self) -> Result<()> {
        self.lock_with(Wait::Uninterruptible)
    }

    /// Lock without cancellation and release on drop. For internal
    /// bookkeeping that must not be cut short by a signal.
    pub(crate) fn hold(&self) -> Result<ScopedAccess<'_, Self>> {
        self.relock()?;
        Ok(ScopedAccess::adopt(self))
    }

    fn lock_with(&self, wait: Wait) -> Result<()> {
        if self.is_owned() {
            return Err(Error::AlreadyLocked);
        }
        let crit = Critical::enter()?;
        self.pipe.take(wait, &crit)?;
        *self.owner() = Some(Owner::current());
        Ok(())
    }

    /// Try to lock without blocking. Returns `Ok(true)` if the lock was
    /// acquired.
    pub fn try_lock(&self) -> Result<bool> {
        let _crit = Critical::enter()?;
        if !self.pipe.try_take()? {
            return Ok(false);
        }
        *self.owner() = Some(Owner::current());
        Ok(true)
    }

    /// Whether any process or thread holds the mutex.
    ///
    /// Probes by taking the token and immediately putting it back, so the
    /// observable lock state never changes. A concurrent `try_lock` in the
    /// tiny window between the two may fail spuriously.
    pub fn is_locked(&self) -> Result<bool> {
        let _crit = Critical::enter()?;
        if self.pipe.try_take()? {
            self.pipe.put(1)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether the calling (process, thread) holds the mutex. No I/O.
    pub fn is_owned(&self) -> bool {
        *self.owner() == Some(Owner::current())
    }

    /// Unlock the mutex, waking one blocked `lock` caller if there is one.
    ///
    /// Fails with [`Error::NotLocked`] if nobody holds it and with
    /// [`Error::NotOwner`] if somebody else does. A failed unlock leaves the
    /// token where it was.
    pub fn unlock(&self) -> Result<()> {
        if !self.is_locked()? {
            return Err(Error::NotLocked);
        }
        let me = Owner::current();
        let _crit = Critical::enter()?;
        let mut owner = self.owner();
        if *owner != Some(me) {
            return Err(Error::NotOwner);
        }
        *owner = None;
        if let Err(e) = self.pipe.put(1) {
            *owner = Some(me);
            return Err(e.into());
        }
        Ok(())
    }

    /// Run `f` with the mutex held. The mutex is released on every exit
    /// path, including a panic in `f`.
    pub fn synchronize<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = ScopedAccess::new(self)?;
        Ok(f())
    }

    /// Release the mutex, sleep for `timeout` (or until the thread is
    /// unparked when `None`), then lock it again.
    ///
    /// With `None` the sleep is a [`thread::park`], which may also return
    /// spuriously; callers waiting for a condition should re-check it. The
    /// mutex is always re-acquired before returning, however the sleep
    /// ended.
    pub fn sleep_scoped(&self, timeout: Option<Duration>) -> Result<()> {
        self.unlock()?;
        match timeout {
            Some(d) => thread::sleep(d),
            None => thread::park(),
        }
        self.relock()
    }
}

impl Lockable for PipeMutex {
    fn lock(&self) -> Result<()> {
        PipeMutex::lock(self)
    }

    fn unlock(&self) -> Result<()> {
        PipeMutex::unlock(self)
    }

    fn as_mutex(&self) -> Option<&PipeMutex> {
        Some(self)
    }
}
