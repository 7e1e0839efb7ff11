// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-process condition variable built on two token pipes.
// `waiting` holds one byte per registered waiter, `signal` carries one wake
// byte per released waiter.

use std::io;

use crate::critical::Critical;
use crate::pipe::{TokenPipe, Wait};
use crate::scoped_access::Lockable;
use crate::{Error, Result};

/// An inter-process condition variable, always used together with a
/// [`PipeMutex`](crate::PipeMutex) held by the caller.
///
/// A waiter registers itself before it releases the mutex, so a `signal`
/// issued by anyone who acquires the mutex afterwards cannot miss it. Which
/// of several waiters a `signal` wakes is unspecified.
///
/// Spurious wakeups are possible (see [`PipeCondition::wait`]), so waiters
/// should re-check their predicate in a loop.
#[derive(Debug)]
pub struct PipeCondition {
    waiting: TokenPipe,
    signal: TokenPipe,
}

impl PipeCondition {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            waiting: TokenPipe::new()?,
            signal: TokenPipe::new()?,
        })
    }

    /// Release `lock`, wait for a signal, and re-acquire `lock`.
    ///
    /// Fails with [`Error::TypeMismatch`] unless `lock` is a `PipeMutex`,
    /// and with [`Error::NotLocked`] unless the caller holds it.
    ///
    /// If a signal interrupts the wait, the registration is withdrawn when
    /// still possible, the mutex is re-acquired and [`Error::Interrupted`]
    /// is returned. When a `signal` had already claimed the registration,
    /// its wake byte stays behind and wakes a later waiter early.
    pub fn wait<L: Lockable + ?Sized>(&self, lock: &L) -> Result<()> {
        let mtx = lock.as_mutex().ok_or(Error::TypeMismatch)?;
        if !mtx.is_owned() {
            return Err(Error::NotLocked);
        }

        {
            let _crit = Critical::enter()?;
            self.waiting.put(1)?;
            if let Err(e) = mtx.unlock() {
                self.waiting.try_take()?;
                return Err(e);
            }
        }

        let woken = {
            let crit = Critical::enter()?;
            self.signal.take(Wait::Cancellable, &crit)
        };
        if let Err(e) = woken {
            let withdrawn = {
                let _crit = Critical::enter()?;
                self.waiting.try_take()
            };
            mtx.relock()?;
            withdrawn?;
            return Err(e);
        }
        mtx.relock()
    }

    /// Wake one waiter. Returns `false` (with no side effect) if nobody was
    /// waiting.
    pub fn signal(&self) -> Result<bool> {
        let _crit = Critical::enter()?;
        if !self.waiting.try_take()? {
            return Ok(false);
        }
        self.signal.put(1)?;
        Ok(true)
    }

    /// Wake every current waiter. Returns how many were woken; callers that
    /// start waiting afterwards are not affected.
    pub fn broadcast(&self) -> Result<usize> {
        let mut n = 0;
        while self.signal()? {
            n += 1;
        }
        Ok(n)
    }
}
