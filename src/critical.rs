// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Non-cancellable sections.
// Blocks every maskable signal on the calling thread for the lifetime of the
// guard so that no handler can run between "token moved" and "bookkeeping
// updated". Pending signals are delivered as soon as the guard drops.

use std::io;
use std::marker::PhantomData;

/// RAII signal mask. Restores the previous thread mask on drop.
///
/// Nesting is fine: the inner guard saves the already-blocked mask and
/// restores exactly that, the outer guard restores the caller's mask.
pub(crate) struct Critical {
    prev: libc::sigset_t,
    // sigmasks are per thread
    _not_send: PhantomData<*const ()>,
}

impl Critical {
    pub(crate) fn enter() -> io::Result<Self> {
        unsafe {
            let mut all: libc::sigset_t = std::mem::zeroed();
            let mut prev: libc::sigset_t = std::mem::zeroed();
            libc::sigfillset(&mut all);
            let eno = libc::pthread_sigmask(libc::SIG_BLOCK, &all, &mut prev);
            if eno != 0 {
                return Err(io::Error::from_raw_os_error(eno));
            }
            Ok(Self {
                prev,
                _not_send: PhantomData,
            })
        }
    }
}

impl Drop for Critical {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.prev, std::ptr::null_mut());
        }
    }
}

impl Critical {
    /// The mask that was in effect before this section was entered. Waits
    /// inside the section install it so they stay interruptible.
    pub(crate) fn prev_mask(&self) -> &libc::sigset_t {
        &self.prev
    }
}
