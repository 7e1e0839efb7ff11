// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Forked participants. The child is a copy of the caller, so every pipe
// primitive created before `spawn` is shared with it through inherited
// descriptors.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Exit code of a child whose body panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a child process ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub exited: bool,
    pub exit_code: i32,
    pub signaled: bool,
    pub signal: i32,
}

impl WaitResult {
    /// Exited normally with status 0.
    pub fn success(&self) -> bool {
        self.exited && self.exit_code == 0
    }
}

/// Handle to a forked child.
///
/// The child is reaped by the first `join`/`value` that observes its exit;
/// later calls return the cached result.
#[derive(Debug)]
pub struct Process {
    pid: libc::pid_t,
    status: Mutex<Option<WaitResult>>,
}

impl Process {
    /// Fork and run `body` in the child. The child exits with the returned
    /// code, or [`PANIC_EXIT_CODE`] if `body` panics, without running any
    /// destructors or atexit handlers of the parent's state.
    ///
    /// Only the calling thread exists in the child. Locks held by other
    /// threads at the time of the fork stay locked there forever, so fork
    /// while the process is quiet.
    pub fn spawn<F>(body: F) -> io::Result<Self>
    where
        F: FnOnce() -> i32,
    {
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(io::Error::last_os_error());
        }
        if pid == 0 {
            let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(PANIC_EXIT_CODE);
            unsafe { libc::_exit(code) };
        }
        tracing::debug!(child = pid, "forked participant");
        Ok(Self {
            pid,
            status: Mutex::new(None),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Wait for the child to exit. `None` waits forever. Returns `None` if
    /// the timeout elapsed first.
    pub fn join(&self, timeout: Option<Duration>) -> io::Result<Option<WaitResult>> {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = *status {
            return Ok(Some(r));
        }
        let r = match timeout {
            None => Some(self.wait_blocking()?),
            Some(t) => self.wait_polling(t)?,
        };
        *status = r;
        Ok(r)
    }

    /// Wait forever for the exit status.
    pub fn value(&self) -> io::Result<WaitResult> {
        match self.join(None)? {
            Some(r) => Ok(r),
            None => Err(io::Error::new(io::ErrorKind::Other, "child did not exit")),
        }
    }

    /// Send `signal` to the child.
    pub fn kill(&self, signal: libc::c_int) -> io::Result<()> {
        if unsafe { libc::kill(self.pid, signal) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Whether the child has not been reaped and still exists.
    pub fn is_alive(&self) -> bool {
        if self.status.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
            return false;
        }
        unsafe { libc::kill(self.pid, 0) == 0 }
    }

    fn wait_blocking(&self) -> io::Result<WaitResult> {
        loop {
            let mut status: libc::c_int = 0;
            let ret = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if ret == self.pid {
                return Ok(decode_status(status));
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn wait_polling(&self, timeout: Duration) -> io::Result<Option<WaitResult>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut status: libc::c_int = 0;
            let ret = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
            if ret == self.pid {
                return Ok(Some(decode_status(status)));
            }
            if ret == -1 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

fn decode_status(status: libc::c_int) -> WaitResult {
    let mut r = WaitResult::default();
    if libc::WIFEXITED(status) {
        r.exited = true;
        r.exit_code = libc::WEXITSTATUS(status);
    }
    if libc::WIFSIGNALED(status) {
        r.signaled = true;
        r.signal = libc::WTERMSIG(status);
    }
    r
}
