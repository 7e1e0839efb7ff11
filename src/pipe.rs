// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Token pipe: an anonymous (or named) pipe used as a blockable pool of
// one-byte tokens, plus the stream helpers the queue uses for framing.
//
// Both ends are opened O_NONBLOCK. Non-blocking mode is a property of the
// open file description, which every forked participant shares, so it cannot
// be toggled per call. A "blocking" read is therefore a non-blocking read
// that falls back to poll(2) on EAGAIN.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::Path;

use crate::critical::Critical;
use crate::{Error, Result};

/// Byte written for every token. Any value works; readers never inspect it.
const TOKEN: u8 = b'1';

const CHUNK: usize = 512;

/// How a blocking wait reacts to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// `EINTR` ends the wait with [`Error::Interrupted`].
    Cancellable,
    /// `EINTR` is retried.
    Uninterruptible,
}

/// A unidirectional byte channel whose descriptors are inherited across
/// `fork`. Closing happens when the last handle in a process is dropped.
#[derive(Debug)]
pub struct TokenPipe {
    rd: OwnedFd,
    wr: OwnedFd,
}

impl TokenPipe {
    /// Create an anonymous pipe.
    pub fn new() -> io::Result<Self> {
        let mut fds = [-1 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // Own both ends first so that an fcntl failure below closes them.
        let (rd, wr) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [rd.as_raw_fd(), wr.as_raw_fd()] {
            set_flags(fd)?;
        }
        Ok(Self { rd, wr })
    }

    /// Open a named pipe (FIFO) at `path` for both reading and writing.
    ///
    /// When `create` is true and nothing exists at `path`, the FIFO is
    /// created with mode 0600. An existing path that is not a FIFO is
    /// rejected with `InvalidInput`.
    pub fn named(path: impl AsRef<Path>, create: bool) -> io::Result<Self> {
        let path = path.as_ref();
        if create && !path.exists() {
            let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EEXIST) {
                    return Err(err);
                }
            }
        }
        if !std::fs::metadata(path)?.file_type().is_fifo() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a named pipe", path.display()),
            ));
        }
        // O_RDWR on a FIFO never blocks in open(2) on Linux or macOS.
        let open = || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
        };
        Ok(Self {
            rd: OwnedFd::from(open()?),
            wr: OwnedFd::from(open()?),
        })
    }

    /// Create a pipe pre-loaded with `count` tokens. The pipe is grown
    /// first when `count` exceeds its default capacity.
    pub fn with_tokens(count: usize) -> io::Result<Self> {
        let pipe = Self::new()?;
        pipe.reserve(count)?;
        pipe.put(count)?;
        Ok(pipe)
    }

    /// Make room for at least `count` buffered bytes.
    ///
    /// On Linux this grows the pipe with `F_SETPIPE_SZ`, which fails with
    /// `PermissionDenied` beyond `/proc/sys/fs/pipe-max-size` for
    /// unprivileged processes. Elsewhere the capacity is fixed and a later
    /// `put` reports overflow instead.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn reserve(&self, count: usize) -> io::Result<()> {
        let fd = self.wr.as_raw_fd();
        let cur = cvt(unsafe { libc::fcntl(fd, libc::F_GETPIPE_SZ) })?;
        if count <= cur as usize {
            return Ok(());
        }
        let want = libc::c_int::try_from(count).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{count} tokens exceed the largest pipe size"),
            )
        })?;
        cvt(unsafe { libc::fcntl(fd, libc::F_SETPIPE_SZ, want) })?;
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn reserve(&self, _count: usize) -> io::Result<()> {
        Ok(())
    }

    /// Take one token, waiting for it if none is available.
    ///
    /// The read itself runs under `crit`; only the wait for readability
    /// runs with the caller's signal mask, so a signal can end the wait but
    /// can never land between "token read" and whatever bookkeeping the
    /// caller does next inside the same section.
    pub(crate) fn take(&self, wait: Wait, crit: &Critical) -> Result<()> {
        while !self.try_take()? {
            poll_fd(self.rd.as_raw_fd(), libc::POLLIN, wait, Some(crit))?;
        }
        Ok(())
    }

    /// Take one token if one is available right now.
    pub fn try_take(&self) -> io::Result<bool> {
        let mut b = [0u8; 1];
        Ok(self.try_read(&mut b)?.is_some())
    }

    /// Return `count` tokens to the pipe without waiting.
    ///
    /// Fails with `WouldBlock` once the pipe buffer is full; the tokens
    /// written before that stay in the pipe. Nobody drains a token pipe
    /// while its owner is writing to it, so waiting for room would never
    /// end.
    pub fn put(&self, count: usize) -> io::Result<()> {
        let chunk = [TOKEN; CHUNK];
        let mut left = count;
        while left > 0 {
            let n = left.min(CHUNK);
            let w = unsafe {
                libc::write(
                    self.wr.as_raw_fd(),
                    chunk.as_ptr() as *const libc::c_void,
                    n,
                )
            };
            if w >= 0 {
                left -= w as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        format!("token pipe is full, {left} of {count} tokens not written"),
                    ));
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err),
            }
        }
        Ok(())
    }

    /// Read every available token and return how many there were.
    /// The tokens are consumed; callers that only want to count must `put`
    /// them back.
    pub fn drain(&self) -> io::Result<usize> {
        let mut buf = [0u8; CHUNK];
        let mut total = 0;
        while let Some(n) = self.try_read(&mut buf)? {
            total += n;
        }
        Ok(total)
    }

    /// Non-blocking read. `Ok(None)` means the pipe is currently empty.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            let n = unsafe {
                libc::read(
                    self.rd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n > 0 {
                return Ok(Some(n as usize));
            }
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "every write end of the pipe is closed",
                ));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(None),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }

    /// Read at least one byte, waiting for data when the pipe is empty.
    pub(crate) fn read_some(&self, buf: &mut [u8], wait: Wait) -> Result<usize> {
        loop {
            if let Some(n) = self.try_read(buf)? {
                return Ok(n);
            }
            poll_fd(self.rd.as_raw_fd(), libc::POLLIN, wait, None)?;
        }
    }

    /// Fill `buf` completely. Never cancelled: once a frame is being read,
    /// stopping half way would desynchronise the stream.
    pub fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut off = 0;
        while off < buf.len() {
            off += self.read_some(&mut buf[off..], Wait::Uninterruptible)?;
        }
        Ok(())
    }

    /// Write all of `bytes`, waiting for room when the pipe buffer is full.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut off = 0;
        while off < bytes.len() {
            let rest = &bytes[off..];
            let n = unsafe {
                libc::write(
                    self.wr.as_raw_fd(),
                    rest.as_ptr() as *const libc::c_void,
                    rest.len(),
                )
            };
            if n >= 0 {
                off += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    poll_fd(self.wr.as_raw_fd(), libc::POLLOUT, Wait::Uninterruptible, None)
                        .map_err(into_io)?;
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err),
            }
        }
        Ok(())
    }
}

fn set_flags(fd: RawFd) -> io::Result<()> {
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl == -1 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
        let fdfl = libc::fcntl(fd, libc::F_GETFD);
        if fdfl == -1 || libc::fcntl(fd, libc::F_SETFD, fdfl | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Sleep until `fd` is ready for `events`. poll(2) is never restarted by
/// SA_RESTART, so any handled signal surfaces here as EINTR.
///
/// Inside a critical section the caller's original mask is installed for
/// the duration of the wait.
fn poll_fd(
    fd: RawFd,
    events: libc::c_short,
    wait: Wait,
    crit: Option<&Critical>,
) -> Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    loop {
        let r = match crit {
            None => cvt(unsafe { libc::poll(&mut pfd, 1, -1) }),
            Some(crit) => masked_poll(&mut pfd, crit),
        };
        match r {
            Ok(_) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                if wait == Wait::Cancellable {
                    return Err(Error::Interrupted);
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn cvt(r: libc::c_int) -> io::Result<libc::c_int> {
    if r < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(r)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn masked_poll(pfd: &mut libc::pollfd, crit: &Critical) -> io::Result<libc::c_int> {
    cvt(unsafe { libc::ppoll(pfd, 1, std::ptr::null(), crit.prev_mask()) })
}

// No ppoll: swap the mask by hand. A signal that was already pending when
// the section started is delivered before the poll instead of ending it.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn masked_poll(pfd: &mut libc::pollfd, crit: &Critical) -> io::Result<libc::c_int> {
    unsafe {
        let mut all: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut all);
        libc::pthread_sigmask(libc::SIG_SETMASK, crit.prev_mask(), std::ptr::null_mut());
        let r = cvt(libc::poll(pfd, 1, -1));
        libc::pthread_sigmask(libc::SIG_BLOCK, &all, std::ptr::null_mut());
        r
    }
}

fn into_io(e: Error) -> io::Error {
    match e {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
