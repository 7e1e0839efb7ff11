// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-process FIFO queue.
//
// Wire format, per item:
//   len channel:  <decimal length> '\n'
//   data channel: <length raw bytes>
//
// Producers never touch the pipes directly. `enqueue` encodes the value and
// hands the bytes to a per-process worker thread, which commits frames one at
// a time under the write-side mutex. A single worker per process gives a
// total order of that process's frames; the write-side mutex keeps frames
// from different processes from interleaving.

use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::codec::{Bincode, Codec};
use crate::critical::Critical;
use crate::pipe::TokenPipe;
use crate::scoped_access::ScopedAccess;
use crate::{Error, PipeMutex, PipeSemaphore, Result};

/// Longest accepted length line, excluding the newline. Enough for any
/// `usize` in decimal.
const MAX_HEADER_DIGITS: usize = 20;

/// Construction-time settings for a [`PipeQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Thread name of the background enqueue worker.
    pub worker_name: String,
    /// Largest frame `dequeue` accepts. A bigger length line means the
    /// stream is corrupt and fails with [`Error::Frame`].
    pub max_frame_len: usize,
}

impl QueueConfig {
    pub fn new() -> Self {
        Self {
            worker_name: "pipe-queue-worker".to_owned(),
            max_frame_len: 1 << 30,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The pipes and locks every participant shares.
#[derive(Debug)]
struct Channels {
    count: PipeSemaphore,
    write_side: PipeMutex,
    read_side: PipeMutex,
    len: TokenPipe,
    data: TokenPipe,
}

impl Channels {
    fn new() -> io::Result<Self> {
        Ok(Self {
            count: PipeSemaphore::new(0)?,
            write_side: PipeMutex::new()?,
            read_side: PipeMutex::new()?,
            len: TokenPipe::new()?,
            data: TokenPipe::new()?,
        })
    }

    fn commit(&self, frame: &[u8]) -> Result<()> {
        let _guard = ScopedAccess::new(&self.write_side)?;
        self.count.release()?;
        self.len.write_all(format!("{}\n", frame.len()).as_bytes())?;
        self.data.write_all(frame)?;
        Ok(())
    }

    fn take_frame(&self, non_block: bool, max_len: usize) -> Result<Vec<u8>> {
        let _guard = ScopedAccess::new(&self.read_side)?;
        if non_block {
            if !self.count.try_acquire()? {
                return Err(Error::Empty);
            }
        } else {
            self.count.acquire()?;
        }
        let len = self.read_header(max_len)?;
        let mut frame = vec![0u8; len];
        self.data.read_exact(&mut frame)?;
        Ok(frame)
    }

    fn read_header(&self, max_len: usize) -> Result<usize> {
        let mut line = Vec::with_capacity(MAX_HEADER_DIGITS);
        let mut b = [0u8; 1];
        loop {
            self.len.read_exact(&mut b)?;
            if b[0] == b'\n' {
                break;
            }
            line.push(b[0]);
            if line.len() > MAX_HEADER_DIGITS {
                return Err(Error::Frame(format!(
                    "length line longer than {MAX_HEADER_DIGITS} bytes"
                )));
            }
        }
        parse_header(&line, max_len)
    }
}

fn parse_header(line: &[u8], max_len: usize) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Frame(format!("non-ASCII length line {line:?}")))?;
    if text.is_empty() || !text.bytes().all(|c| c.is_ascii_digit()) {
        return Err(Error::Frame(format!("invalid length line {text:?}")));
    }
    let len: usize = text
        .parse()
        .map_err(|_| Error::Frame(format!("length {text} out of range")))?;
    if len > max_len {
        return Err(Error::Frame(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        )));
    }
    Ok(len)
}

/// Process-local state between producers and the worker.
#[derive(Debug, Default)]
struct Buffer {
    frames: VecDeque<Vec<u8>>,
    /// A frame has been popped but not yet fully written.
    in_flight: bool,
    closed: bool,
    running: bool,
}

#[derive(Debug)]
struct Shared {
    chans: Channels,
    buf: Mutex<Buffer>,
    /// Signalled when frames are pushed or the queue is closed.
    ready: Condvar,
    /// Signalled when the buffer runs dry or the worker exits.
    drained: Condvar,
}

impl Shared {
    fn buf(&self) -> MutexGuard<'_, Buffer> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn worker_loop(shared: &Shared) {
    // Keep process-directed signals away from this thread; it has nothing
    // to cancel.
    let _mask = Critical::enter();
    tracing::debug!(pid = std::process::id(), "queue worker started");
    loop {
        let frame = {
            let mut buf = shared.buf();
            loop {
                if let Some(frame) = buf.frames.pop_front() {
                    buf.in_flight = true;
                    break frame;
                }
                if buf.closed {
                    buf.running = false;
                    shared.drained.notify_all();
                    tracing::debug!(pid = std::process::id(), "queue worker finished");
                    return;
                }
                buf = shared
                    .ready
                    .wait(buf)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let res = shared.chans.commit(&frame);

        let mut buf = shared.buf();
        buf.in_flight = false;
        if let Err(e) = res {
            buf.running = false;
            shared.drained.notify_all();
            tracing::warn!(error = %e, len = frame.len(), "queue worker stopped, frame lost");
            return;
        }
        tracing::trace!(len = frame.len(), "frame committed");
        if buf.frames.is_empty() {
            shared.drained.notify_all();
        }
    }
}

#[derive(Debug)]
struct Worker {
    pid: u32,
    handle: JoinHandle<()>,
}

/// An inter-process FIFO queue of serialized values.
///
/// Create it before forking. `enqueue` returns as soon as the value is
/// encoded and buffered; a background thread moves buffered frames into
/// the pipes, so producers never block on a slow consumer. Before a producer
/// process exits it should `close` the queue and `join_worker` (or `flush`),
/// otherwise buffered frames die with it.
///
/// Do not fork while this process still has frames buffered: they belong
/// to this process's worker and are discarded in the child.
pub struct PipeQueue<T, C = Bincode> {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    codec: C,
    config: QueueConfig,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> PipeQueue<T, Bincode>
where
    Bincode: Codec<T>,
{
    /// Create an empty queue using the default bincode codec.
    pub fn new() -> io::Result<Self> {
        Self::with_codec(Bincode, QueueConfig::default())
    }
}

impl<T, C: Codec<T>> PipeQueue<T, C> {
    /// Create an empty queue with an explicit codec and configuration.
    pub fn with_codec(codec: C, config: QueueConfig) -> io::Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                chans: Channels::new()?,
                buf: Mutex::new(Buffer::default()),
                ready: Condvar::new(),
                drained: Condvar::new(),
            }),
            worker: Mutex::new(None),
            codec,
            config,
            _marker: PhantomData,
        })
    }

    /// Encode `value` and buffer it for the worker. Returns without waiting
    /// for the frame to reach the pipe.
    ///
    /// Fails with [`Error::Closed`] after `close`, and with
    /// [`Error::Serialization`] if the codec rejects the value. Neither
    /// failure touches the buffer.
    pub fn enqueue(&self, value: &T) -> Result<()> {
        if self.shared.buf().closed {
            return Err(Error::Closed);
        }
        let frame = self.codec.encode(value)?;
        self.ensure_worker()?;
        let mut buf = self.shared.buf();
        if buf.closed {
            return Err(Error::Closed);
        }
        buf.frames.push_back(frame);
        self.shared.ready.notify_one();
        Ok(())
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_worker(&self) -> Result<()> {
        let mut slot = self.worker_slot();
        let pid = std::process::id();
        match slot.take() {
            Some(w) if w.pid == pid && !w.handle.is_finished() => {
                *slot = Some(w);
                return Ok(());
            }
            Some(w) if w.pid != pid => self.abandon_inherited(w),
            Some(w) => {
                let _ = w.handle.join();
            }
            None => {}
        }

        self.shared.buf().running = true;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || worker_loop(&shared));
        match spawned {
            Ok(handle) => {
                *slot = Some(Worker { pid, handle });
                Ok(())
            }
            Err(e) => {
                self.shared.buf().running = false;
                Err(e.into())
            }
        }
    }

    // Inherited through fork: the thread only exists in the parent, and so
    // do the frames it was about to write.
    fn abandon_inherited(&self, w: Worker) {
        tracing::warn!(
            parent = w.pid,
            pid = std::process::id(),
            "abandoning queue worker inherited across fork"
        );
        std::mem::forget(w.handle);
        let mut buf = self.shared.buf();
        buf.frames.clear();
        buf.in_flight = false;
        buf.running = false;
        self.shared.drained.notify_all();
    }

    /// Remove and return the oldest item.
    ///
    /// With `non_block == false` this waits until an item is available; a
    /// signal ends the wait with [`Error::Interrupted`]. With
    /// `non_block == true` an empty queue fails with [`Error::Empty`].
    ///
    /// Readers are serialised by the read-side mutex, so a non-blocking
    /// dequeue still waits for a concurrent reader to finish.
    pub fn dequeue(&self, non_block: bool) -> Result<T> {
        let frame = self
            .shared
            .chans
            .take_frame(non_block, self.config.max_frame_len)?;
        self.codec.decode(&frame)
    }

    /// `dequeue(true)`.
    pub fn try_dequeue(&self) -> Result<T> {
        self.dequeue(true)
    }

    /// Number of committed items not yet dequeued, across all processes.
    /// Items still buffered in some producer's worker are not counted.
    pub fn len(&self) -> Result<usize> {
        self.shared.chans.count.value()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Discard every committed item. Returns how many were dropped. Frames
    /// are discarded without being decoded.
    pub fn clear(&self) -> Result<usize> {
        let mut n = 0;
        loop {
            match self
                .shared
                .chans
                .take_frame(true, self.config.max_frame_len)
            {
                Ok(_) => n += 1,
                Err(Error::Empty) => return Ok(n),
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the queue for writing in this process. Buffered frames are
    /// still committed; the worker exits once the buffer is empty.
    pub fn close(&self) {
        let mut buf = self.shared.buf();
        if !buf.closed {
            buf.closed = true;
            tracing::debug!(pending = buf.frames.len(), "queue closed");
        }
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.buf().closed
    }

    /// Wait for the worker to commit every buffered frame and exit.
    ///
    /// Fails with [`Error::NotClosed`] unless `close` was called first.
    /// Frames larger than the pipe buffer are only committed while someone
    /// reads them, so this can block until a consumer makes progress.
    pub fn join_worker(&self) -> Result<()> {
        if !self.is_closed() {
            return Err(Error::NotClosed);
        }
        let Some(w) = self.worker_slot().take() else {
            return Ok(());
        };
        if w.pid != std::process::id() {
            self.abandon_inherited(w);
            return Ok(());
        }
        w.handle
            .join()
            .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::Other, "queue worker panicked")))
    }

    /// Wait until every frame this process has buffered so far is committed
    /// to the pipes. The queue stays open.
    ///
    /// Fails if the worker stopped on an I/O error with frames still
    /// buffered.
    pub fn flush(&self) -> Result<()> {
        {
            let mut slot = self.worker_slot();
            if let Some(w) = slot.take() {
                if w.pid == std::process::id() {
                    *slot = Some(w);
                } else {
                    self.abandon_inherited(w);
                }
            }
        }
        let mut buf = self.shared.buf();
        while !buf.frames.is_empty() || buf.in_flight {
            if !buf.running {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "queue worker stopped with frames pending",
                )));
            }
            buf = self
                .shared
                .drained
                .wait(buf)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }
}

impl<T, C> Drop for PipeQueue<T, C> {
    fn drop(&mut self) {
        // Let the worker drain and exit on its own.
        let mut buf = self.shared.buf();
        buf.closed = true;
        drop(buf);
        self.shared.ready.notify_all();
    }
}
