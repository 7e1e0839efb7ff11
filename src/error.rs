// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type shared by every pipe-backed primitive.

use std::io;

/// Errors returned by the pipe-backed primitives.
///
/// All variants except `Io` are caller-recoverable conditions that leave the
/// primitive in a consistent state: a failed `unlock` never releases the
/// token and a failed `enqueue` never touches the buffer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The calling (process, thread) already holds the mutex.
    #[error("mutex is already locked by the current thread")]
    AlreadyLocked,

    /// The mutex is not locked (or, for `wait`, not locked by the caller).
    #[error("mutex is not locked")]
    NotLocked,

    /// The mutex is held, but by another process or thread.
    #[error("mutex is locked by another process or thread")]
    NotOwner,

    /// `PipeCondition::wait` was handed a lock that is not a `PipeMutex`.
    #[error("condition wait requires a PipeMutex")]
    TypeMismatch,

    /// The queue was closed for writing.
    #[error("queue is closed")]
    Closed,

    /// The value could not be encoded by the queue codec.
    #[error("value cannot be serialized: {0}")]
    Serialization(String),

    /// A received frame could not be decoded by the queue codec.
    #[error("frame cannot be deserialized: {0}")]
    Deserialization(String),

    /// Non-blocking dequeue found no item.
    #[error("queue is empty")]
    Empty,

    /// `join_worker` was called before `close`.
    #[error("queue must be closed before joining its worker")]
    NotClosed,

    /// A signal interrupted a blocking wait.
    #[error("blocking wait was interrupted")]
    Interrupted,

    /// The length channel carried something that is not a valid frame header.
    #[error("malformed frame header: {0}")]
    Frame(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
