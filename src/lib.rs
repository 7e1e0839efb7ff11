// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-process mutex, condition variable, counting semaphore and message
// queue for process trees created with fork. Every primitive is built on
// anonymous pipes only: a byte in a pipe is a token, a blocking read is the
// place a waiter sleeps.

mod critical;

mod error;
pub use error::{Error, Result};

pub mod pipe;
pub use pipe::TokenPipe;

mod scoped_access;
pub use scoped_access::{Lockable, ScopedAccess};

mod mutex;
pub use mutex::PipeMutex;

mod condition;
pub use condition::PipeCondition;

mod semaphore;
pub use semaphore::PipeSemaphore;

pub mod codec;
pub use codec::{Bincode, Codec, RawBytes};

mod queue;
pub use queue::{PipeQueue, QueueConfig};

pub mod process;
pub use process::{Process, WaitResult};
