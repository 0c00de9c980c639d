//! Registered I/O stack abstraction.
//!
//! A stack instance wraps exactly one UDP socket. The reactor drives it through
//! the multi-step registered I/O protocol:
//!
//! 1. [`create_queues`](RegisteredIo::create_queues) once
//! 2. [`register_buffer`](RegisteredIo::register_buffer) once
//! 3. [`submit_receive`](RegisteredIo::submit_receive) /
//!    [`submit_send`](RegisteredIo::submit_send) for every slot
//! 4. forever: [`arm`](RegisteredIo::arm) → [`wait`](RegisteredIo::wait) →
//!    [`dequeue`](RegisteredIo::dequeue) → resubmit
//!
//! # Implementors
//!
//! - [`MemoryStack`]: deterministic in-process stack. Datagrams are injected
//!   and sends completed through a [`MemoryStackHandle`].
//! - `UringStack` (Linux): io_uring with the pool registered as a fixed
//!   buffer and an eventfd as the completion notification.

pub mod memory;

#[cfg(target_os = "linux")]
pub mod uring;

pub use memory::{MemoryStack, MemoryStackHandle, SentDatagram};

#[cfg(target_os = "linux")]
pub use uring::UringStack;

use crate::error::Result;
use crate::pool::BufferPool;
use crate::queue::{
    BufferId, CompletionQueue, CompletionRecord, QueuePair, RequestContext, RequestQueue, RioBuf,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Result of a bounded notification wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The completion queue signaled readiness
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

/// Completion-queue driven, registered-buffer I/O on one socket.
///
/// **Contract:**
/// - Submission never blocks; results surface only through `dequeue`.
/// - At most `concurrency_limit` operations are outstanding; an operation
///   stays outstanding until its record has been dequeued.
/// - `arm` is idempotent and must precede every `wait`. If completions are
///   already queued when arming, the following `wait` returns immediately.
/// - The notification is manual-reset: a successful `wait` consumes it.
pub trait RegisteredIo {
    /// Create the socket's request queue and the shared completion queue.
    ///
    /// # Errors
    ///
    /// `RioError::QueueCreation` on resource exhaustion or if the socket
    /// already has queues.
    fn create_queues(&mut self, concurrency_limit: u32) -> Result<QueuePair>;

    /// Register the whole pool region as one buffer.
    ///
    /// # Errors
    ///
    /// `RioError::Registration` if the stack rejects the region.
    fn register_buffer(&mut self, pool: &Arc<BufferPool>) -> Result<BufferId>;

    /// Enqueue a receive into `buf`
    ///
    /// # Errors
    ///
    /// `RioError::Submission` if the request queue is full or `buf` is not
    /// inside the registered region.
    fn submit_receive(
        &mut self,
        queue: RequestQueue,
        buf: &RioBuf,
        context: RequestContext,
    ) -> Result<()>;

    /// Enqueue a send of `buf` to `destination`
    ///
    /// # Errors
    ///
    /// `RioError::Submission` if the request queue is full or `buf` is not
    /// inside the registered region.
    fn submit_send(
        &mut self,
        queue: RequestQueue,
        buf: &RioBuf,
        destination: SocketAddr,
        context: RequestContext,
    ) -> Result<()>;

    /// Request a notification once `queue` is non-empty
    ///
    /// # Errors
    ///
    /// `RioError::Submission` if flushing pending submissions fails.
    fn arm(&mut self, queue: CompletionQueue) -> Result<()>;

    /// Block until notified or `timeout` elapses
    ///
    /// # Errors
    ///
    /// `RioError::Wait` if the notification primitive fails.
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome>;

    /// Move up to `records.len()` completions into `records`, without blocking.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// `RioError::Corruption` if the completion queue is unrecoverable.
    fn dequeue(&mut self, queue: CompletionQueue, records: &mut [CompletionRecord])
    -> Result<usize>;
}
