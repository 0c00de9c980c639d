//! Request/completion queue wiring types.
//!
//! These are the values that cross the boundary between the reactor and a
//! [`RegisteredIo`](crate::stack::RegisteredIo) stack: opaque handles for the
//! registered region and the queues, the buffer reference submitted with each
//! operation, and the completion record the stack hands back.

use std::fmt;

/// Opaque handle to a registered buffer region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    /// Raw handle value
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle to a socket's request queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestQueue(pub(crate) u32);

/// Opaque handle to a completion queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionQueue(pub(crate) u32);

/// Queue handles returned by `create_queues`.
///
/// One completion queue services both directions of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePair {
    /// Request queue bound to the socket
    pub request: RequestQueue,
    /// Completion queue shared by receives and sends
    pub completion: CompletionQueue,
}

/// Reference to bytes inside the registered region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RioBuf {
    /// Registered region
    pub buffer_id: BufferId,
    /// Offset from the start of the region
    pub offset: u32,
    /// Number of bytes
    pub length: u32,
}

/// Completion context: index of the descriptor that owns the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestContext(pub u32);

impl RequestContext {
    /// Descriptor table index
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Encode as io_uring `user_data`
    #[must_use]
    pub fn to_user_data(self) -> u64 {
        u64::from(self.0)
    }

    /// Decode from io_uring `user_data`
    #[must_use]
    pub fn from_user_data(user_data: u64) -> Option<Self> {
        u32::try_from(user_data).ok().map(Self)
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion record produced by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    /// Context supplied at submission
    pub context: RequestContext,
    /// Bytes received or sent
    pub bytes_transferred: u32,
    /// 0 on success, otherwise a negative OS error code
    pub status: i32,
}

impl CompletionRecord {
    /// Successful completion
    #[must_use]
    pub fn ok(context: RequestContext, bytes_transferred: u32) -> Self {
        Self {
            context,
            bytes_transferred,
            status: 0,
        }
    }

    /// Failed completion carrying `-errno`
    #[must_use]
    pub fn failed(context: RequestContext, errno: i32) -> Self {
        Self {
            context,
            bytes_transferred: 0,
            status: -errno.abs(),
        }
    }

    /// Whether the operation succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

impl Default for CompletionRecord {
    fn default() -> Self {
        Self::ok(RequestContext(0), 0)
    }
}
