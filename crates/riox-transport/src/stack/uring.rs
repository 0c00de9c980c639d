//! io_uring registered I/O stack (Linux).
//!
//! Mapping onto io_uring:
//!
//! | Registered I/O          | io_uring                                       |
//! |-------------------------|------------------------------------------------|
//! | feature discovery       | opcode probe for `READ_FIXED` / `WRITE_FIXED`  |
//! | queue pair              | one ring; SQ = request queue, CQ = completions |
//! | buffer registration     | whole pool as fixed buffer 0                   |
//! | receive / send          | `ReadFixed` / `WriteFixed` on the socket       |
//! | notification            | eventfd registered with the ring               |
//! | arm                     | flush SQ, reset eventfd, self-signal if CQ non-empty |
//!
//! A UDP socket can only `write` to a connected peer, so the socket connects
//! to the destination of the first send. Later sends must target the same
//! destination.

use super::{RegisteredIo, WaitOutcome};
use crate::error::{Result, RioError};
use crate::pool::BufferPool;
use crate::queue::{
    BufferId, CompletionQueue, CompletionRecord, QueuePair, RequestContext, RequestQueue, RioBuf,
};
use io_uring::{IoUring, Probe, opcode, squeue, types};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Index of the pool in the ring's fixed buffer table
const FIXED_BUFFER_INDEX: u16 = 0;

/// io_uring-backed stack over one UDP socket
pub struct UringStack {
    /// Ring; declared first so it is torn down before the pool it references
    ring: Option<IoUring>,
    /// Completion notification
    event: OwnedFd,
    socket: Socket,
    local_addr: SocketAddr,
    connected: Option<SocketAddr>,
    pool: Option<Arc<BufferPool>>,
    queues: Option<QueuePair>,
    capacity: usize,
    outstanding: usize,
}

impl UringStack {
    /// Check io_uring support, then create a UDP socket bound to `local`.
    ///
    /// # Errors
    ///
    /// - `RioError::Initialization` if io_uring or the eventfd is unavailable
    /// - `RioError::FeatureDiscovery` if fixed-buffer reads or writes are missing
    /// - `RioError::Socket` if the socket cannot be created or bound
    pub fn bind(local: SocketAddr) -> Result<Self> {
        discover_features()?;

        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| RioError::Socket {
                op: "create",
                source,
            })?;

        socket
            .set_reuse_address(true)
            .map_err(|source| RioError::Socket {
                op: "set SO_REUSEADDR",
                source,
            })?;

        socket
            .bind(&local.into())
            .map_err(|source| RioError::Socket { op: "bind", source })?;

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .unwrap_or(local);

        // SAFETY: plain syscall; the result is checked before use.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(RioError::Initialization {
                op: "eventfd",
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        let event = unsafe { OwnedFd::from_raw_fd(fd) };

        debug!("io_uring stack bound to {}", local_addr);

        Ok(Self {
            ring: None,
            event,
            socket,
            local_addr,
            connected: None,
            pool: None,
            queues: None,
            capacity: 0,
            outstanding: 0,
        })
    }

    /// Address the socket is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Operations submitted and not yet dequeued
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn check_submission(&self, op: &'static str, queue: RequestQueue, buf: &RioBuf) -> Result<*mut u8> {
        if self.queues.map(|q| q.request) != Some(queue) {
            return Err(submission_error(op, libc::EBADF));
        }

        if self.outstanding >= self.capacity {
            return Err(submission_error(op, libc::ENOBUFS));
        }

        self.pool
            .as_ref()
            .filter(|pool| buf.buffer_id == BufferId(0) && pool.contains(buf.offset, buf.length))
            .and_then(|pool| pool.ptr_at(buf.offset))
            .ok_or_else(|| submission_error(op, libc::EINVAL))
    }

    fn push(&mut self, op: &'static str, entry: &squeue::Entry) -> Result<()> {
        let ring = self
            .ring
            .as_mut()
            .ok_or_else(|| submission_error(op, libc::EBADF))?;

        // SAFETY: the entry references the registered pool, which outlives the
        // ring, and a slot that stays in flight until its completion is reaped.
        let pushed = unsafe { ring.submission().push(entry) };
        if pushed.is_err() {
            // Submission queue full: hand what we have to the kernel and retry
            ring.submit().map_err(|source| RioError::Submission {
                op: "submit",
                source,
            })?;
            // SAFETY: as above.
            unsafe { ring.submission().push(entry) }
                .map_err(|_| submission_error(op, libc::EBUSY))?;
        }

        self.outstanding += 1;
        Ok(())
    }
}

impl std::fmt::Debug for UringStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UringStack")
            .field("local_addr", &self.local_addr)
            .field("connected", &self.connected)
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}

fn submission_error(op: &'static str, errno: i32) -> RioError {
    RioError::Submission {
        op,
        source: io::Error::from_raw_os_error(errno),
    }
}

/// Consume a pending eventfd signal; EAGAIN means it was already clear
fn reset_event(fd: RawFd) {
    let mut value: u64 = 0;
    // SAFETY: reading 8 bytes into a local u64 from a nonblocking eventfd.
    unsafe {
        libc::read(fd, (&raw mut value).cast::<libc::c_void>(), size_of::<u64>());
    }
}

fn signal_event(fd: RawFd) -> Result<()> {
    let value: u64 = 1;
    // SAFETY: writing 8 bytes from a local u64 to an eventfd.
    let ret = unsafe { libc::write(fd, (&raw const value).cast::<libc::c_void>(), size_of::<u64>()) };
    if ret < 0 {
        return Err(RioError::Wait {
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Probe the kernel for the fixed-buffer opcodes the engine needs
fn discover_features() -> Result<()> {
    let ring = IoUring::new(2).map_err(|source| RioError::Initialization {
        op: "io_uring_setup",
        source,
    })?;

    let mut probe = Probe::new();
    ring.submitter()
        .register_probe(&mut probe)
        .map_err(|e| RioError::FeatureDiscovery(format!("opcode probe failed: {}", e)))?;

    for (code, name) in [
        (opcode::ReadFixed::CODE, "IORING_OP_READ_FIXED"),
        (opcode::WriteFixed::CODE, "IORING_OP_WRITE_FIXED"),
    ] {
        if !probe.is_supported(code) {
            return Err(RioError::FeatureDiscovery(format!(
                "kernel does not support {}",
                name
            )));
        }
    }

    Ok(())
}

impl RegisteredIo for UringStack {
    fn create_queues(&mut self, concurrency_limit: u32) -> Result<QueuePair> {
        if self.ring.is_some() {
            return Err(RioError::QueueCreation {
                source: io::Error::from_raw_os_error(libc::EBUSY),
            });
        }

        let entries = concurrency_limit.max(1).next_power_of_two();
        let ring = IoUring::builder()
            .setup_cqsize(entries * 2)
            .build(entries)
            .map_err(|source| RioError::QueueCreation { source })?;

        ring.submitter()
            .register_eventfd(self.event.as_raw_fd())
            .map_err(|source| RioError::QueueCreation { source })?;

        debug!(
            "Created io_uring with {} SQ entries for {} outstanding operations",
            entries, concurrency_limit
        );

        let queues = QueuePair {
            request: RequestQueue(0),
            completion: CompletionQueue(0),
        };
        self.ring = Some(ring);
        self.queues = Some(queues);
        self.capacity = concurrency_limit as usize;
        Ok(queues)
    }

    fn register_buffer(&mut self, pool: &Arc<BufferPool>) -> Result<BufferId> {
        let ring = self.ring.as_ref().ok_or_else(|| RioError::Registration {
            source: io::Error::from_raw_os_error(libc::EBADF),
        })?;

        if self.pool.is_some() {
            return Err(RioError::Registration {
                source: io::Error::from_raw_os_error(libc::EEXIST),
            });
        }

        let iov = libc::iovec {
            iov_base: pool.as_ptr().cast::<libc::c_void>(),
            iov_len: pool.len(),
        };

        // SAFETY: the iovec covers the pool's mapping. The pool Arc is stored
        // below and outlives the ring (field order).
        unsafe { ring.submitter().register_buffers(&[iov]) }.map_err(|source| {
            if source.raw_os_error() == Some(libc::ENOMEM) {
                warn!(
                    "Registering {} bytes hit RLIMIT_MEMLOCK; raise it with `ulimit -l`",
                    pool.len()
                );
            }
            RioError::Registration { source }
        })?;

        debug!("Registered {} byte pool as fixed buffer", pool.len());

        self.pool = Some(Arc::clone(pool));
        Ok(BufferId(u32::from(FIXED_BUFFER_INDEX)))
    }

    fn submit_receive(
        &mut self,
        queue: RequestQueue,
        buf: &RioBuf,
        context: RequestContext,
    ) -> Result<()> {
        let ptr = self.check_submission("receive", queue, buf)?;

        let entry = opcode::ReadFixed::new(
            types::Fd(self.socket.as_raw_fd()),
            ptr,
            buf.length,
            FIXED_BUFFER_INDEX,
        )
        .build()
        .user_data(context.to_user_data());

        self.push("receive", &entry)
    }

    fn submit_send(
        &mut self,
        queue: RequestQueue,
        buf: &RioBuf,
        destination: SocketAddr,
        context: RequestContext,
    ) -> Result<()> {
        let ptr = self.check_submission("send", queue, buf)?;

        match self.connected {
            None => {
                self.socket
                    .connect(&destination.into())
                    .map_err(|source| RioError::Socket {
                        op: "connect",
                        source,
                    })?;
                debug!("Connected {} to {}", self.local_addr, destination);
                self.connected = Some(destination);
            }
            Some(peer) if peer != destination => {
                return Err(submission_error("send", libc::EISCONN));
            }
            Some(_) => {}
        }

        let entry = opcode::WriteFixed::new(
            types::Fd(self.socket.as_raw_fd()),
            ptr,
            buf.length,
            FIXED_BUFFER_INDEX,
        )
        .build()
        .user_data(context.to_user_data());

        self.push("send", &entry)
    }

    fn arm(&mut self, queue: CompletionQueue) -> Result<()> {
        if self.queues.map(|q| q.completion) != Some(queue) {
            return Err(submission_error("notify", libc::EBADF));
        }

        let event = self.event.as_raw_fd();
        let Some(ring) = self.ring.as_mut() else {
            return Err(submission_error("notify", libc::EBADF));
        };

        ring.submit().map_err(|source| RioError::Submission {
            op: "submit",
            source,
        })?;

        reset_event(event);
        if !ring.completion().is_empty() {
            signal_event(event)?;
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        let mut pfd = libc::pollfd {
            fd: self.event.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        // SAFETY: one valid pollfd on the stack.
        let ret = unsafe { libc::poll(&raw mut pfd, 1, millis) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(WaitOutcome::TimedOut);
            }
            return Err(RioError::Wait { source: err });
        }

        if ret == 0 {
            return Ok(WaitOutcome::TimedOut);
        }

        reset_event(self.event.as_raw_fd());
        Ok(WaitOutcome::Signaled)
    }

    fn dequeue(
        &mut self,
        queue: CompletionQueue,
        records: &mut [CompletionRecord],
    ) -> Result<usize> {
        if self.queues.map(|q| q.completion) != Some(queue) {
            return Err(RioError::corruption(format!(
                "dequeue from unknown completion queue {:?}",
                queue
            )));
        }

        let Some(ring) = self.ring.as_mut() else {
            return Err(RioError::corruption("ring not initialized"));
        };

        if ring.submission().cq_overflow() {
            return Err(RioError::corruption("completion queue overflowed"));
        }

        let mut count = 0;
        let mut cq = ring.completion();
        for slot in records.iter_mut() {
            let Some(cqe) = cq.next() else {
                break;
            };

            let context = RequestContext::from_user_data(cqe.user_data()).ok_or_else(|| {
                RioError::corruption(format!("completion with bad user_data {}", cqe.user_data()))
            })?;

            let result = cqe.result();
            *slot = if result >= 0 {
                CompletionRecord::ok(context, result.unsigned_abs())
            } else {
                CompletionRecord::failed(context, result)
            };
            count += 1;
        }
        drop(cq);

        self.outstanding = self.outstanding.saturating_sub(count);
        Ok(count)
    }
}
