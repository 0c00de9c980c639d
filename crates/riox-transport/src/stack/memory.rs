//! In-process registered I/O stack.
//!
//! `MemoryStack` implements the full registered I/O protocol without touching
//! the network: it keeps a request queue, a completion queue and a manual-reset
//! notification (mutex + condvar), and it reads and writes the registered
//! region exactly where a kernel would. The paired [`MemoryStackHandle`] plays
//! the role of the wire: it delivers datagrams into posted receives, completes
//! or fails outstanding sends, and can mark the completion queue corrupt.
//!
//! Every operation is deterministic, which makes the stack suitable for unit
//! tests, integration scenarios and benchmarks of the reactor itself.

use super::{RegisteredIo, WaitOutcome};
use crate::error::{Result, RioError};
use crate::pool::BufferPool;
use crate::queue::{
    BufferId, CompletionQueue, CompletionRecord, QueuePair, RequestContext, RequestQueue, RioBuf,
};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default number of datagrams buffered while no receive is posted
const DEFAULT_BACKLOG: usize = 1024;

/// Default request queue depth limit
const DEFAULT_MAX_QUEUE_DEPTH: u32 = 4096;

/// Default number of sent datagrams kept for inspection
const DEFAULT_SENT_LOG: usize = 4096;

/// A datagram handed to the stack by a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Submitting descriptor
    pub context: RequestContext,
    /// Destination given at submission
    pub destination: SocketAddr,
    /// Bytes read from the registered slot at submission time
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct PendingOp {
    buf: RioBuf,
    context: RequestContext,
}

#[derive(Debug)]
struct State {
    pool: Option<Arc<BufferPool>>,
    buffer_id: Option<BufferId>,
    queues: Option<QueuePair>,
    capacity: usize,
    outstanding: usize,

    receives: VecDeque<PendingOp>,
    sends: VecDeque<PendingOp>,
    completions: VecDeque<CompletionRecord>,

    backlog: VecDeque<Vec<u8>>,
    backlog_limit: usize,
    dropped: u64,
    sent: VecDeque<SentDatagram>,
    sent_log_limit: usize,
    sent_total: u64,
    auto_complete_sends: bool,

    armed: bool,
    signaled: bool,
    corrupted: bool,

    submissions: u64,
    pin_limit: Option<usize>,
    max_queue_depth: u32,
}

impl State {
    /// Append a completion and fire the notification if armed
    fn post(&mut self, record: CompletionRecord, ready: &Condvar) {
        self.completions.push_back(record);
        if self.armed {
            self.armed = false;
            self.signaled = true;
            ready.notify_all();
        }
    }

    /// Copy `datagram` into the slot of a posted receive and complete it
    fn fill_receive(&mut self, op: PendingOp, datagram: &[u8], ready: &Condvar) {
        let copied = datagram.len().min(op.buf.length as usize);

        if let Some(pool) = &self.pool {
            // SAFETY: the descriptor behind `op` is in flight, so the stack owns
            // the slot until the completion posted below is dequeued.
            if let Some(slot) = unsafe { pool.slice_mut(op.buf.offset, op.buf.length) } {
                slot[..copied].copy_from_slice(&datagram[..copied]);
            }
        }

        self.post(CompletionRecord::ok(op.context, copied as u32), ready);
    }

    fn check_submission(
        &self,
        op: &'static str,
        queue: RequestQueue,
        buf: &RioBuf,
    ) -> Result<()> {
        if self.queues.map(|q| q.request) != Some(queue) {
            return Err(submission_error(op, libc::EBADF));
        }

        let in_region = self.buffer_id == Some(buf.buffer_id)
            && self
                .pool
                .as_ref()
                .is_some_and(|pool| pool.contains(buf.offset, buf.length));
        if !in_region {
            return Err(submission_error(op, libc::EINVAL));
        }

        if self.outstanding >= self.capacity {
            return Err(submission_error(op, libc::ENOBUFS));
        }

        Ok(())
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn submission_error(op: &'static str, errno: i32) -> RioError {
    RioError::Submission {
        op,
        source: io::Error::from_raw_os_error(errno),
    }
}

/// Deterministic in-process stack
#[derive(Debug)]
pub struct MemoryStack {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl MemoryStack {
    /// Create a stack standing in for a socket bound to `local_addr`
    #[must_use]
    pub fn new(local_addr: SocketAddr) -> Self {
        let state = State {
            pool: None,
            buffer_id: None,
            queues: None,
            capacity: 0,
            outstanding: 0,
            receives: VecDeque::new(),
            sends: VecDeque::new(),
            completions: VecDeque::new(),
            backlog: VecDeque::new(),
            backlog_limit: DEFAULT_BACKLOG,
            dropped: 0,
            sent: VecDeque::new(),
            sent_log_limit: DEFAULT_SENT_LOG,
            sent_total: 0,
            auto_complete_sends: false,
            armed: false,
            signaled: false,
            corrupted: false,
            submissions: 0,
            pin_limit: None,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                ready: Condvar::new(),
            }),
            local_addr,
        }
    }

    /// Complete every send as soon as it is submitted
    #[must_use]
    pub fn with_auto_complete_sends(self, enabled: bool) -> Self {
        self.shared.lock().auto_complete_sends = enabled;
        self
    }

    /// Keep at most `datagrams` entries in the sent log, oldest evicted first.
    ///
    /// Zero disables the log; [`MemoryStackHandle::sent_total`] still counts.
    #[must_use]
    pub fn with_sent_log(self, datagrams: usize) -> Self {
        self.shared.lock().sent_log_limit = datagrams;
        self
    }

    /// Refuse to register regions larger than `bytes`
    #[must_use]
    pub fn with_pin_limit(self, bytes: usize) -> Self {
        self.shared.lock().pin_limit = Some(bytes);
        self
    }

    /// Refuse queues deeper than `depth`
    #[must_use]
    pub fn with_max_queue_depth(self, depth: u32) -> Self {
        self.shared.lock().max_queue_depth = depth;
        self
    }

    /// Buffer at most `datagrams` arrivals while no receive is posted
    #[must_use]
    pub fn with_backlog_limit(self, datagrams: usize) -> Self {
        self.shared.lock().backlog_limit = datagrams;
        self
    }

    /// Handle for driving the wire side
    #[must_use]
    pub fn handle(&self) -> MemoryStackHandle {
        MemoryStackHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Address this stack pretends to be bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl RegisteredIo for MemoryStack {
    fn create_queues(&mut self, concurrency_limit: u32) -> Result<QueuePair> {
        let mut state = self.shared.lock();

        if state.queues.is_some() {
            return Err(RioError::QueueCreation {
                source: io::Error::from_raw_os_error(libc::EBUSY),
            });
        }

        if concurrency_limit == 0 || concurrency_limit > state.max_queue_depth {
            return Err(RioError::QueueCreation {
                source: io::Error::from_raw_os_error(libc::ENOBUFS),
            });
        }

        let queues = QueuePair {
            request: RequestQueue(1),
            completion: CompletionQueue(1),
        };
        state.queues = Some(queues);
        state.capacity = concurrency_limit as usize;
        Ok(queues)
    }

    fn register_buffer(&mut self, pool: &Arc<BufferPool>) -> Result<BufferId> {
        let mut state = self.shared.lock();

        if state.pool.is_some() {
            return Err(RioError::Registration {
                source: io::Error::from_raw_os_error(libc::EEXIST),
            });
        }

        if state.pin_limit.is_some_and(|limit| pool.len() > limit) {
            return Err(RioError::Registration {
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            });
        }

        let id = BufferId(1);
        state.pool = Some(Arc::clone(pool));
        state.buffer_id = Some(id);
        Ok(id)
    }

    fn submit_receive(
        &mut self,
        queue: RequestQueue,
        buf: &RioBuf,
        context: RequestContext,
    ) -> Result<()> {
        let mut state = self.shared.lock();
        state.check_submission("receive", queue, buf)?;

        state.outstanding += 1;
        state.submissions += 1;

        let op = PendingOp { buf: *buf, context };
        match state.backlog.pop_front() {
            Some(datagram) => state.fill_receive(op, &datagram, &self.shared.ready),
            None => state.receives.push_back(op),
        }
        Ok(())
    }

    fn submit_send(
        &mut self,
        queue: RequestQueue,
        buf: &RioBuf,
        destination: SocketAddr,
        context: RequestContext,
    ) -> Result<()> {
        let mut state = self.shared.lock();
        state.check_submission("send", queue, buf)?;

        state.outstanding += 1;
        state.submissions += 1;
        state.sent_total += 1;

        if state.sent_log_limit > 0 {
            let payload = state
                .pool
                .as_ref()
                // SAFETY: the caller hands the slot over with this submission;
                // the stack only reads it.
                .and_then(|pool| unsafe { pool.slice(buf.offset, buf.length) })
                .map(<[u8]>::to_vec)
                .unwrap_or_default();

            if state.sent.len() >= state.sent_log_limit {
                state.sent.pop_front();
            }
            state.sent.push_back(SentDatagram {
                context,
                destination,
                payload,
            });
        }

        let op = PendingOp { buf: *buf, context };
        if state.auto_complete_sends {
            state.post(
                CompletionRecord::ok(context, buf.length),
                &self.shared.ready,
            );
        } else {
            state.sends.push_back(op);
        }
        Ok(())
    }

    fn arm(&mut self, queue: CompletionQueue) -> Result<()> {
        let mut state = self.shared.lock();

        if state.queues.map(|q| q.completion) != Some(queue) {
            return Err(submission_error("notify", libc::EBADF));
        }

        if state.completions.is_empty() && !state.corrupted {
            state.armed = true;
        } else {
            state.armed = false;
            state.signaled = true;
            self.shared.ready.notify_all();
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        while !state.signaled {
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            state = self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.signaled = false;
        Ok(WaitOutcome::Signaled)
    }

    fn dequeue(
        &mut self,
        queue: CompletionQueue,
        records: &mut [CompletionRecord],
    ) -> Result<usize> {
        let mut state = self.shared.lock();

        if state.corrupted {
            return Err(RioError::corruption(
                "memory stack completion queue marked corrupt",
            ));
        }

        if state.queues.map(|q| q.completion) != Some(queue) {
            return Err(RioError::corruption(format!(
                "dequeue from unknown completion queue {:?}",
                queue
            )));
        }

        let count = records.len().min(state.completions.len());
        for slot in records.iter_mut().take(count) {
            if let Some(record) = state.completions.pop_front() {
                *slot = record;
            }
        }
        state.outstanding -= count;
        Ok(count)
    }
}

/// Wire-side control of a [`MemoryStack`]
#[derive(Debug, Clone)]
pub struct MemoryStackHandle {
    shared: Arc<Shared>,
}

impl MemoryStackHandle {
    /// Deliver one datagram.
    ///
    /// Fills the oldest posted receive, truncating to its length. Returns
    /// `false` if no receive was posted; the datagram is then buffered (or
    /// dropped once the backlog is full) until one is.
    pub fn deliver(&self, datagram: &[u8]) -> bool {
        let mut state = self.shared.lock();

        if let Some(op) = state.receives.pop_front() {
            state.fill_receive(op, datagram, &self.shared.ready);
            return true;
        }

        if state.backlog.len() < state.backlog_limit {
            state.backlog.push_back(datagram.to_vec());
        } else {
            state.dropped += 1;
        }
        false
    }

    /// Complete up to `count` outstanding sends, oldest first
    pub fn complete_sends(&self, count: usize) -> usize {
        let mut state = self.shared.lock();
        let mut done = 0;
        while done < count {
            let Some(op) = state.sends.pop_front() else {
                break;
            };
            state.post(
                CompletionRecord::ok(op.context, op.buf.length),
                &self.shared.ready,
            );
            done += 1;
        }
        done
    }

    /// Fail up to `count` outstanding sends with `errno`
    pub fn fail_sends(&self, count: usize, errno: i32) -> usize {
        let mut state = self.shared.lock();
        let mut done = 0;
        while done < count {
            let Some(op) = state.sends.pop_front() else {
                break;
            };
            state.post(
                CompletionRecord::failed(op.context, errno),
                &self.shared.ready,
            );
            done += 1;
        }
        done
    }

    /// Fire the notification without posting a completion.
    ///
    /// The signal stays set until a `wait` consumes it, so the next wait
    /// returns `Signaled` and the following dequeue finds nothing.
    pub fn wake(&self) {
        let mut state = self.shared.lock();
        state.signaled = true;
        self.shared.ready.notify_all();
    }

    /// Mark the completion queue corrupt and wake any waiter
    pub fn corrupt(&self) {
        let mut state = self.shared.lock();
        state.corrupted = true;
        state.signaled = true;
        self.shared.ready.notify_all();
    }

    /// Total receives and sends accepted since creation
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.shared.lock().submissions
    }

    /// Operations submitted but not yet dequeued
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    /// Receives waiting for a datagram
    #[must_use]
    pub fn posted_receives(&self) -> usize {
        self.shared.lock().receives.len()
    }

    /// Sends waiting for completion
    #[must_use]
    pub fn posted_sends(&self) -> usize {
        self.shared.lock().sends.len()
    }

    /// Completion records not yet dequeued
    #[must_use]
    pub fn queued_completions(&self) -> usize {
        self.shared.lock().completions.len()
    }

    /// Datagrams dropped because the backlog was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }

    /// Datagrams still held in the sent log, oldest first
    #[must_use]
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.shared.lock().sent.iter().cloned().collect()
    }

    /// Drain the sent log
    pub fn take_sent(&self) -> Vec<SentDatagram> {
        self.shared.lock().sent.drain(..).collect()
    }

    /// Sends accepted since creation, logged or not
    #[must_use]
    pub fn sent_total(&self) -> u64 {
        self.shared.lock().sent_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorTable;

    fn addr() -> SocketAddr {
        "127.0.0.1:17185".parse().unwrap()
    }

    fn setup(slots: u32) -> (MemoryStack, QueuePair, Arc<BufferPool>, DescriptorTable) {
        setup_with(MemoryStack::new(addr()), slots)
    }

    fn setup_with(
        mut stack: MemoryStack,
        slots: u32,
    ) -> (MemoryStack, QueuePair, Arc<BufferPool>, DescriptorTable) {
        let queues = stack.create_queues(slots).unwrap();
        let pool = Arc::new(BufferPool::new(256, slots as usize).unwrap());
        let id = stack.register_buffer(&pool).unwrap();
        let table = DescriptorTable::bind_all(id, &pool);
        (stack, queues, pool, table)
    }

    #[test]
    fn test_arm_twice_without_completion_does_not_wake() {
        let (mut stack, queues, _pool, _table) = setup(2);

        stack.arm(queues.completion).unwrap();
        stack.arm(queues.completion).unwrap();

        let outcome = stack.wait(Duration::from_millis(20)).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_arm_with_queued_completion_wakes_immediately() {
        let (mut stack, queues, _pool, table) = setup(2);
        let handle = stack.handle();
        let ctx = RequestContext(0);

        stack
            .submit_receive(queues.request, &table.get(ctx).unwrap().buf(), ctx)
            .unwrap();
        assert!(handle.deliver(b"early"));

        stack.arm(queues.completion).unwrap();
        let outcome = stack.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, WaitOutcome::Signaled);

        // The signal was consumed
        let outcome = stack.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_drain_larger_than_available() {
        let (mut stack, queues, _pool, table) = setup(4);
        let handle = stack.handle();

        for ctx in table.contexts() {
            stack
                .submit_receive(queues.request, &table.get(ctx).unwrap().buf(), ctx)
                .unwrap();
        }
        handle.deliver(&[1; 10]);
        handle.deliver(&[2; 20]);
        handle.deliver(&[3; 30]);

        let mut records = [CompletionRecord::default(); 16];
        let count = stack.dequeue(queues.completion, &mut records).unwrap();

        assert_eq!(count, 3);
        let sizes: Vec<u32> = records[..3].iter().map(|r| r.bytes_transferred).collect();
        assert_eq!(sizes, vec![10, 20, 30]);
        assert_eq!(handle.outstanding(), 1);
    }

    #[test]
    fn test_receive_writes_into_registered_slot() {
        let (mut stack, queues, pool, table) = setup(2);
        let handle = stack.handle();
        let ctx = RequestContext(1);
        let buf = table.get(ctx).unwrap().buf();

        stack.submit_receive(queues.request, &buf, ctx).unwrap();
        handle.deliver(b"hello registered io");

        let mut records = [CompletionRecord::default(); 1];
        assert_eq!(stack.dequeue(queues.completion, &mut records).unwrap(), 1);
        assert_eq!(records[0].context, ctx);
        assert_eq!(records[0].bytes_transferred, 19);

        // SAFETY: the record was dequeued, the slot is back with the caller.
        let slot = unsafe { pool.slice(buf.offset, 19) }.unwrap();
        assert_eq!(slot, b"hello registered io");
    }

    #[test]
    fn test_oversized_datagram_truncated() {
        let (mut stack, queues, _pool, table) = setup(1);
        let handle = stack.handle();
        let ctx = RequestContext(0);

        stack
            .submit_receive(queues.request, &table.get(ctx).unwrap().buf(), ctx)
            .unwrap();
        handle.deliver(&[0xAB; 1000]);

        let mut records = [CompletionRecord::default(); 1];
        stack.dequeue(queues.completion, &mut records).unwrap();
        assert_eq!(records[0].bytes_transferred, 256);
    }

    #[test]
    fn test_backlog_fills_later_receive() {
        let (mut stack, queues, _pool, table) = setup(1);
        let stack_handle = stack.handle();

        assert!(!stack_handle.deliver(&[7; 42]));

        let ctx = RequestContext(0);
        stack
            .submit_receive(queues.request, &table.get(ctx).unwrap().buf(), ctx)
            .unwrap();

        let mut records = [CompletionRecord::default(); 1];
        assert_eq!(stack.dequeue(queues.completion, &mut records).unwrap(), 1);
        assert_eq!(records[0].bytes_transferred, 42);
    }

    #[test]
    fn test_backlog_limit_drops() {
        let stack = MemoryStack::new(addr()).with_backlog_limit(1);
        let handle = stack.handle();

        handle.deliver(b"a");
        handle.deliver(b"b");
        assert_eq!(handle.dropped(), 1);
    }

    #[test]
    fn test_queue_full_rejected() {
        let (mut stack, queues, _pool, table) = setup(1);
        let ctx = RequestContext(0);
        let buf = table.get(ctx).unwrap().buf();

        stack.submit_receive(queues.request, &buf, ctx).unwrap();
        let err = stack.submit_receive(queues.request, &buf, ctx).unwrap_err();

        assert!(matches!(err, RioError::Submission { op: "receive", .. }));
        assert_eq!(err.os_code(), Some(libc::ENOBUFS));
    }

    #[test]
    fn test_buffer_outside_region_rejected() {
        let (mut stack, queues, _pool, table) = setup(1);
        let ctx = RequestContext(0);
        let mut buf = table.get(ctx).unwrap().buf();
        buf.offset = 4096;

        let err = stack.submit_receive(queues.request, &buf, ctx).unwrap_err();
        assert_eq!(err.os_code(), Some(libc::EINVAL));
    }

    #[test]
    fn test_send_reads_slot_and_completes_on_demand() {
        let (mut stack, queues, pool, table) = setup(2);
        let handle = stack.handle();
        let ctx = RequestContext(0);
        let mut buf = table.get(ctx).unwrap().buf();
        buf.length = 4;

        // SAFETY: nothing is outstanding on the slot yet.
        unsafe { pool.slice_mut(buf.offset, 4) }
            .unwrap()
            .copy_from_slice(b"ping");
        stack
            .submit_send(queues.request, &buf, addr(), ctx)
            .unwrap();

        assert_eq!(handle.queued_completions(), 0);
        assert_eq!(handle.complete_sends(5), 1);

        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, b"ping");
        assert_eq!(sent[0].destination, addr());

        let mut records = [CompletionRecord::default(); 4];
        assert_eq!(stack.dequeue(queues.completion, &mut records).unwrap(), 1);
        assert_eq!(records[0], CompletionRecord::ok(ctx, 4));
    }

    #[test]
    fn test_sent_log_evicts_oldest() {
        let stack = MemoryStack::new(addr())
            .with_auto_complete_sends(true)
            .with_sent_log(3);
        let (mut stack, queues, _pool, table) = setup_with(stack, 1);
        let handle = stack.handle();
        let ctx = RequestContext(0);
        let buf = table.get(ctx).unwrap().buf();
        let mut records = [CompletionRecord::default(); 1];

        for _ in 0..1000 {
            stack.submit_send(queues.request, &buf, addr(), ctx).unwrap();
            assert_eq!(stack.dequeue(queues.completion, &mut records).unwrap(), 1);
        }

        assert_eq!(handle.sent().len(), 3);
        assert_eq!(handle.sent_total(), 1000);
        assert_eq!(handle.take_sent().len(), 3);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn test_sent_log_disabled() {
        let (mut stack, queues, _pool, table) =
            setup_with(MemoryStack::new(addr()).with_sent_log(0), 1);
        let handle = stack.handle();
        let ctx = RequestContext(0);

        stack
            .submit_send(queues.request, &table.get(ctx).unwrap().buf(), addr(), ctx)
            .unwrap();

        assert!(handle.sent().is_empty());
        assert_eq!(handle.sent_total(), 1);
        assert_eq!(handle.posted_sends(), 1);
    }

    #[test]
    fn test_corruption_reported_on_dequeue() {
        let (mut stack, queues, _pool, _table) = setup(1);
        let handle = stack.handle();

        stack.arm(queues.completion).unwrap();
        handle.corrupt();

        assert_eq!(
            stack.wait(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Signaled
        );
        let mut records = [CompletionRecord::default(); 1];
        let err = stack.dequeue(queues.completion, &mut records).unwrap_err();
        assert!(matches!(err, RioError::Corruption { .. }));
    }

    #[test]
    fn test_resource_limits() {
        let mut stack = MemoryStack::new(addr())
            .with_max_queue_depth(8)
            .with_pin_limit(1024);

        assert!(matches!(
            stack.create_queues(16),
            Err(RioError::QueueCreation { .. })
        ));
        stack.create_queues(8).unwrap();
        assert!(matches!(
            stack.create_queues(8),
            Err(RioError::QueueCreation { .. })
        ));

        let big = Arc::new(BufferPool::new(1024, 2).unwrap());
        let err = stack.register_buffer(&big).unwrap_err();
        assert_eq!(err.os_code(), Some(libc::ENOMEM));
    }

    #[test]
    fn test_wake_from_other_thread() {
        let (mut stack, queues, _pool, table) = setup(1);
        let handle = stack.handle();
        let ctx = RequestContext(0);

        stack
            .submit_receive(queues.request, &table.get(ctx).unwrap().buf(), ctx)
            .unwrap();
        stack.arm(queues.completion).unwrap();

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.deliver(b"late");
        });

        assert_eq!(
            stack.wait(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Signaled
        );
        sender.join().unwrap();
    }
}
