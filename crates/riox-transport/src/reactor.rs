//! Completion reactor.
//!
//! The reactor owns the buffer pool, the descriptor table and one
//! [`RegisteredIo`] stack. After [`start`](Reactor::start) puts every
//! descriptor in flight, each [`cycle`](Reactor::cycle) walks the state
//! machine once:
//!
//! ```text
//! Armed ──▶ Waiting ──signaled──▶ Draining ──records──▶ Recycling
//!   ▲          │                     │                      │
//!   │       timeout              empty drain                │
//!   └──────────┴─────────────────────┴──────────────────────┘
//! ```
//!
//! Recycling resubmits each completed descriptor immediately, so the number
//! of in-flight operations stays at `concurrency_limit` for the lifetime of
//! the engine. The wait is bounded by `wait_timeout`; between waits the
//! reactor checks its [`ShutdownHandle`].

use crate::config::{EngineConfig, Role};
use crate::descriptor::{Descriptor, DescriptorError, DescriptorTable};
use crate::error::{Result, RioError};
use crate::payload::{PAYLOAD_LEN, SequenceGenerator};
use crate::pool::BufferPool;
use crate::queue::{CompletionRecord, QueuePair, RequestContext};
use crate::stack::{RegisteredIo, WaitOutcome};
use crate::stats::{Reporter, StatsReport, StatsWindow, log_reporter};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Reactor state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Completion notification requested
    Armed,
    /// Blocked on the notification
    Waiting,
    /// Pulling records off the completion queue
    Draining,
    /// Resubmitting completed descriptors
    Recycling,
}

/// Cross-thread stop signal for a running reactor
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// New, untriggered handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the reactor to stop after its current wait
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether `trigger` has been called
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorCounters {
    /// Cycles that drained at least one record
    pub cycles: u64,
    /// Completion records processed
    pub completions: u64,
    /// Records that carried an error status
    pub failed_completions: u64,
    /// Descriptors resubmitted after completion
    pub resubmissions: u64,
    /// Signaled waits that found the queue empty
    pub empty_drains: u64,
    /// Waits that hit the timeout
    pub timeouts: u64,
}

/// Registered I/O transceiver over stack `S`
pub struct Reactor<S: RegisteredIo> {
    // Dropped before `pool`: the stack may still reference the region
    stack: S,
    pool: Arc<BufferPool>,
    table: DescriptorTable,
    queues: QueuePair,
    role: Role,
    destination: SocketAddr,
    batch: Vec<CompletionRecord>,
    sequence: SequenceGenerator,
    stats: StatsWindow,
    reporter: Reporter,
    wait_timeout: Duration,
    state: ReactorState,
    started: bool,
    shutdown: ShutdownHandle,
    counters: ReactorCounters,
}

fn corrupted(err: DescriptorError) -> RioError {
    RioError::corruption(err.to_string())
}

impl<S: RegisteredIo> Reactor<S> {
    /// Validate `config`, allocate the pool, create the queues, register the
    /// region and bind one descriptor per slot.
    ///
    /// # Errors
    ///
    /// `RioError::Config` before any allocation if `config` is invalid;
    /// otherwise whatever the pool or stack reports.
    pub fn new(mut stack: S, config: &EngineConfig, role: Role) -> Result<Self> {
        config.validate(role)?;

        let pool = Arc::new(BufferPool::new(
            config.slot_size,
            config.concurrency_limit as usize,
        )?);
        let queues = stack.create_queues(config.concurrency_limit)?;
        let buffer_id = stack.register_buffer(&pool)?;
        let table = DescriptorTable::bind_all(buffer_id, &pool);

        // No drain can return more records than there are descriptors
        let batch_len = config.batch_size.min(table.len());

        info!(
            "{:?} engine ready: {} slots x {} bytes, batch {}",
            role,
            table.len(),
            config.slot_size,
            batch_len
        );

        Ok(Self {
            stack,
            pool,
            table,
            queues,
            role,
            destination: config.remote_addr(),
            batch: vec![CompletionRecord::default(); batch_len],
            sequence: SequenceGenerator::default(),
            stats: StatsWindow::new(Instant::now(), config.stats_interval(), role),
            reporter: log_reporter(),
            wait_timeout: config.wait_timeout(),
            state: ReactorState::Armed,
            started: false,
            shutdown: ShutdownHandle::new(),
            counters: ReactorCounters::default(),
        })
    }

    /// Replace the default `info!` statistics output
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FnMut(&StatsReport) + Send + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Use an existing shutdown handle instead of the reactor's own
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Submit every descriptor once. Senders seed slot `i` with sequence `i`.
    ///
    /// Calling `start` again is a no-op.
    ///
    /// # Errors
    ///
    /// Any submission failure.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        for context in self.table.contexts() {
            self.prepare(context)?;
            self.submit(context)?;
        }

        self.started = true;
        self.state = ReactorState::Armed;
        self.stats = StatsWindow::new(Instant::now(), self.stats.interval(), self.role);

        debug!("{} operations in flight", self.table.in_flight());
        Ok(())
    }

    /// Start if needed, then cycle until shutdown is triggered.
    ///
    /// # Errors
    ///
    /// The first unrecoverable error; the reactor performs no further
    /// submissions after it.
    pub fn run(&mut self) -> Result<()> {
        if let Err(e) = self.start() {
            error!("Start-up failed: {}", e);
            return Err(e);
        }

        info!("{:?} reactor running", self.role);

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.cycle() {
                error!("Reactor stopped: {}", e);
                return Err(e);
            }
        }

        info!(
            "Reactor shut down after {} completions ({} failed)",
            self.counters.completions, self.counters.failed_completions
        );
        Ok(())
    }

    /// One pass through the state machine.
    ///
    /// Returns the number of completion records recycled; zero after a
    /// timeout or an empty drain.
    ///
    /// # Errors
    ///
    /// Any stack failure, or a completion record that does not match an
    /// in-flight descriptor.
    pub fn cycle(&mut self) -> Result<usize> {
        self.state = ReactorState::Armed;
        self.stack.arm(self.queues.completion)?;

        self.state = ReactorState::Waiting;
        if self.stack.wait(self.wait_timeout)? == WaitOutcome::TimedOut {
            self.counters.timeouts += 1;
            self.flush_stats(Instant::now());
            return Ok(0);
        }

        self.state = ReactorState::Draining;
        let count = self
            .stack
            .dequeue(self.queues.completion, &mut self.batch)?;

        if count == 0 {
            warn!("Completion notification fired with an empty queue");
            self.counters.empty_drains += 1;
            return Ok(0);
        }

        self.state = ReactorState::Recycling;
        for index in 0..count {
            let record = self.batch[index];
            self.recycle(record)?;
        }

        self.counters.cycles += 1;
        self.flush_stats(Instant::now());
        Ok(count)
    }

    fn recycle(&mut self, record: CompletionRecord) -> Result<()> {
        let context = record.context;
        self.table
            .reclaim(context, record.bytes_transferred)
            .map_err(corrupted)?;
        self.counters.completions += 1;

        if record.is_ok() {
            trace!(
                "{} {} bytes on {}",
                self.role.verb(),
                record.bytes_transferred,
                context
            );
            self.stats.record(u64::from(record.bytes_transferred));
        } else {
            warn!(
                "{:?} on descriptor {} failed: {}",
                self.role,
                context,
                io::Error::from_raw_os_error(-record.status)
            );
            self.stats.record_error();
            self.counters.failed_completions += 1;
        }

        self.table.begin_refill(context).map_err(corrupted)?;
        self.prepare(context)?;
        self.submit(context)?;
        self.counters.resubmissions += 1;
        Ok(())
    }

    /// Set the descriptor's length and, for senders, write the next payload
    fn prepare(&mut self, context: RequestContext) -> Result<()> {
        match self.role {
            Role::Receive => {
                let slot_size = self.pool.slot_size() as u32;
                self.table
                    .set_length(context, slot_size)
                    .map_err(corrupted)?;
            }
            Role::Send => {
                let offset = self
                    .table
                    .get(context)
                    .ok_or(DescriptorError::UnknownContext(context))
                    .map_err(corrupted)?
                    .offset();

                // SAFETY: the descriptor is Refilling, so no operation is
                // outstanding on its slot and nothing else references it.
                let slot = unsafe { self.pool.slice_mut(offset, PAYLOAD_LEN as u32) }
                    .ok_or_else(|| RioError::corruption(format!("slot {} out of range", context)))?;

                let (_, len) = self
                    .sequence
                    .fill(slot)
                    .ok_or_else(|| RioError::corruption(format!("slot {} too small", context)))?;

                self.table
                    .set_length(context, len as u32)
                    .map_err(corrupted)?;
            }
        }
        Ok(())
    }

    fn submit(&mut self, context: RequestContext) -> Result<()> {
        let buf = self
            .table
            .get(context)
            .ok_or(DescriptorError::UnknownContext(context))
            .map_err(corrupted)?
            .buf();

        match self.role {
            Role::Receive => self
                .stack
                .submit_receive(self.queues.request, &buf, context)?,
            Role::Send => {
                self.stack
                    .submit_send(self.queues.request, &buf, self.destination, context)?;
            }
        }

        self.table.mark_in_flight(context).map_err(corrupted)
    }

    fn flush_stats(&mut self, now: Instant) {
        if let Some(report) = self.stats.maybe_flush(now) {
            (self.reporter)(&report);
        }
    }

    /// Current state machine position
    #[must_use]
    pub fn state(&self) -> ReactorState {
        self.state
    }

    /// Transceiver direction
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Operations currently owned by the stack
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.table.in_flight()
    }

    /// Number of descriptors (= slots = concurrency limit)
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        self.table.len()
    }

    /// Look up a descriptor by context
    #[must_use]
    pub fn descriptor(&self, context: RequestContext) -> Option<&Descriptor> {
        self.table.get(context)
    }

    /// Registered region
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Lifetime counters
    #[must_use]
    pub fn counters(&self) -> ReactorCounters {
        self.counters
    }

    /// Statistics accumulated since the last report
    #[must_use]
    pub fn stats(&self) -> &StatsWindow {
        &self.stats
    }

    /// Handle that stops [`run`](Self::run) from another thread
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Underlying stack
    #[must_use]
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Underlying stack, mutably
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }
}

impl<S: RegisteredIo + std::fmt::Debug> std::fmt::Debug for Reactor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("stack", &self.stack)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("in_flight", &self.table.in_flight())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorState;
    use crate::payload;
    use crate::stack::{MemoryStack, MemoryStackHandle};
    use std::sync::Mutex;

    fn config(concurrency: u32, slot_size: usize) -> EngineConfig {
        EngineConfig {
            slot_size,
            concurrency_limit: concurrency,
            batch_size: concurrency as usize,
            wait_timeout_ms: 20,
            ..EngineConfig::receiver()
        }
    }

    fn reactor(
        concurrency: u32,
        slot_size: usize,
        role: Role,
    ) -> (Reactor<MemoryStack>, MemoryStackHandle) {
        let stack = MemoryStack::new("127.0.0.1:17185".parse().unwrap());
        let handle = stack.handle();
        let reactor = Reactor::new(stack, &config(concurrency, slot_size), role).unwrap();
        (reactor, handle)
    }

    #[test]
    fn test_invalid_config_allocates_nothing() {
        let stack = MemoryStack::new("127.0.0.1:1".parse().unwrap());
        let handle = stack.handle();

        let err = Reactor::new(stack, &config(4, 64), Role::Send).unwrap_err();
        assert!(matches!(err, RioError::Config(_)));
        assert_eq!(handle.submissions(), 0);
    }

    #[test]
    fn test_start_puts_every_slot_in_flight() {
        let (mut reactor, handle) = reactor(8, 256, Role::Receive);
        assert_eq!(reactor.in_flight(), 0);

        reactor.start().unwrap();
        reactor.start().unwrap();

        assert_eq!(reactor.in_flight(), 8);
        assert_eq!(handle.posted_receives(), 8);
        assert_eq!(handle.submissions(), 8);
    }

    #[test]
    fn test_sender_seeds_sequences() {
        let (mut reactor, handle) = reactor(3, 256, Role::Send);
        reactor.start().unwrap();

        let sequences: Vec<u64> = handle
            .sent()
            .iter()
            .map(|d| payload::decode(&d.payload).unwrap())
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(handle.sent().iter().all(|d| d.payload.len() == PAYLOAD_LEN));
    }

    #[test]
    fn test_timeout_returns_zero() {
        let (mut reactor, _handle) = reactor(2, 256, Role::Receive);
        reactor.start().unwrap();

        assert_eq!(reactor.cycle().unwrap(), 0);
        assert_eq!(reactor.counters().timeouts, 1);
        assert_eq!(reactor.state(), ReactorState::Waiting);
    }

    #[test]
    fn test_empty_drain_is_not_fatal() {
        let (mut reactor, handle) = reactor(2, 256, Role::Receive);
        reactor.start().unwrap();

        handle.wake();
        assert_eq!(reactor.cycle().unwrap(), 0);
        assert_eq!(reactor.counters().empty_drains, 1);
        assert_eq!(reactor.in_flight(), 2);
    }

    #[test]
    fn test_failed_send_still_recycled() {
        let (mut reactor, handle) = reactor(2, 256, Role::Send);
        reactor.start().unwrap();
        handle.take_sent();

        assert_eq!(handle.fail_sends(1, libc::ECONNREFUSED), 1);
        assert_eq!(reactor.cycle().unwrap(), 1);

        let counters = reactor.counters();
        assert_eq!(counters.failed_completions, 1);
        assert_eq!(counters.resubmissions, 1);
        assert_eq!(reactor.stats().errors(), 1);
        assert_eq!(reactor.stats().packets(), 0);
        assert_eq!(reactor.in_flight(), 2);

        let resent = handle.take_sent();
        assert_eq!(resent.len(), 1);
        assert_eq!(payload::decode(&resent[0].payload), Some(2));
    }

    #[test]
    fn test_receive_cycle_records_bytes() {
        let (mut reactor, handle) = reactor(4, 256, Role::Receive);
        reactor.start().unwrap();

        handle.deliver(&[1; 40]);
        handle.deliver(&[2; 60]);
        assert_eq!(reactor.cycle().unwrap(), 2);

        assert_eq!(reactor.stats().bytes(), 100);
        assert_eq!(reactor.stats().packets(), 2);
        assert_eq!(reactor.in_flight(), 4);
        assert_eq!(reactor.state(), ReactorState::Recycling);

        let first = reactor.descriptor(RequestContext(0)).unwrap();
        assert_eq!(first.state(), DescriptorState::InFlight);
        assert_eq!(first.length(), 256);
        assert_eq!(first.last_transferred(), 40);
    }

    #[test]
    fn test_corruption_is_fatal() {
        let (mut reactor, handle) = reactor(2, 256, Role::Receive);
        reactor.start().unwrap();
        let before = handle.submissions();

        handle.corrupt();
        let err = reactor.run().unwrap_err();

        assert!(matches!(err, RioError::Corruption { .. }));
        assert_eq!(handle.submissions(), before);
    }

    #[test]
    fn test_reporter_receives_flush() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);

        let stack = MemoryStack::new("127.0.0.1:17185".parse().unwrap());
        let handle = stack.handle();
        let mut cfg = config(2, 256);
        cfg.stats_interval_ms = 1;
        let mut reactor = Reactor::new(stack, &cfg, Role::Receive)
            .unwrap()
            .with_reporter(move |report| sink.lock().unwrap().push(*report));
        reactor.start().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        handle.deliver(&[0; 10]);
        reactor.cycle().unwrap();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].bytes, 10);
        assert_eq!(reports[0].packets, 1);
    }

    #[test]
    fn test_batch_wider_than_ring() {
        let stack = MemoryStack::new("127.0.0.1:17185".parse().unwrap());
        let handle = stack.handle();
        let mut cfg = EngineConfig::sender();
        cfg.concurrency_limit = 2;
        cfg.wait_timeout_ms = 20;

        let mut reactor = Reactor::new(stack, &cfg, Role::Send).unwrap();
        reactor.start().unwrap();
        handle.take_sent();

        assert_eq!(handle.complete_sends(2), 2);
        assert_eq!(reactor.cycle().unwrap(), 2);

        let sequences: Vec<u64> = handle
            .take_sent()
            .iter()
            .map(|d| payload::decode(&d.payload).unwrap())
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn test_idle_timeout_flushes_pending_stats() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);

        let stack = MemoryStack::new("127.0.0.1:17185".parse().unwrap());
        let handle = stack.handle();
        let mut cfg = config(4, 512);
        cfg.stats_interval_ms = 200;
        let mut reactor = Reactor::new(stack, &cfg, Role::Receive)
            .unwrap()
            .with_reporter(move |report| sink.lock().unwrap().push(*report));
        reactor.start().unwrap();

        for size in [500usize, 300, 200] {
            handle.deliver(&vec![0; size]);
        }
        assert_eq!(reactor.cycle().unwrap(), 3);
        assert!(reports.lock().unwrap().is_empty());

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(reactor.cycle().unwrap(), 0);
        assert_eq!(reactor.counters().timeouts, 1);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!((reports[0].bytes, reports[0].packets), (1000, 3));
        assert_eq!((reactor.stats().bytes(), reactor.stats().packets()), (0, 0));
    }

    #[test]
    fn test_shutdown_handle_stops_run() {
        let (mut reactor, _handle) = reactor(2, 256, Role::Receive);
        let shutdown = reactor.shutdown_handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            shutdown.trigger();
        });

        reactor.run().unwrap();
        stopper.join().unwrap();
        assert_eq!(reactor.in_flight(), 2);
    }
}
