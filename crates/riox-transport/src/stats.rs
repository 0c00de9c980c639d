//! Throughput statistics.
//!
//! A [`StatsWindow`] accumulates bytes and packets since its last flush. The
//! caller passes the current time in, so a window is a pure function of its
//! counters and the supplied clock.

use crate::config::Role;
use std::fmt;
use std::time::{Duration, Instant};

/// Destination for flushed reports
pub(crate) type Reporter = Box<dyn FnMut(&StatsReport) + Send>;

/// Default reporter: one `info!` line per report
pub(crate) fn log_reporter() -> Reporter {
    Box::new(|report| tracing::info!("{}", report))
}

/// One reporting interval's worth of counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsReport {
    /// Direction being measured
    pub role: Role,
    /// Bytes moved in the interval
    pub bytes: u64,
    /// Datagrams moved in the interval
    pub packets: u64,
    /// Failed completions in the interval
    pub errors: u64,
    /// Actual length of the interval
    pub elapsed: Duration,
}

impl StatsReport {
    /// Datagrams per second
    #[must_use]
    pub fn packet_rate(&self) -> f64 {
        per_second(self.packets, self.elapsed)
    }

    /// Bits per second
    #[must_use]
    pub fn bit_rate(&self) -> f64 {
        per_second(self.bytes.saturating_mul(8), self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} bytes ({} packets) in {}ms => {:.0} pkt/s or {:.0} bit/s",
            self.role.verb(),
            self.bytes,
            self.packets,
            self.elapsed.as_millis(),
            self.packet_rate(),
            self.bit_rate()
        )?;
        if self.errors > 0 {
            write!(f, " ({} failed)", self.errors)?;
        }
        Ok(())
    }
}

/// Rolling counters flushed on elapsed time
#[derive(Debug, Clone)]
pub struct StatsWindow {
    role: Role,
    interval: Duration,
    started: Instant,
    bytes: u64,
    packets: u64,
    errors: u64,
}

impl StatsWindow {
    /// Open a window at `now`
    #[must_use]
    pub fn new(now: Instant, interval: Duration, role: Role) -> Self {
        Self {
            role,
            interval,
            started: now,
            bytes: 0,
            packets: 0,
            errors: 0,
        }
    }

    /// Count one datagram of `bytes`
    pub fn record(&mut self, bytes: u64) {
        self.bytes += bytes;
        self.packets += 1;
    }

    /// Count one failed operation
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Reporting interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Bytes since the last flush
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Packets since the last flush
    #[must_use]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Failures since the last flush
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Emit a report and reset if at least one interval has elapsed
    pub fn maybe_flush(&mut self, now: Instant) -> Option<StatsReport> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.interval {
            return None;
        }

        let report = StatsReport {
            role: self.role,
            bytes: self.bytes,
            packets: self.packets,
            errors: self.errors,
            elapsed,
        };

        self.started = now;
        self.bytes = 0;
        self.packets = 0;
        self.errors = 0;
        Some(report)
    }
}
