//! Blocking UDP baseline.
//!
//! Plain `recv_from` / `send_to` transceivers used to compare against the
//! registered I/O engine. They share the engine's configuration, payload
//! format, statistics and shutdown handle.
//!
//! - [`BlockingReceiver`] logs every datagram size and feeds the statistics
//!   window.
//! - [`BlockingSender`] sends one sequence-numbered payload per
//!   `send_interval`, incrementing the sequence before each send.

use crate::config::{EngineConfig, Role};
use crate::error::{Result, RioError};
use crate::payload::{PAYLOAD_LEN, SequenceGenerator};
use crate::reactor::ShutdownHandle;
use crate::stats::{Reporter, StatsReport, StatsWindow, log_reporter};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default delay between blocking sends
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(500);

/// Receive buffer size of the blocking receiver
pub const RECV_BUFFER_LEN: usize = 1024;

fn bind_socket(addr: SocketAddr, read_timeout: Duration) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
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
        .bind(&addr.into())
        .map_err(|source| RioError::Socket { op: "bind", source })?;

    // The read timeout bounds every blocking call so shutdown is noticed
    socket
        .set_read_timeout(Some(read_timeout))
        .map_err(|source| RioError::Socket {
            op: "set SO_RCVTIMEO",
            source,
        })?;

    Ok(socket.into())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Blocking datagram receiver
pub struct BlockingReceiver {
    socket: UdpSocket,
    recv_buf: Vec<u8>,
    stats: StatsWindow,
    reporter: Reporter,
    shutdown: ShutdownHandle,
}

impl BlockingReceiver {
    /// Bind to `config.bind_addr()`
    ///
    /// # Errors
    ///
    /// `RioError::Config` or `RioError::Socket`.
    pub fn bind(config: &EngineConfig) -> Result<Self> {
        config.validate(Role::Receive)?;
        let socket = bind_socket(config.bind_addr(), config.wait_timeout())?;

        Ok(Self {
            socket,
            recv_buf: vec![0u8; RECV_BUFFER_LEN],
            stats: StatsWindow::new(Instant::now(), config.stats_interval(), Role::Receive),
            reporter: log_reporter(),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Replace the default `info!` statistics output
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FnMut(&StatsReport) + Send + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Use an existing shutdown handle
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// `RioError::Socket` if the address cannot be read back.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|source| RioError::Socket {
            op: "getsockname",
            source,
        })
    }

    /// Receive one datagram, or `None` if the read timed out
    ///
    /// # Errors
    ///
    /// `RioError::Socket` on any other receive failure.
    pub fn recv_one(&mut self) -> Result<Option<usize>> {
        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((len, from)) => {
                debug!("Received {} Bytes from {}", len, from);
                self.stats.record(len as u64);
                Ok(Some(len))
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(source) => Err(RioError::Socket { op: "recv", source }),
        }
    }

    /// Most recently received bytes
    #[must_use]
    pub fn recv_buffer(&self) -> &[u8] {
        &self.recv_buf
    }

    /// Statistics since the last report
    #[must_use]
    pub fn stats(&self) -> &StatsWindow {
        &self.stats
    }

    /// Handle that stops [`run`](Self::run)
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Receive until shutdown
    ///
    /// # Errors
    ///
    /// The first receive failure.
    pub fn run(&mut self) -> Result<()> {
        info!("Blocking receiver listening on {}", self.local_addr()?);

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.recv_one() {
                error!("Blocking receiver stopped: {}", e);
                return Err(e);
            }
            if let Some(report) = self.stats.maybe_flush(Instant::now()) {
                (self.reporter)(&report);
            }
        }
        Ok(())
    }
}

/// Blocking sequence sender
pub struct BlockingSender {
    socket: UdpSocket,
    destination: SocketAddr,
    payload: [u8; PAYLOAD_LEN],
    sequence: SequenceGenerator,
    interval: Duration,
    tick: Duration,
    stats: StatsWindow,
    reporter: Reporter,
    shutdown: ShutdownHandle,
}

impl BlockingSender {
    /// Bind to `config.bind_addr()` and target `config.remote_addr()`
    ///
    /// # Errors
    ///
    /// `RioError::Config` or `RioError::Socket`.
    pub fn bind(config: &EngineConfig, interval: Duration) -> Result<Self> {
        config.validate(Role::Send)?;
        let socket = bind_socket(config.bind_addr(), config.wait_timeout())?;

        Ok(Self {
            socket,
            destination: config.remote_addr(),
            payload: [0u8; PAYLOAD_LEN],
            // The counter is bumped before each send, so the first payload is 1
            sequence: SequenceGenerator::starting_at(1),
            interval,
            tick: config.wait_timeout(),
            stats: StatsWindow::new(Instant::now(), config.stats_interval(), Role::Send),
            reporter: log_reporter(),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Replace the default `info!` statistics output
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FnMut(&StatsReport) + Send + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Use an existing shutdown handle
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// `RioError::Socket` if the address cannot be read back.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|source| RioError::Socket {
            op: "getsockname",
            source,
        })
    }

    /// Statistics since the last report
    #[must_use]
    pub fn stats(&self) -> &StatsWindow {
        &self.stats
    }

    /// Handle that stops [`run`](Self::run)
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Send the next payload; returns its sequence number
    ///
    /// # Errors
    ///
    /// `RioError::Socket` if the send fails.
    pub fn send_one(&mut self) -> Result<u64> {
        let (sequence, len) = self
            .sequence
            .fill(&mut self.payload)
            .ok_or_else(|| RioError::Socket {
                op: "encode",
                source: io::Error::from(io::ErrorKind::InvalidInput),
            })?;

        let sent = self
            .socket
            .send_to(&self.payload[..len], self.destination)
            .map_err(|source| RioError::Socket { op: "send", source })?;

        debug!("Sent sequence {} ({} bytes) to {}", sequence, sent, self.destination);
        self.stats.record(sent as u64);
        Ok(sequence)
    }

    /// Send until shutdown, one payload per interval
    ///
    /// # Errors
    ///
    /// The first send failure.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "Blocking sender {} -> {} every {:?}",
            self.local_addr()?,
            self.destination,
            self.interval
        );

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.send_one() {
                error!("Blocking sender stopped: {}", e);
                return Err(e);
            }
            if let Some(report) = self.stats.maybe_flush(Instant::now()) {
                (self.reporter)(&report);
            }
            self.pause();
        }
        Ok(())
    }

    /// Sleep for one interval in `tick` steps, returning early on shutdown
    fn pause(&self) {
        let deadline = Instant::now() + self.interval;
        loop {
            let now = Instant::now();
            if now >= deadline || self.shutdown.is_triggered() {
                return;
            }
            std::thread::sleep(self.tick.min(deadline - now));
        }
    }
}
