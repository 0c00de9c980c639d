//! # RIOX Transport
//!
//! Registered-buffer UDP transceiver engine.
//!
//! This crate provides:
//! - A buffer pool registered once with the I/O stack, sliced into fixed slots
//! - A descriptor ring binding one reusable descriptor to each slot
//! - Request/completion queue wiring behind the [`RegisteredIo`] trait, with an
//!   io_uring backend on Linux and a deterministic in-memory backend
//! - A completion reactor that keeps every slot in flight
//! - Elapsed-time throughput statistics
//! - A blocking `recv_from` / `send_to` baseline
//!
//! ## Example
//!
//! ```
//! use riox_transport::{EngineConfig, MemoryStack, Reactor, Role};
//!
//! let stack = MemoryStack::new("127.0.0.1:17185".parse().unwrap());
//! let wire = stack.handle();
//!
//! let mut config = EngineConfig::receiver();
//! config.concurrency_limit = 4;
//! config.batch_size = 4;
//!
//! let mut reactor = Reactor::new(stack, &config, Role::Receive).unwrap();
//! reactor.start().unwrap();
//!
//! wire.deliver(&[0u8; 100]);
//! assert_eq!(reactor.cycle().unwrap(), 1);
//! assert_eq!(reactor.in_flight(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod payload;
pub mod pool;
pub mod queue;
pub mod reactor;
pub mod stack;
pub mod stats;
pub mod udp;

pub use config::{EngineConfig, Role};
pub use descriptor::{Descriptor, DescriptorState, DescriptorTable};
pub use error::{ConfigError, ErrorKind, Result, RioError};
pub use pool::BufferPool;
pub use queue::{CompletionRecord, RequestContext, RioBuf};
pub use reactor::{Reactor, ReactorCounters, ReactorState, ShutdownHandle};
pub use stack::{MemoryStack, MemoryStackHandle, RegisteredIo, SentDatagram, WaitOutcome};
pub use stats::{StatsReport, StatsWindow};
pub use udp::{BlockingReceiver, BlockingSender};

#[cfg(target_os = "linux")]
pub use stack::UringStack;
