//! Error types for the registered I/O engine.
//!
//! Every variant except [`ConfigError`] is terminal: the engine performs no
//! local recovery, retry or backoff. The only condition that is *not* an error
//! is an empty drain after a signaled wait, which the reactor logs and skips.

use std::io;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum RioError {
    /// Configuration rejected before any resource was allocated
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Stack or helper object could not be initialized
    #[error("{op} failed: {source}")]
    Initialization {
        /// Failing operation
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Socket creation, option or bind failure
    #[error("socket {op} failed: {source}")]
    Socket {
        /// Failing operation
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The stack lacks an operation the engine depends on
    #[error("feature discovery failed: {0}")]
    FeatureDiscovery(String),

    /// The buffer pool region could not be allocated
    #[error("failed to allocate {size} byte buffer pool: {source}")]
    Allocation {
        /// Requested region size
        size: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The stack rejected the buffer region
    #[error("buffer registration failed: {source}")]
    Registration {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Request or completion queue could not be created
    #[error("queue creation failed: {source}")]
    QueueCreation {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Waiting on the completion notification failed
    #[error("wait for completion failed: {source}")]
    Wait {
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The completion queue is in an unrecoverable state
    #[error("completion queue corrupted: {detail}")]
    Corruption {
        /// What was observed
        detail: String,
    },

    /// A receive or send could not be enqueued
    #[error("{op} submission failed: {source}")]
    Submission {
        /// Failing operation
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of [`RioError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration rejected
    Config,
    /// Stack initialization
    Initialization,
    /// Socket setup
    Socket,
    /// Missing stack capability
    FeatureDiscovery,
    /// Allocation, registration or queue creation
    Resource,
    /// Notification wait
    Wait,
    /// Completion queue corruption
    Corruption,
    /// Request queue submission
    Submission,
}

impl RioError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Initialization { .. } => ErrorKind::Initialization,
            Self::Socket { .. } => ErrorKind::Socket,
            Self::FeatureDiscovery(_) => ErrorKind::FeatureDiscovery,
            Self::Allocation { .. } | Self::Registration { .. } | Self::QueueCreation { .. } => {
                ErrorKind::Resource
            }
            Self::Wait { .. } => ErrorKind::Wait,
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::Submission { .. } => ErrorKind::Submission,
        }
    }

    /// Underlying OS error code, when the stack reported one
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Initialization { source, .. }
            | Self::Socket { source, .. }
            | Self::Allocation { source, .. }
            | Self::Registration { source }
            | Self::QueueCreation { source }
            | Self::Wait { source }
            | Self::Submission { source, .. } => source.raw_os_error(),
            Self::Config(_) | Self::FeatureDiscovery(_) | Self::Corruption { .. } => None,
        }
    }

    pub(crate) fn corruption(detail: impl Into<String>) -> Self {
        Self::Corruption {
            detail: detail.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A size or duration was zero
    #[error("{field} must be greater than zero")]
    Zero {
        /// Offending field
        field: &'static str,
    },

    /// A value exceeded its permitted range
    #[error("{field} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        /// Offending field
        field: &'static str,
        /// Supplied value
        value: u64,
        /// Lower bound
        min: u64,
        /// Upper bound
        max: u64,
    },

    /// The slot cannot hold the fixed send payload
    #[error("slot_size {slot_size} cannot hold the {required} byte send payload")]
    SlotTooSmall {
        /// Configured slot size
        slot_size: usize,
        /// Payload size
        required: usize,
    },

    /// slot_size × concurrency_limit does not fit 32-bit descriptor offsets
    #[error("buffer region of {size} bytes exceeds the 4 GiB descriptor limit")]
    RegionTooLarge {
        /// Requested region size
        size: u64,
    },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, RioError>;
