//! Engine configuration.
//!
//! Everything the transceivers need is passed in at construction time; there
//! is no process-wide state. Defaults mirror the classic test setup: the
//! receiver listens on UDP port 0x4321, the sender binds 0x1234 and targets
//! the receiver over loopback.

use crate::error::ConfigError;
use crate::payload::PAYLOAD_LEN;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default receive (destination) port
pub const DEFAULT_RECV_PORT: u16 = 0x4321;

/// Default send (source) port
pub const DEFAULT_SEND_PORT: u16 = 0x1234;

/// Default slot size in bytes
pub const DEFAULT_SLOT_SIZE: usize = 1024;

/// Default number of outstanding operations
pub const DEFAULT_CONCURRENCY: u32 = 128;

/// Default number of completions drained per wake-up
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Upper bound on outstanding operations (io_uring ring entry limit)
pub const MAX_CONCURRENCY: u32 = 4096;

/// Direction a transceiver moves data in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Post receives, count delivered bytes
    Receive,
    /// Post sends carrying sequence-numbered payloads
    Send,
}

impl Role {
    /// Verb used in statistics reports
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Receive => "Received",
            Self::Send => "Sent",
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local address to bind
    pub bind_address: IpAddr,
    /// Local port to bind (0 = ephemeral)
    pub bind_port: u16,
    /// Destination address for the send role
    pub remote_address: IpAddr,
    /// Destination port for the send role
    pub remote_port: u16,
    /// Size of each buffer slot in bytes
    pub slot_size: usize,
    /// Slots in the pool, and therefore operations kept in flight
    pub concurrency_limit: u32,
    /// Maximum completions drained per wake-up
    pub batch_size: usize,
    /// Statistics reporting interval in milliseconds
    pub stats_interval_ms: u64,
    /// Upper bound on a single notification wait in milliseconds
    pub wait_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::receiver()
    }
}

impl EngineConfig {
    /// Receiver defaults: any-address on the receive port
    #[must_use]
    pub fn receiver() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: DEFAULT_RECV_PORT,
            remote_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            remote_port: DEFAULT_RECV_PORT,
            slot_size: DEFAULT_SLOT_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            stats_interval_ms: 1000,
            wait_timeout_ms: 100,
        }
    }

    /// Sender defaults: source port 0x1234, loopback destination
    #[must_use]
    pub fn sender() -> Self {
        Self {
            bind_port: DEFAULT_SEND_PORT,
            ..Self::receiver()
        }
    }

    /// Local socket address
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }

    /// Destination socket address
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_address, self.remote_port)
    }

    /// Statistics reporting interval
    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Notification wait bound
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Size of the registered region in bytes
    #[must_use]
    pub fn region_size(&self) -> u64 {
        self.slot_size as u64 * u64::from(self.concurrency_limit)
    }

    /// Validate configuration for the given role
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self, role: Role) -> Result<(), ConfigError> {
        if self.slot_size == 0 {
            return Err(ConfigError::Zero { field: "slot_size" });
        }

        if role == Role::Send && self.slot_size < PAYLOAD_LEN {
            return Err(ConfigError::SlotTooSmall {
                slot_size: self.slot_size,
                required: PAYLOAD_LEN,
            });
        }

        if self.concurrency_limit == 0 || self.concurrency_limit > MAX_CONCURRENCY {
            return Err(ConfigError::OutOfRange {
                field: "concurrency_limit",
                value: u64::from(self.concurrency_limit),
                min: 1,
                max: u64::from(MAX_CONCURRENCY),
            });
        }

        if self.batch_size == 0 {
            return Err(ConfigError::Zero { field: "batch_size" });
        }

        if self.region_size() > u64::from(u32::MAX) {
            return Err(ConfigError::RegionTooLarge {
                size: self.region_size(),
            });
        }

        if self.stats_interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "stats_interval_ms",
            });
        }

        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "wait_timeout_ms",
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let recv = EngineConfig::receiver();
        assert_eq!(recv.bind_addr(), "0.0.0.0:17185".parse().unwrap());
        assert_eq!(recv.concurrency_limit, 128);
        assert_eq!(recv.batch_size, 16);
        assert!(recv.validate(Role::Receive).is_ok());

        let send = EngineConfig::sender();
        assert_eq!(send.bind_port, 0x1234);
        assert_eq!(send.remote_addr(), "127.0.0.1:17185".parse().unwrap());
        assert!(send.validate(Role::Send).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::receiver();
        config.slot_size = 0;
        assert_eq!(
            config.validate(Role::Receive),
            Err(ConfigError::Zero { field: "slot_size" })
        );

        let mut config = EngineConfig::receiver();
        config.concurrency_limit = MAX_CONCURRENCY + 1;
        assert!(matches!(
            config.validate(Role::Receive),
            Err(ConfigError::OutOfRange {
                field: "concurrency_limit",
                ..
            })
        ));

        let mut config = EngineConfig::receiver();
        config.batch_size = 0;
        assert!(matches!(
            config.validate(Role::Receive),
            Err(ConfigError::Zero {
                field: "batch_size"
            })
        ));

        // A batch wider than the ring is fine, drains stop at what is queued
        let mut config = EngineConfig::sender();
        config.concurrency_limit = 2;
        assert_eq!(config.batch_size, 16);
        assert!(config.validate(Role::Send).is_ok());

        let mut config = EngineConfig::receiver();
        config.wait_timeout_ms = 0;
        assert!(config.validate(Role::Receive).is_err());
    }

    #[test]
    fn test_send_role_needs_payload_room() {
        let mut config = EngineConfig::sender();
        config.slot_size = 100;

        // Receivers may use small slots, senders may not
        assert!(config.validate(Role::Receive).is_ok());
        assert_eq!(
            config.validate(Role::Send),
            Err(ConfigError::SlotTooSmall {
                slot_size: 100,
                required: PAYLOAD_LEN
            })
        );
    }

    #[test]
    fn test_region_limit() {
        let mut config = EngineConfig::receiver();
        config.slot_size = 2 * 1024 * 1024;
        config.concurrency_limit = 4096;
        assert!(matches!(
            config.validate(Role::Receive),
            Err(ConfigError::RegionTooLarge { .. })
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            bind_port = 9000
            slot_size = 136
            concurrency_limit = 4
            batch_size = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.slot_size, 136);
        assert_eq!(config.stats_interval_ms, 1000);
        assert_eq!(config.remote_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
