//! Configuration system for the RIOX CLI.

use clap::ValueEnum;
use riox_transport::udp::DEFAULT_SEND_INTERVAL;
use riox_transport::{EngineConfig, Role};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// RIOX configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Receive-side engine settings
    #[serde(default = "EngineConfig::receiver")]
    pub receiver: EngineConfig,
    /// Send-side engine settings
    #[serde(default = "EngineConfig::sender", deserialize_with = "sender_section")]
    pub sender: EngineConfig,
    /// Registered I/O backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Blocking baseline settings
    #[serde(default)]
    pub blocking: BlockingConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registered I/O stack implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kernel io_uring with fixed buffers (Linux)
    Uring,
    /// In-process stack; sends complete instantly, receives are self-fed
    Memory,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Which stack drives the reactor
    #[serde(default = "default_backend")]
    pub kind: Backend,
}

/// Blocking baseline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingConfig {
    /// Delay between blocking sends in milliseconds
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_backend() -> Backend {
    if cfg!(target_os = "linux") {
        Backend::Uring
    } else {
        Backend::Memory
    }
}

fn default_send_interval_ms() -> u64 {
    DEFAULT_SEND_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Fill fields missing from `[sender]` with sender defaults, not receiver ones
fn sender_section<'de, D>(deserializer: D) -> Result<EngineConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let overrides = toml::Table::deserialize(deserializer)?;
    let mut merged = match toml::Value::try_from(EngineConfig::sender()).map_err(D::Error::custom)? {
        toml::Value::Table(table) => table,
        _ => return Err(D::Error::custom("sender defaults did not serialize to a table")),
    };
    merged.extend(overrides);
    toml::Value::Table(merged)
        .try_into()
        .map_err(D::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            receiver: EngineConfig::receiver(),
            sender: EngineConfig::sender(),
            backend: BackendConfig::default(),
            blocking: BlockingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend(),
        }
    }
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BlockingConfig {
    /// Delay between blocking sends
    #[must_use]
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("riox/config.toml")
    }

    /// Load `path` if given, else the default path if it exists, else defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing or any file is invalid.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Engine settings for `role`
    #[must_use]
    pub fn engine(&self, role: Role) -> &EngineConfig {
        match role {
            Role::Receive => &self.receiver,
            Role::Send => &self.sender,
        }
    }

    /// Engine settings for `role`, mutably
    pub fn engine_mut(&mut self, role: Role) -> &mut EngineConfig {
        match role {
            Role::Receive => &mut self.receiver,
            Role::Send => &mut self.sender,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.receiver
            .validate(Role::Receive)
            .map_err(|e| anyhow::anyhow!("[receiver] {}", e))?;
        self.sender
            .validate(Role::Send)
            .map_err(|e| anyhow::anyhow!("[sender] {}", e))?;

        if self.blocking.send_interval_ms == 0 {
            anyhow::bail!("[blocking] send_interval_ms must be greater than zero");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.backend.kind == Backend::Uring && !cfg!(target_os = "linux") {
            anyhow::bail!("The uring backend is only available on Linux");
        }

        Ok(())
    }
}
