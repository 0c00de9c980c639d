//! RIOX CLI
//!
//! Registered-I/O UDP transceivers and their blocking baseline.

mod config;

use clap::{Args, Parser, Subcommand};
use riox_transport::payload::PAYLOAD_LEN;
use riox_transport::{
    BlockingReceiver, BlockingSender, EngineConfig, MemoryStack, Reactor, RegisteredIo, Role,
    ShutdownHandle, StatsReport,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::{Backend, Config};

/// RIOX - registered-buffer UDP senders and receivers
#[derive(Parser)]
#[command(name = "riox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to ~/.config/riox/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Blocking receiver: one recv_from per datagram
    Recv {
        #[command(flatten)]
        net: NetArgs,
    },

    /// Blocking sender: one sequence payload per interval
    Send {
        #[command(flatten)]
        net: NetArgs,

        /// Milliseconds between sends
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Registered I/O receiver
    RecvRio {
        #[command(flatten)]
        net: NetArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Registered I/O sender
    SendRio {
        #[command(flatten)]
        net: NetArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Address overrides
#[derive(Args, Debug, Default)]
struct NetArgs {
    /// Local address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Local port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Destination address (senders)
    #[arg(long)]
    remote: Option<IpAddr>,

    /// Destination port (senders)
    #[arg(long)]
    remote_port: Option<u16>,
}

/// Registered I/O engine overrides
#[derive(Args, Debug, Default)]
struct EngineArgs {
    /// Bytes per buffer slot
    #[arg(long)]
    slot_size: Option<usize>,

    /// Operations kept in flight (= slots in the pool)
    #[arg(long)]
    concurrency: Option<u32>,

    /// Completions drained per wake-up
    #[arg(long)]
    batch: Option<usize>,

    /// Milliseconds between statistics lines
    #[arg(long)]
    stats_interval_ms: Option<u64>,

    /// Registered I/O stack
    #[arg(long, value_enum)]
    backend: Option<Backend>,
}

impl NetArgs {
    fn apply(&self, engine: &mut EngineConfig) {
        if let Some(bind) = self.bind {
            engine.bind_address = bind;
        }
        if let Some(port) = self.port {
            engine.bind_port = port;
        }
        if let Some(remote) = self.remote {
            engine.remote_address = remote;
        }
        if let Some(port) = self.remote_port {
            engine.remote_port = port;
        }
    }
}

impl EngineArgs {
    fn apply(&self, config: &mut Config, role: Role) {
        let engine = config.engine_mut(role);
        if let Some(slot_size) = self.slot_size {
            engine.slot_size = slot_size;
        }
        if let Some(concurrency) = self.concurrency {
            engine.concurrency_limit = concurrency;
        }
        if let Some(batch) = self.batch {
            engine.batch_size = batch;
        }
        if let Some(ms) = self.stats_interval_ms {
            engine.stats_interval_ms = ms;
        }
        if let Some(backend) = self.backend {
            config.backend.kind = backend;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `config init` must work before any file exists
    let mut config = if matches!(
        cli.command,
        Commands::Config {
            action: ConfigAction::Init { .. }
        }
    ) {
        Config::default()
    } else {
        Config::resolve(cli.config.as_deref())?
    };

    match &cli.command {
        Commands::Recv { net } | Commands::RecvRio { net, .. } => {
            net.apply(&mut config.receiver);
        }
        Commands::Send { net, .. } | Commands::SendRio { net, .. } => {
            net.apply(&mut config.sender);
        }
        Commands::Config { .. } => {}
    }
    match &cli.command {
        Commands::RecvRio { engine, .. } => engine.apply(&mut config, Role::Receive),
        Commands::SendRio { engine, .. } => engine.apply(&mut config, Role::Send),
        Commands::Send {
            interval_ms: Some(ms),
            ..
        } => config.blocking.send_interval_ms = *ms,
        _ => {}
    }

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Recv { .. } => run_blocking_receiver(&config).await?,
        Commands::Send { .. } => run_blocking_sender(&config).await?,
        Commands::RecvRio { .. } => run_reactor(&config, Role::Receive).await?,
        Commands::SendRio { .. } => run_reactor(&config, Role::Send).await?,
        Commands::Config { action } => run_config(action, &config, cli.config)?,
    }

    Ok(())
}

fn print_report(report: &StatsReport) {
    println!("{}", report);
}

/// Run `job` on a blocking thread until it fails or Ctrl+C triggers `shutdown`
async fn run_until_ctrl_c<F>(shutdown: ShutdownHandle, job: F) -> anyhow::Result<()>
where
    F: FnOnce() -> riox_transport::Result<()> + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(job);

    tokio::select! {
        result = &mut task => result??,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("\nShutting down...");
            shutdown.trigger();
            task.await??;
        }
    }

    Ok(())
}

/// Blocking `recv_from` loop
async fn run_blocking_receiver(config: &Config) -> anyhow::Result<()> {
    let mut receiver = BlockingReceiver::bind(&config.receiver)?.with_reporter(print_report);
    let shutdown = receiver.shutdown_handle();

    println!("Listening on {}", receiver.local_addr()?);
    println!("Press Ctrl+C to stop");

    run_until_ctrl_c(shutdown, move || receiver.run()).await
}

/// Blocking `send_to` loop
async fn run_blocking_sender(config: &Config) -> anyhow::Result<()> {
    let mut sender = BlockingSender::bind(&config.sender, config.blocking.send_interval())?
        .with_reporter(print_report);
    let shutdown = sender.shutdown_handle();

    println!(
        "Sending {} byte payloads from {} to {} every {}ms",
        PAYLOAD_LEN,
        sender.local_addr()?,
        config.sender.remote_addr(),
        config.blocking.send_interval_ms
    );
    println!("Press Ctrl+C to stop");

    run_until_ctrl_c(shutdown, move || sender.run()).await
}

/// Registered I/O reactor on the configured backend
async fn run_reactor(config: &Config, role: Role) -> anyhow::Result<()> {
    let engine = config.engine(role).clone();
    let shutdown = ShutdownHandle::new();

    println!("RIOX {:?} engine", role);
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Backend: {:?}", config.backend.kind);
    println!("Local: {}", engine.bind_addr());
    if role == Role::Send {
        println!("Remote: {}", engine.remote_addr());
    }
    println!(
        "Pool: {} slots x {} bytes, batch {}",
        engine.concurrency_limit, engine.slot_size, engine.batch_size
    );
    println!("Press Ctrl+C to stop");

    match config.backend.kind {
        Backend::Memory => {
            let job_shutdown = shutdown.clone();
            run_until_ctrl_c(shutdown, move || {
                run_memory_engine(&engine, role, job_shutdown)
            })
            .await
        }
        Backend::Uring => run_uring(engine, role, shutdown).await,
    }
}

#[cfg(target_os = "linux")]
async fn run_uring(engine: EngineConfig, role: Role, shutdown: ShutdownHandle) -> anyhow::Result<()> {
    let job_shutdown = shutdown.clone();
    run_until_ctrl_c(shutdown, move || {
        let stack = riox_transport::UringStack::bind(engine.bind_addr())?;
        drive(stack, &engine, role, job_shutdown)
    })
    .await
}

#[cfg(not(target_os = "linux"))]
async fn run_uring(_engine: EngineConfig, _role: Role, _shutdown: ShutdownHandle) -> anyhow::Result<()> {
    anyhow::bail!("The uring backend is only available on Linux")
}

fn drive<S: RegisteredIo>(
    stack: S,
    engine: &EngineConfig,
    role: Role,
    shutdown: ShutdownHandle,
) -> riox_transport::Result<()> {
    Reactor::new(stack, engine, role)?
        .with_reporter(print_report)
        .with_shutdown(shutdown)
        .run()
}

/// Dry run against the in-process stack.
///
/// Sends complete immediately; receives are fed with sequence payloads by a
/// helper thread for as long as the reactor runs.
fn run_memory_engine(
    engine: &EngineConfig,
    role: Role,
    shutdown: ShutdownHandle,
) -> riox_transport::Result<()> {
    let stack = MemoryStack::new(engine.bind_addr())
        .with_auto_complete_sends(true)
        .with_sent_log(0);
    let wire = stack.handle();

    let feeder = (role == Role::Receive).then(|| {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            let mut payload = [0u8; PAYLOAD_LEN];
            let mut sequence = riox_transport::payload::SequenceGenerator::default();
            while !shutdown.is_triggered() {
                if wire.posted_receives() == 0 {
                    std::thread::sleep(Duration::from_micros(50));
                    continue;
                }
                if sequence.fill(&mut payload).is_some() {
                    wire.deliver(&payload);
                }
            }
        })
    });

    let result = drive(stack, engine, role, shutdown.clone());

    // Stop the feeder whether the reactor exited cleanly or not
    shutdown.trigger();
    if let Some(feeder) = feeder {
        join_feeder(feeder);
    }
    result
}

/// Join the memory backend feeder, reporting whether it exited cleanly
fn join_feeder(feeder: std::thread::JoinHandle<()>) -> bool {
    match feeder.join() {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!("Memory backend feeder thread panicked");
            false
        }
    }
}

fn run_config(action: ConfigAction, config: &Config, path: Option<PathBuf>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Init { force } => {
            let path = path.unwrap_or_else(Config::default_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feeder_panic_is_reported() {
        let feeder = std::thread::spawn(|| panic!("feeder failed"));
        assert!(!join_feeder(feeder));

        let feeder = std::thread::spawn(|| {});
        assert!(join_feeder(feeder));
    }

    #[test]
    fn test_memory_dry_run_sender_stops_on_shutdown() {
        let mut engine = EngineConfig::sender();
        engine.concurrency_limit = 2;
        engine.wait_timeout_ms = 5;
        let shutdown = ShutdownHandle::new();
        let stopper = shutdown.clone();

        let timer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.trigger();
        });

        run_memory_engine(&engine, Role::Send, shutdown).unwrap();
        timer.join().unwrap();
    }
}
