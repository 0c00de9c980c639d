//! Shared helpers for RIOX integration tests and benchmarks.

use riox_transport::{EngineConfig, MemoryStack, MemoryStackHandle, Reactor, Role};
use std::net::SocketAddr;

/// Address the in-memory stack pretends to be bound to
pub fn memory_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 17185))
}

/// Engine configuration with a small pool and a short wait timeout
pub fn small_config(role: Role, concurrency: u32, slot_size: usize) -> EngineConfig {
    let base = match role {
        Role::Receive => EngineConfig::receiver(),
        Role::Send => EngineConfig::sender(),
    };

    EngineConfig {
        slot_size,
        concurrency_limit: concurrency,
        wait_timeout_ms: 20,
        ..base
    }
}

/// Reactor on a fresh memory stack, plus the stack's wire handle
pub fn memory_reactor(
    role: Role,
    concurrency: u32,
    slot_size: usize,
) -> (Reactor<MemoryStack>, MemoryStackHandle) {
    memory_reactor_with(MemoryStack::new(memory_addr()), &small_config(role, concurrency, slot_size), role)
}

/// Reactor on a preconfigured memory stack
pub fn memory_reactor_with(
    stack: MemoryStack,
    config: &EngineConfig,
    role: Role,
) -> (Reactor<MemoryStack>, MemoryStackHandle) {
    let handle = stack.handle();
    let reactor = Reactor::new(stack, config, role).expect("reactor construction");
    (reactor, handle)
}

/// Check if running in a CI environment
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
}
