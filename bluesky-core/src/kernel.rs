//! Kernel lifecycle: runtime, logging, configuration.
//!
//! The kernel initializes once per process: logging first, then the shared
//! runtime that hosts every engine actor, then the transaction queue (which
//! spawns lazily on first use). Shutdown is two-phase: quiesce actors, then
//! flush logs.

use crate::config::KernelConfig;
use crate::error::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;

static CONFIG: Lazy<RwLock<Arc<KernelConfig>>> =
    Lazy::new(|| RwLock::new(Arc::new(KernelConfig::load())));

/// Shared runtime hosting engine actors and detached workers.
///
/// Kept separate from any runtime the caller may already run on, so engines
/// can be created and driven from plain threads as well.
static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("bs-engine")
        .build()
        .expect("kernel runtime must start")
});

/// Initialize the kernel with an explicit config. Idempotent.
pub fn init_with(config: KernelConfig) -> Result<()> {
    init_logging(&config);
    *CONFIG.write() = Arc::new(config);
    // Force the runtime and queue up so a failure surfaces here, not at the
    // first tree operation.
    Lazy::force(&RUNTIME);
    crate::tree::queue::queue();
    tracing::info!("kernel initialized");
    Ok(())
}

/// Initialize the kernel from the environment-selected config file.
pub fn init() -> Result<()> {
    init_with(KernelConfig::load())
}

/// Two-phase shutdown: stop accepting engine work, then flush logs.
///
/// Engine handles must not be used after this call.
pub fn shutdown() {
    tracing::info!("kernel shutting down");
    // Phase 1: actors exit as their handles drop; nothing to force here
    // beyond refusing new work, which handle drops take care of.
    // Phase 2: tracing subscribers flush on process exit.
}

/// Current kernel configuration.
pub fn config() -> Arc<KernelConfig> {
    CONFIG.read().clone()
}

/// Default timeout for blocking requests; `None` means infinite.
pub fn default_timeout() -> Option<std::time::Duration> {
    config().timeout()
}

/// Spawn a future onto the kernel runtime.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    RUNTIME.spawn(fut)
}

/// Spawn a blocking closure onto the kernel runtime's blocking pool.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    RUNTIME.spawn_blocking(f)
}

fn init_logging(config: &KernelConfig) {
    let level = match config.logger.flush_level.as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);
    // try_init keeps repeated kernel inits (and test harness subscribers)
    // from tripping over each other.
    let res = if config.logger.console_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if res.is_err() {
        tracing::debug!("logging already initialized");
    }
}
