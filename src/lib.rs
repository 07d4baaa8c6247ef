//! # soctime
//!
//! Cycle-accurate discrete-event simulation kernel for system-on-chip models.
//!
//! ## Design Principles
//!
//! - **Explicit context**: every model callback receives `&mut Engine`; there
//!   is no global simulator state.
//! - **Blocks as scheduling units**: a block owns an ordered list of pending
//!   events and is registered once in the global pending set, keyed by the
//!   time of its earliest event.
//! - **Two time scales**: picosecond events on the global timeline and cycle
//!   events on clock domains. Domains convert cycles to time and keep cycle
//!   counts continuous across frequency changes, gating and retain.
//! - **Resolved ports**: models declare typed master/slave ports and bind them
//!   by path. `finalize` resolves the graph into direct handlers, so a port
//!   call is a plain function call on the signal path.
//!
//! ## Quick Start
//!
//! ```rust
//! use soctime::{ComponentId, Engine};
//!
//! let mut engine = Engine::new();
//! let sys = engine.new_clock("sys", 100_000_000);
//! let cpu = engine.new_component(ComponentId::ROOT, "cpu").unwrap();
//! engine.set_component_clock(cpu, Some(sys)).unwrap();
//! let core = engine.new_block(cpu, "core").unwrap();
//!
//! let tick = engine.new_clock_event(core, |_, _| Ok(())).unwrap();
//! engine.enqueue_cycles(tick, 3).unwrap();
//! engine.run().unwrap();
//!
//! // 3 cycles at 100 MHz
//! assert_eq!(engine.time(), 30_000);
//! ```
//!
//! ## Launcher
//!
//! Embedding programs drive a built system through a [`Launcher`], which runs
//! the dispatch loop on its own thread and exposes stop, retain and stepping
//! to controlling threads:
//!
//! ```rust,ignore
//! use soctime::{Launcher, LauncherConfig};
//!
//! let config = LauncherConfig::from_file("soc.yaml")?;
//! let mut launcher = Launcher::new(config)?;
//! launcher.open(|engine| build_soc(engine))?;
//! launcher.start()?;
//! launcher.run()?;
//! launcher.join()?;
//! ```

pub mod types;
pub mod error;
pub mod event;
pub mod block;
pub mod engine;
pub mod clock;
pub mod component;
pub mod port;
pub mod control;
pub mod launcher;
pub mod config;
pub mod stats;

// Re-export commonly used types
pub use types::{
    period_from_frequency, BlockId, ClockId, ComponentId, Cycles, EventId, SimTime, NO_PENDING,
    PS_PER_SEC,
};
pub use error::{KernelError, SimResult};
pub use event::{EventArgs, TimeEvent};
pub use block::{Block, BlockTime};
pub use engine::{Engine, Halt};
pub use clock::ClockDomain;
pub use component::ResetHook;
pub use port::clock::{ClockMaster, ClockSlave};
pub use port::io::{IoMaster, IoReq, IoResponder, IoSlave, IoStatus};
pub use port::wire::{WireMaster, WireSlave};
pub use port::{CrossingSnapshot, MasterEndpoint, MasterPort, SlaveEndpoint, SlavePort};
pub use control::{ExecControl, RunState};
pub use launcher::Launcher;
pub use config::{ConfigError, LauncherConfig, LauncherConfigBuilder};
pub use stats::{EngineStats, SimulationStats, StatsCollector, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging.
///
/// # Example
///
/// ```rust,ignore
/// soctime::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
