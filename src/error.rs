//! Error type shared by the kernel, the port layer and the launcher.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{BlockId, ClockId, EventId, SimTime};

/// Errors reported by the simulation kernel.
///
/// Configuration errors are raised at build/finalize time and abort the
/// simulation start. Programming errors from models (double enqueue, counter
/// underflow, ...) are reported at the offending call and abort the dispatch
/// that triggered them.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("{event} is already enqueued")]
    AlreadyEnqueued { event: EventId },

    #[error("negative delay {delay} for {event}")]
    NegativeDelay { event: EventId, delay: SimTime },

    #[error("{event} is not a clock event")]
    NotAClockEvent { event: EventId },

    #[error("{block} has no clock domain")]
    NoClockDomain { block: BlockId },

    #[error("clock domain '{clock}' has a zero frequency")]
    ZeroFrequency { clock: String },

    #[error("retain counter underflow on {what}")]
    RetainUnderflow { what: String },

    #[error("unknown {kind} id {index}")]
    UnknownId { kind: &'static str, index: usize },

    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("duplicate component '{0}'")]
    DuplicateComponent(String),

    #[error("invalid component name '{0}'")]
    InvalidName(String),

    #[error("component '{component}' has no port '{port}'")]
    UnknownPort { component: String, port: String },

    #[error("component '{component}' already declares port '{port}'")]
    DuplicatePort { component: String, port: String },

    #[error("malformed binding endpoint '{0}', expected 'path->port'")]
    MalformedBinding(String),

    #[error("cannot bind {master} to {slave}: {reason}")]
    PortMismatch {
        master: String,
        slave: String,
        reason: String,
    },

    #[error("slave port {slave} is bound by more than one master ({first} and {second})")]
    MultipleMasters {
        slave: String,
        first: String,
        second: String,
    },

    #[error("bindings are already finalized")]
    AlreadyFinalized,

    #[error("launcher is {0}")]
    InvalidState(&'static str),

    #[error("dispatch thread panicked")]
    DispatchPanicked,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the kernel and by model callbacks.
pub type SimResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Returns true for errors detected while building or finalizing a system.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            KernelError::ZeroFrequency { .. }
                | KernelError::UnknownComponent(_)
                | KernelError::DuplicateComponent(_)
                | KernelError::InvalidName(_)
                | KernelError::UnknownPort { .. }
                | KernelError::DuplicatePort { .. }
                | KernelError::MalformedBinding(_)
                | KernelError::PortMismatch { .. }
                | KernelError::MultipleMasters { .. }
                | KernelError::Config(_)
        )
    }
}

pub(crate) fn unknown_clock(clock: ClockId) -> KernelError {
    KernelError::UnknownId {
        kind: "clock",
        index: clock.index(),
    }
}
