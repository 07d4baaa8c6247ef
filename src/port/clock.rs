//! Clock ports.
//!
//! A clock generator model drives a [`ClockId`] through a [`ClockMaster`].
//! The receiving [`ClockSlave`] rebinds its component subtree to that domain,
//! so a model does not need to know at build time which clock feeds it.

use std::sync::Arc;

use super::binding::{ErasedMaster, ErasedSlave};
use super::{MasterEndpoint, MasterPort, SlaveEndpoint, SlavePort};
use crate::engine::Engine;
use crate::error::SimResult;
use crate::types::{ClockId, ComponentId};

/// Drives a clock domain to bound components.
#[derive(Clone, Debug, Default)]
pub struct ClockMaster {
    port: MasterPort<ClockId>,
}

impl ClockMaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagates `clock` to every bound slave.
    pub fn sync(&self, engine: &mut Engine, clock: ClockId) -> SimResult<()> {
        self.port.sync(engine, clock)
    }

    pub fn is_bound(&self) -> bool {
        self.port.is_bound()
    }
}

impl MasterEndpoint for ClockMaster {
    fn endpoint(&self) -> Arc<dyn ErasedMaster> {
        self.port.endpoint()
    }
}

/// Receives a clock domain for a component.
#[derive(Clone, Debug)]
pub struct ClockSlave {
    port: SlavePort<ClockId>,
}

impl ClockSlave {
    /// A slave binding `component` and its inheriting subtree to the clock
    /// it receives.
    pub fn new(component: ComponentId) -> Self {
        Self {
            port: SlavePort::new(move |engine: &mut Engine, clock: ClockId| {
                tracing::debug!(%component, %clock, "clock port rebinding");
                engine.set_component_clock(component, Some(clock))
            }),
        }
    }

    /// A slave with a custom handler.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&mut Engine, ClockId) -> SimResult<()> + Send + Sync + 'static,
    {
        Self {
            port: SlavePort::new(handler),
        }
    }
}

impl SlaveEndpoint for ClockSlave {
    fn endpoint(&self) -> Arc<dyn ErasedSlave> {
        self.port.endpoint()
    }
}
