//! Type-erased port endpoints as seen by the registry.
//!
//! The registry only knows ports through these traits. Each concrete port
//! kind downcasts its peer at finalize and stores a direct handler, so no
//! erasure is left on the signal path.

use std::any::Any;
use std::sync::Arc;

use super::ClockCrossing;

/// Master side of a declared port.
pub trait ErasedMaster: Send + Sync {
    /// Port type shown in mismatch errors.
    fn type_name(&self) -> &'static str;

    /// Checks that this master can drive `slave`, without binding anything.
    fn accepts(&self, slave: &dyn ErasedSlave) -> Result<(), String>;

    /// True for masters bound to at most one slave.
    fn single_slave(&self) -> bool {
        false
    }

    /// Binds this master to `slave`; `mux` identifies this master to a
    /// slave shared by several senders. Returns the mismatch reason on
    /// failure.
    fn connect(
        &self,
        slave: &dyn ErasedSlave,
        mux: u32,
        crossing: Option<Arc<ClockCrossing>>,
    ) -> Result<(), String>;

    /// Freezes the bindings collected by `connect`.
    fn seal(&self);
}

/// Slave side of a declared port.
pub trait ErasedSlave: Send + Sync {
    /// Port type shown in mismatch errors.
    fn type_name(&self) -> &'static str;

    /// The concrete shared state, handed to the master for downcasting.
    fn shared(&self) -> Arc<dyn Any + Send + Sync>;

    /// True for slaves answering a single initiator.
    fn single_master(&self) -> bool;
}

/// Registry entry of a slave: its shared state and printable type.
pub(crate) struct SlaveEntry<S> {
    pub(crate) shared: Arc<S>,
    pub(crate) type_name: &'static str,
    pub(crate) single_master: bool,
}

impl<S: Send + Sync + 'static> ErasedSlave for SlaveEntry<S> {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn shared(&self) -> Arc<dyn Any + Send + Sync> {
        self.shared.clone()
    }

    fn single_master(&self) -> bool {
        self.single_master
    }
}

/// Downcasts the state of `slave` for a master expecting `S`.
pub(crate) fn downcast_slave<S: Send + Sync + 'static>(
    master_type: &str,
    slave: &dyn ErasedSlave,
) -> Result<Arc<S>, String> {
    slave
        .shared()
        .downcast::<S>()
        .map_err(|_| format!("{} cannot drive {}", master_type, slave.type_name()))
}
