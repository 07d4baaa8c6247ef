//! Wire ports: single-value signals such as interrupt lines or resets.
//!
//! A wire master remembers the last value it drove, which lets testbenches
//! and late-bound observers read the current level without a callback.

use parking_lot::Mutex;
use std::sync::Arc;

use super::binding::ErasedMaster;
use super::{MasterEndpoint, MasterPort};
use crate::engine::Engine;
use crate::error::SimResult;

/// Receiving end of a wire; a plain typed slave port.
pub type WireSlave<T> = super::SlavePort<T>;

/// Driving end of a wire.
pub struct WireMaster<T> {
    port: MasterPort<T>,
    value: Arc<Mutex<Option<T>>>,
}

impl<T: Clone + Send + 'static> WireMaster<T> {
    pub fn new() -> Self {
        Self {
            port: MasterPort::new(),
            value: Arc::new(Mutex::new(None)),
        }
    }

    /// Drives `value` onto the wire.
    pub fn sync(&self, engine: &mut Engine, value: T) -> SimResult<()> {
        *self.value.lock() = Some(value.clone());
        self.port.sync(engine, value)
    }

    /// Last value driven, if any.
    pub fn value(&self) -> Option<T> {
        self.value.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.port.is_bound()
    }
}

impl<T: Clone + Send + 'static> Default for WireMaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WireMaster<T> {
    fn clone(&self) -> Self {
        Self {
            port: self.port.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> std::fmt::Debug for WireMaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireMaster").field("port", &self.port).finish()
    }
}

impl<T: Clone + Send + 'static> MasterEndpoint for WireMaster<T> {
    fn endpoint(&self) -> Arc<dyn ErasedMaster> {
        self.port.endpoint()
    }
}
