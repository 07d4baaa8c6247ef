//! Memory-mapped IO ports.
//!
//! An [`IoMaster`] sends [`IoReq`]s to the single [`IoSlave`] it is bound
//! to, and an io slave answers a single master. The slave answers
//! synchronously through the returned [`IoStatus`], or returns
//! [`IoStatus::Pending`] and completes the request later through the
//! [`IoResponder`] it was handed, which routes back over the reverse binding
//! set up at finalize. A slave that cannot accept a request right now returns
//! [`IoStatus::Denied`] and calls `grant` once the initiator may retry.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::binding::{downcast_slave, ErasedMaster, ErasedSlave, SlaveEntry};
use super::{ClockCrossing, MasterEndpoint, SlaveEndpoint};
use crate::engine::Engine;
use crate::error::SimResult;
use crate::types::SimTime;

/// Outcome of an IO request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoStatus {
    /// Completed synchronously.
    #[default]
    Ok,
    /// Accepted; completion comes later through a response.
    Pending,
    /// Refused for now; a grant follows when the initiator may retry.
    Denied,
    /// Nothing answers at this address, or the master is unbound.
    Invalid,
}

/// A read or write transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IoReq {
    pub addr: u64,
    pub size: u64,
    pub is_write: bool,
    /// Write payload, or read result filled in by the target. Empty on a
    /// fresh read; the target sizes it.
    pub data: Vec<u8>,
    /// Latency accumulated along the path, in picoseconds.
    pub latency: SimTime,
    /// Initiator tag used to match responses.
    pub id: u64,
    pub status: IoStatus,
}

impl IoReq {
    /// A read of `size` bytes at `addr`. No buffer is allocated until the
    /// target answers.
    pub fn read(addr: u64, size: u64) -> Self {
        Self {
            addr,
            size,
            ..Self::default()
        }
    }

    /// A write of `data` at `addr`.
    pub fn write(addr: u64, data: Vec<u8>) -> Self {
        Self {
            addr,
            size: data.len() as u64,
            is_write: true,
            data,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }
}

/// Slave-side request handler.
pub type IoReqHandler =
    Arc<dyn Fn(&mut Engine, &mut IoReq, &IoResponder) -> SimResult<IoStatus> + Send + Sync>;

/// Master-side completion callback, used for responses and grants.
pub type IoRespHandler = Arc<dyn Fn(&mut Engine, IoReq) -> SimResult<()> + Send + Sync>;

type BoundReq = Arc<dyn Fn(&mut Engine, &mut IoReq) -> SimResult<IoStatus> + Send + Sync>;

struct IoMasterShared {
    resp: IoRespHandler,
    grant: IoRespHandler,
    staged: Mutex<Option<BoundReq>>,
    target: OnceLock<Option<BoundReq>>,
}

/// Initiator side of an IO binding.
#[derive(Clone)]
pub struct IoMaster {
    shared: Arc<IoMasterShared>,
}

impl IoMaster {
    /// A master that ignores responses and grants; suited to targets that
    /// always answer synchronously.
    pub fn new() -> Self {
        Self::with_callbacks(|_, _| Ok(()), |_, _| Ok(()))
    }

    /// A master with response and grant callbacks.
    pub fn with_callbacks<R, G>(resp: R, grant: G) -> Self
    where
        R: Fn(&mut Engine, IoReq) -> SimResult<()> + Send + Sync + 'static,
        G: Fn(&mut Engine, IoReq) -> SimResult<()> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(IoMasterShared {
                resp: Arc::new(resp),
                grant: Arc::new(grant),
                staged: Mutex::new(None),
                target: OnceLock::new(),
            }),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.shared.target.get(), Some(Some(_)))
    }

    /// Sends `req` to the bound slave and records the status in it.
    ///
    /// An unbound master answers [`IoStatus::Invalid`].
    pub fn req(&self, engine: &mut Engine, req: &mut IoReq) -> SimResult<IoStatus> {
        let status = match self.shared.target.get() {
            Some(Some(target)) => target(engine, req)?,
            _ => IoStatus::Invalid,
        };
        req.status = status;
        Ok(status)
    }
}

impl Default for IoMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IoMaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoMaster")
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl ErasedMaster for IoMasterShared {
    fn type_name(&self) -> &'static str {
        "IoMaster"
    }

    fn accepts(&self, slave: &dyn ErasedSlave) -> Result<(), String> {
        downcast_slave::<IoSlaveShared>(self.type_name(), slave).map(|_| ())
    }

    fn single_slave(&self) -> bool {
        true
    }

    fn connect(
        &self,
        slave: &dyn ErasedSlave,
        _mux: u32,
        crossing: Option<Arc<ClockCrossing>>,
    ) -> Result<(), String> {
        let slave = downcast_slave::<IoSlaveShared>(self.type_name(), slave)?;
        let mut staged = self.staged.lock();
        if staged.is_some() {
            return Err("an io master binds to a single slave".to_string());
        }
        slave
            .initiator
            .set((Arc::clone(&self.resp), Arc::clone(&self.grant)))
            .map_err(|_| "io slave already has an initiator".to_string())?;

        let responder = IoResponder {
            shared: Arc::clone(&slave),
        };
        let target: BoundReq = match crossing {
            None => Arc::new(move |engine: &mut Engine, req: &mut IoReq| {
                (responder.shared.req)(engine, req, &responder)
            }),
            Some(crossing) => Arc::new(move |engine: &mut Engine, req: &mut IoReq| {
                crossing.record(engine);
                (responder.shared.req)(engine, req, &responder)
            }),
        };
        *staged = Some(target);
        Ok(())
    }

    fn seal(&self) {
        let target = self.staged.lock().take();
        let _ = self.target.set(target);
    }
}

impl MasterEndpoint for IoMaster {
    fn endpoint(&self) -> Arc<dyn ErasedMaster> {
        self.shared.clone()
    }
}

struct IoSlaveShared {
    req: IoReqHandler,
    /// Response and grant callbacks of the bound master.
    initiator: OnceLock<(IoRespHandler, IoRespHandler)>,
}

impl IoSlaveShared {
    fn resp(&self, engine: &mut Engine, req: IoReq) -> SimResult<()> {
        match self.initiator.get() {
            Some((resp, _)) => resp(engine, req),
            None => {
                tracing::warn!(addr = req.addr, "io response on an unbound slave dropped");
                Ok(())
            }
        }
    }

    fn grant(&self, engine: &mut Engine, req: IoReq) -> SimResult<()> {
        match self.initiator.get() {
            Some((_, grant)) => grant(engine, req),
            None => {
                tracing::warn!(addr = req.addr, "io grant on an unbound slave dropped");
                Ok(())
            }
        }
    }
}

/// Handle a slave uses to complete pending requests.
#[derive(Clone)]
pub struct IoResponder {
    shared: Arc<IoSlaveShared>,
}

impl IoResponder {
    /// Completes a request previously answered with [`IoStatus::Pending`].
    pub fn resp(&self, engine: &mut Engine, req: IoReq) -> SimResult<()> {
        self.shared.resp(engine, req)
    }

    /// Tells the initiator a request denied earlier may be retried.
    pub fn grant(&self, engine: &mut Engine, req: IoReq) -> SimResult<()> {
        self.shared.grant(engine, req)
    }
}

impl fmt::Debug for IoResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoResponder")
            .field("bound", &self.shared.initiator.get().is_some())
            .finish()
    }
}

/// Target side of an IO binding.
#[derive(Clone)]
pub struct IoSlave {
    shared: Arc<IoSlaveShared>,
}

impl IoSlave {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut Engine, &mut IoReq, &IoResponder) -> SimResult<IoStatus> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(IoSlaveShared {
                req: Arc::new(handler),
                initiator: OnceLock::new(),
            }),
        }
    }

    /// Handle for answering requests outside the request handler.
    pub fn responder(&self) -> IoResponder {
        IoResponder {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn resp(&self, engine: &mut Engine, req: IoReq) -> SimResult<()> {
        self.shared.resp(engine, req)
    }

    pub fn grant(&self, engine: &mut Engine, req: IoReq) -> SimResult<()> {
        self.shared.grant(engine, req)
    }
}

impl fmt::Debug for IoSlave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSlave")
            .field("bound", &self.shared.initiator.get().is_some())
            .finish()
    }
}

impl SlaveEndpoint for IoSlave {
    fn endpoint(&self) -> Arc<dyn ErasedSlave> {
        Arc::new(SlaveEntry {
            shared: Arc::clone(&self.shared),
            type_name: "IoSlave",
            single_master: true,
        })
    }
}
