//! Port declaration and binding.
//!
//! Models declare typed endpoints on their components at build time and
//! record bindings between them by id or by path. [`Engine::finalize`]
//! resolves every binding once: each master ends up with an immutable list
//! of handler closures it calls directly.
//!
//! A slave may be bound by several masters. A slave built with
//! [`SlavePort::fan_in`] receives the mux id of the binding each value
//! came through; ids default to binding order on that slave and can be
//! pinned with [`Engine::bind_muxed`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use soctime::{ComponentId, Engine, MasterPort, SlavePort};
//!
//! let mut engine = Engine::new();
//! let cpu = engine.new_component(ComponentId::ROOT, "cpu").unwrap();
//! let pic = engine.new_component(ComponentId::ROOT, "pic").unwrap();
//!
//! let irq = MasterPort::<bool>::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let line = {
//!     let seen = Arc::clone(&seen);
//!     SlavePort::new(move |_engine, level: bool| {
//!         seen.lock().push(level);
//!         Ok(())
//!     })
//! };
//! engine.new_master_port(pic, "irq", &irq).unwrap();
//! engine.new_slave_port(cpu, "irq", &line).unwrap();
//! engine.bind_paths("/pic->irq", "/cpu->irq").unwrap();
//! engine.finalize().unwrap();
//!
//! irq.sync(&mut engine, true).unwrap();
//! assert_eq!(*seen.lock(), vec![true]);
//! ```
//!
//! # Clock-domain crossings
//!
//! When master and slave components sit in different clock domains at
//! finalize, the bound handler goes through a [`ClockCrossing`] that counts
//! the transfers and records the originating domain's edge time, so skew
//! between domains can be inspected with [`Engine::crossings`].

mod binding;
pub mod clock;
pub mod io;
pub mod wire;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::engine::Engine;
use crate::error::{KernelError, SimResult};
use crate::types::{ClockId, ComponentId, SimTime};

use binding::{downcast_slave, ErasedMaster, ErasedSlave, SlaveEntry};

/// Handler of a slave port.
pub type SyncHandler<T> = Arc<dyn Fn(&mut Engine, T) -> SimResult<()> + Send + Sync>;

/// Handler told which binding a value came through by its mux id.
pub type MuxHandler<T> = Arc<dyn Fn(&mut Engine, u32, T) -> SimResult<()> + Send + Sync>;

/// Implemented by every port kind that can be declared as a master.
pub trait MasterEndpoint {
    #[doc(hidden)]
    fn endpoint(&self) -> Arc<dyn ErasedMaster>;
}

/// Implemented by every port kind that can be declared as a slave.
pub trait SlaveEndpoint {
    #[doc(hidden)]
    fn endpoint(&self) -> Arc<dyn ErasedSlave>;
}

struct MasterShared<T> {
    staged: Mutex<Vec<SyncHandler<T>>>,
    bound: OnceLock<Box<[SyncHandler<T>]>>,
}

/// Sending side of a typed channel. Cloning yields another handle on the
/// same port.
pub struct MasterPort<T> {
    shared: Arc<MasterShared<T>>,
}

impl<T: Clone + Send + 'static> MasterPort<T> {
    /// Creates an unbound master.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MasterShared {
                staged: Mutex::new(Vec::new()),
                bound: OnceLock::new(),
            }),
        }
    }

    /// Returns true once finalize bound at least one slave.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.fanout() > 0
    }

    /// Number of slaves reached by [`sync`](Self::sync).
    pub fn fanout(&self) -> usize {
        self.shared.bound.get().map_or(0, |b| b.len())
    }

    /// Delivers `value` to every bound slave, in binding order.
    ///
    /// Each handler runs exactly once; all but the last receive a clone.
    /// An unbound master does nothing.
    #[inline]
    pub fn sync(&self, engine: &mut Engine, value: T) -> SimResult<()> {
        let Some(handlers) = self.shared.bound.get() else {
            return Ok(());
        };
        if let Some((last, rest)) = handlers.split_last() {
            for handler in rest {
                handler(engine, value.clone())?;
            }
            last(engine, value)?;
        }
        Ok(())
    }
}

impl<T: Clone + Send + 'static> Default for MasterPort<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MasterPort<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for MasterPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterPort")
            .field("type", &type_name::<T>())
            .field("fanout", &self.shared.bound.get().map_or(0, |b| b.len()))
            .finish()
    }
}

impl<T: Clone + Send + 'static> ErasedMaster for MasterShared<T> {
    fn type_name(&self) -> &'static str {
        type_name::<MasterPort<T>>()
    }

    fn accepts(&self, slave: &dyn ErasedSlave) -> Result<(), String> {
        downcast_slave::<SlaveShared<T>>(self.type_name(), slave).map(|_| ())
    }

    fn connect(
        &self,
        slave: &dyn ErasedSlave,
        mux: u32,
        crossing: Option<Arc<ClockCrossing>>,
    ) -> Result<(), String> {
        let slave = downcast_slave::<SlaveShared<T>>(self.type_name(), slave)?;
        let handler: SyncHandler<T> = match &slave.handler {
            SlaveHandler::Plain(handler) => Arc::clone(handler),
            SlaveHandler::Mux(handler) => {
                let handler = Arc::clone(handler);
                Arc::new(move |engine: &mut Engine, value: T| handler(engine, mux, value))
            }
        };
        let handler: SyncHandler<T> = match crossing {
            None => handler,
            Some(crossing) => Arc::new(move |engine: &mut Engine, value: T| {
                crossing.record(engine);
                handler(engine, value)
            }),
        };
        self.staged.lock().push(handler);
        Ok(())
    }

    fn seal(&self) {
        let handlers = std::mem::take(&mut *self.staged.lock());
        // A port declared under two names is sealed twice; the first wins.
        let _ = self.bound.set(handlers.into_boxed_slice());
    }
}

impl<T: Clone + Send + 'static> MasterEndpoint for MasterPort<T> {
    fn endpoint(&self) -> Arc<dyn ErasedMaster> {
        self.shared.clone()
    }
}

enum SlaveHandler<T> {
    Plain(SyncHandler<T>),
    Mux(MuxHandler<T>),
}

struct SlaveShared<T> {
    handler: SlaveHandler<T>,
}

/// Receiving side of a typed channel.
pub struct SlavePort<T> {
    shared: Arc<SlaveShared<T>>,
}

impl<T: Send + 'static> SlavePort<T> {
    /// Creates a slave calling `handler` for every value received.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut Engine, T) -> SimResult<()> + Send + Sync + 'static,
    {
        Self::from_handler(Arc::new(handler))
    }

    /// Creates a slave from an already shared handler.
    pub fn from_handler(handler: SyncHandler<T>) -> Self {
        Self {
            shared: Arc::new(SlaveShared {
                handler: SlaveHandler::Plain(handler),
            }),
        }
    }

    /// Creates a slave for several masters. Each bound closure passes the
    /// mux id of its binding, so `handler` can tell the senders apart.
    pub fn fan_in<F>(handler: F) -> Self
    where
        F: Fn(&mut Engine, u32, T) -> SimResult<()> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(SlaveShared {
                handler: SlaveHandler::Mux(Arc::new(handler)),
            }),
        }
    }

    /// Creates one of several slaves sharing `handler`; `id` is baked into
    /// the bound closure so the handler can tell its senders apart.
    pub fn muxed(id: u32, handler: MuxHandler<T>) -> Self {
        Self::new(move |engine, value| handler(engine, id, value))
    }

    /// A slave ignoring everything it receives.
    pub fn sink() -> Self {
        Self::new(|_, _| Ok(()))
    }
}

impl<T> Clone for SlavePort<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for SlavePort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlavePort")
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T: Send + 'static> SlaveEndpoint for SlavePort<T> {
    fn endpoint(&self) -> Arc<dyn ErasedSlave> {
        Arc::new(SlaveEntry {
            shared: Arc::clone(&self.shared),
            type_name: type_name::<SlavePort<T>>(),
            single_master: false,
        })
    }
}

/// Stub inserted on bindings between components of different clock domains.
#[derive(Debug)]
pub struct ClockCrossing {
    master: String,
    slave: String,
    from: ClockId,
    to: ClockId,
    count: AtomicU64,
    last_origin_time: AtomicI64,
    max_skew: AtomicI64,
}

/// Point-in-time copy of a [`ClockCrossing`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingSnapshot {
    pub master: String,
    pub slave: String,
    pub from: ClockId,
    pub to: ClockId,
    /// Transfers seen so far.
    pub count: u64,
    /// Edge time of the originating domain at the last transfer.
    pub last_origin_time: SimTime,
    /// Largest distance between the two domains' edges at a transfer.
    pub max_skew: SimTime,
}

impl ClockCrossing {
    fn new(master: String, slave: String, from: ClockId, to: ClockId) -> Self {
        Self {
            master,
            slave,
            from,
            to,
            count: AtomicU64::new(0),
            last_origin_time: AtomicI64::new(-1),
            max_skew: AtomicI64::new(0),
        }
    }

    /// Records one transfer at the engine's current time.
    pub(crate) fn record(&self, engine: &Engine) {
        let now = engine.time();
        let edge = |clock: ClockId| engine.clock(clock).map_or(now, |d| d.edge_time(now));
        let origin = edge(self.from);
        let skew = (origin - edge(self.to)).abs();

        self.count.fetch_add(1, Ordering::Relaxed);
        self.last_origin_time.store(origin, Ordering::Relaxed);
        self.max_skew.fetch_max(skew, Ordering::Relaxed);
        tracing::trace!(master = %self.master, slave = %self.slave, origin, skew, "clock crossing");
    }

    /// Copies the current counters.
    pub fn snapshot(&self) -> CrossingSnapshot {
        CrossingSnapshot {
            master: self.master.clone(),
            slave: self.slave.clone(),
            from: self.from,
            to: self.to,
            count: self.count.load(Ordering::Relaxed),
            last_origin_time: self.last_origin_time.load(Ordering::Relaxed),
            max_skew: self.max_skew.load(Ordering::Relaxed),
        }
    }
}

/// One side of a recorded binding.
#[derive(Clone, Debug)]
enum Endpoint {
    Id(ComponentId, String),
    Path(String, String),
}

#[derive(Clone, Debug)]
struct Binding {
    master: Endpoint,
    slave: Endpoint,
    mux: Option<u32>,
}

/// A binding checked by finalize, ready to connect.
struct Resolved {
    master: Arc<dyn ErasedMaster>,
    slave: Arc<dyn ErasedSlave>,
    master_label: String,
    slave_label: String,
    mux: u32,
    clocks: (Option<ClockId>, Option<ClockId>),
}

/// Declared ports and the bindings awaiting finalize.
#[derive(Default)]
pub struct PortRegistry {
    masters: HashMap<(ComponentId, String), Arc<dyn ErasedMaster>>,
    slaves: HashMap<(ComponentId, String), Arc<dyn ErasedSlave>>,
    bindings: Vec<Binding>,
    pub(crate) crossings: Vec<Arc<ClockCrossing>>,
    finalized: bool,
}

impl PortRegistry {
    fn declared(&self, key: &(ComponentId, String)) -> bool {
        self.masters.contains_key(key) || self.slaves.contains_key(key)
    }
}

impl fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRegistry")
            .field("masters", &self.masters.len())
            .field("slaves", &self.slaves.len())
            .field("bindings", &self.bindings)
            .field("crossings", &self.crossings.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}

/// Splits `"path->port"`.
fn parse_endpoint(text: &str) -> SimResult<Endpoint> {
    match text.rsplit_once("->") {
        Some((path, port)) if !port.trim().is_empty() => {
            Ok(Endpoint::Path(path.trim().to_string(), port.trim().to_string()))
        }
        _ => Err(KernelError::MalformedBinding(text.to_string())),
    }
}

impl Engine {
    fn check_declaration(&self, component: ComponentId, name: &str) -> SimResult<(ComponentId, String)> {
        if self.ports.finalized {
            return Err(KernelError::AlreadyFinalized);
        }
        let path = self.component_path(component)?;
        let key = (component, name.to_string());
        if self.ports.declared(&key) {
            return Err(KernelError::DuplicatePort {
                component: path,
                port: name.to_string(),
            });
        }
        Ok(key)
    }

    /// Declares `port` as master port `name` of `component`.
    pub fn new_master_port<P>(&mut self, component: ComponentId, name: &str, port: &P) -> SimResult<()>
    where
        P: MasterEndpoint + ?Sized,
    {
        let key = self.check_declaration(component, name)?;
        tracing::trace!(%component, port = name, "new master port");
        self.ports.masters.insert(key, port.endpoint());
        Ok(())
    }

    /// Declares `port` as slave port `name` of `component`.
    pub fn new_slave_port<P>(&mut self, component: ComponentId, name: &str, port: &P) -> SimResult<()>
    where
        P: SlaveEndpoint + ?Sized,
    {
        let key = self.check_declaration(component, name)?;
        tracing::trace!(%component, port = name, "new slave port");
        self.ports.slaves.insert(key, port.endpoint());
        Ok(())
    }

    /// Records a binding between two declared ports; resolved at finalize.
    pub fn bind(
        &mut self,
        master: ComponentId,
        master_port: &str,
        slave: ComponentId,
        slave_port: &str,
    ) -> SimResult<()> {
        self.push_binding(Binding {
            master: Endpoint::Id(master, master_port.to_string()),
            slave: Endpoint::Id(slave, slave_port.to_string()),
            mux: None,
        })
    }

    /// Like [`bind`](Self::bind), passing `mux` to a fan-in slave instead of
    /// the binding's position among that slave's masters.
    pub fn bind_muxed(
        &mut self,
        master: ComponentId,
        master_port: &str,
        slave: ComponentId,
        slave_port: &str,
        mux: u32,
    ) -> SimResult<()> {
        self.push_binding(Binding {
            master: Endpoint::Id(master, master_port.to_string()),
            slave: Endpoint::Id(slave, slave_port.to_string()),
            mux: Some(mux),
        })
    }

    /// Records a binding written as `"path/to/comp->port"` on both sides.
    ///
    /// Paths are resolved at finalize, so components may be created after
    /// the binding is recorded.
    pub fn bind_paths(&mut self, master: &str, slave: &str) -> SimResult<()> {
        self.push_binding(Binding {
            master: parse_endpoint(master)?,
            slave: parse_endpoint(slave)?,
            mux: None,
        })
    }

    /// Path form of [`bind_muxed`](Self::bind_muxed).
    pub fn bind_paths_muxed(&mut self, master: &str, slave: &str, mux: u32) -> SimResult<()> {
        self.push_binding(Binding {
            master: parse_endpoint(master)?,
            slave: parse_endpoint(slave)?,
            mux: Some(mux),
        })
    }

    fn push_binding(&mut self, binding: Binding) -> SimResult<()> {
        if self.ports.finalized {
            return Err(KernelError::AlreadyFinalized);
        }
        self.ports.bindings.push(binding);
        Ok(())
    }

    fn resolve(&self, endpoint: &Endpoint) -> SimResult<(ComponentId, String, String)> {
        let (component, port) = match endpoint {
            Endpoint::Id(component, port) => (*component, port),
            Endpoint::Path(path, port) => (self.get_component(path)?, port),
        };
        let label = format!("{}->{}", self.component_path(component)?, port);
        Ok((component, port.clone(), label))
    }

    /// Returns true once [`finalize`](Self::finalize) succeeded.
    pub fn is_finalized(&self) -> bool {
        self.ports.finalized
    }

    /// Resolves every recorded binding into direct handlers.
    ///
    /// Fails on an unknown component or port, a port kind or type mismatch,
    /// a mux id used twice on one slave, an io port bound more than once, or
    /// a clock domain with blocks and no frequency. Every binding is checked
    /// before the first one connects, so a failed finalize leaves no port
    /// bound and can be retried once the model is fixed. Masters left
    /// without binding stay unbound.
    pub fn finalize(&mut self) -> SimResult<()> {
        if self.ports.finalized {
            return Err(KernelError::AlreadyFinalized);
        }
        let plan = self.plan_bindings()?;
        self.validate_clocks()?;

        for edge in &plan {
            let crossing = match edge.clocks {
                (Some(from), Some(to)) if from != to => {
                    let crossing = Arc::new(ClockCrossing::new(
                        edge.master_label.clone(),
                        edge.slave_label.clone(),
                        from,
                        to,
                    ));
                    self.ports.crossings.push(Arc::clone(&crossing));
                    Some(crossing)
                }
                _ => None,
            };
            edge.master
                .connect(edge.slave.as_ref(), edge.mux, crossing)
                .map_err(|reason| KernelError::PortMismatch {
                    master: edge.master_label.clone(),
                    slave: edge.slave_label.clone(),
                    reason,
                })?;
            tracing::trace!(
                master = %edge.master_label,
                slave = %edge.slave_label,
                mux = edge.mux,
                "bound"
            );
        }

        for master in self.ports.masters.values() {
            master.seal();
        }
        self.ports.bindings.clear();
        self.ports.finalized = true;
        tracing::debug!(
            bindings = plan.len(),
            crossings = self.ports.crossings.len(),
            "ports finalized"
        );
        Ok(())
    }

    /// Resolves and checks every binding without touching any port.
    fn plan_bindings(&self) -> SimResult<Vec<Resolved>> {
        // slave -> (mux id, master label) of the bindings seen so far
        let mut senders: HashMap<(ComponentId, String), Vec<(u32, String)>> = HashMap::new();
        // single-slave master -> its slave
        let mut targets: HashMap<(ComponentId, String), String> = HashMap::new();
        let mut plan = Vec::with_capacity(self.ports.bindings.len());

        for binding in &self.ports.bindings {
            let (mc, mp, master_label) = self.resolve(&binding.master)?;
            let (sc, sp, slave_label) = self.resolve(&binding.slave)?;

            let master_key = (mc, mp);
            let master = self
                .ports
                .masters
                .get(&master_key)
                .cloned()
                .ok_or_else(|| KernelError::UnknownPort {
                    component: self.path_or_id(mc),
                    port: master_key.1.clone(),
                })?;
            let slave_key = (sc, sp);
            let slave = self
                .ports
                .slaves
                .get(&slave_key)
                .cloned()
                .ok_or_else(|| KernelError::UnknownPort {
                    component: self.path_or_id(sc),
                    port: slave_key.1.clone(),
                })?;
            let mismatch = |reason: String| KernelError::PortMismatch {
                master: master_label.clone(),
                slave: slave_label.clone(),
                reason,
            };

            master.accepts(slave.as_ref()).map_err(mismatch)?;
            if master.single_slave() {
                if let Some(first) = targets.get(&master_key) {
                    return Err(mismatch(format!(
                        "{} binds a single slave and is already bound to {first}",
                        master.type_name()
                    )));
                }
                targets.insert(master_key, slave_label.clone());
            }

            let seen = senders.entry(slave_key).or_default();
            if slave.single_master() {
                if let Some((_, first)) = seen.first() {
                    tracing::error!(slave = %slave_label, %first, second = %master_label, "slave bound twice");
                    return Err(KernelError::MultipleMasters {
                        slave: slave_label,
                        first: first.clone(),
                        second: master_label,
                    });
                }
            }
            let mux = match binding.mux {
                Some(id) => id,
                None => (0..)
                    .find(|id| seen.iter().all(|(used, _)| used != id))
                    .unwrap_or_default(),
            };
            if let Some((_, other)) = seen.iter().find(|(used, _)| *used == mux) {
                return Err(mismatch(format!("mux id {mux} is already used by {other}")));
            }
            seen.push((mux, master_label.clone()));

            plan.push(Resolved {
                master,
                slave,
                clocks: (self.component_clock(mc)?, self.component_clock(sc)?),
                master_label,
                slave_label,
                mux,
            });
        }
        Ok(plan)
    }

    fn path_or_id(&self, component: ComponentId) -> String {
        self.component_path(component)
            .unwrap_or_else(|_| component.to_string())
    }

    /// Snapshots of every clock-domain crossing created at finalize.
    pub fn crossings(&self) -> Vec<CrossingSnapshot> {
        self.ports.crossings.iter().map(|c| c.snapshot()).collect()
    }
}
