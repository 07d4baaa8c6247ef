//! Engine driver for embedding programs.
//!
//! A [`Launcher`] owns the engine behind a mutex and runs the dispatch loop
//! on a dedicated thread. Controlling threads (front-ends, co-simulation
//! bridges) interact through a small gated surface: free run, stop, retain
//! and single stepping. Only one thread drives dispatch at a time; stepping
//! from the controlling thread is refused while the dispatch thread runs
//! freely.
//!
//! ```
//! use soctime::{Engine, Launcher, LauncherConfigBuilder, SimResult};
//!
//! let config = LauncherConfigBuilder::new()
//!     .name("doc")
//!     .add_clock("sys", 100_000_000)
//!     .build()
//!     .unwrap();
//! let mut launcher = Launcher::new(config).unwrap();
//! launcher
//!     .open(|engine: &mut Engine| -> SimResult<()> {
//!         let cpu = engine.new_component(soctime::ComponentId::ROOT, "cpu")?;
//!         let block = engine.new_block(cpu, "core")?;
//!         let ev = engine.new_event(block, |_, _| Ok(()))?;
//!         engine.enqueue(ev, 1_000)
//!     })
//!     .unwrap();
//! launcher.start().unwrap();
//! launcher.run().unwrap();
//! launcher.join().unwrap();
//! assert_eq!(launcher.time(), 1_000);
//! launcher.close().unwrap();
//! ```

use parking_lot::{Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::LauncherConfig;
use crate::control::{ExecControl, RunState};
use crate::engine::{Engine, Halt};
use crate::error::{KernelError, SimResult};
use crate::port::io::IoMaster;
use crate::port::wire::WireMaster;
use crate::port::MasterEndpoint;
use crate::stats::{SimulationStats, StatsCollector};
use crate::types::{ComponentId, SimTime};

/// Component hosting the ports created by [`Launcher::testbench`].
pub const TESTBENCH_PATH: &str = "testbench";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Opened,
    Started,
    Closed,
}

/// Owns an engine and drives it from a dispatch thread.
pub struct Launcher {
    config: LauncherConfig,
    engine: Arc<Mutex<Engine>>,
    control: Arc<ExecControl>,
    phase: Phase,
    worker: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<KernelError>>>,
    /// Set when a callback panicked; the engine is no longer driven.
    poisoned: Arc<AtomicBool>,
    collector: Option<StatsCollector>,
}

impl Launcher {
    /// Creates a launcher and the clock domains listed in `config`.
    pub fn new(config: LauncherConfig) -> SimResult<Self> {
        config.validate()?;
        let control = Arc::new(ExecControl::new());
        let mut engine = Engine::with_control(Arc::clone(&control));
        for clock in &config.clocks {
            engine.new_clock(clock.name.clone(), clock.frequency);
        }

        let collector = config.simulation.collect_stats.then(|| {
            let mut collector = StatsCollector::new();
            collector.set_name(config.simulation.name.clone());
            collector
        });

        Ok(Self {
            config,
            engine: Arc::new(Mutex::new(engine)),
            control,
            phase: Phase::Created,
            worker: None,
            failure: Arc::new(Mutex::new(None)),
            poisoned: Arc::new(AtomicBool::new(false)),
            collector,
        })
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// The shared stop/retain gate.
    pub fn control(&self) -> &Arc<ExecControl> {
        &self.control
    }

    /// Run state of the dispatch loop.
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Builds the system.
    ///
    /// `build` creates components, blocks, events and ports. Clock components
    /// and bindings from the configuration are applied afterwards.
    pub fn open<F>(&mut self, build: F) -> SimResult<()>
    where
        F: FnOnce(&mut Engine) -> SimResult<()>,
    {
        self.expect_phase(Phase::Created, "already opened")?;
        let mut engine = self.engine.lock();
        build(&mut engine)?;

        for clock in &self.config.clocks {
            let id = engine
                .clock_by_name(&clock.name)
                .ok_or_else(|| KernelError::InvalidState("missing a configured clock"))?;
            for path in &clock.components {
                let component = engine.get_component(path)?;
                engine.set_component_clock(component, Some(id))?;
            }
        }
        for binding in &self.config.bindings {
            match binding.mux {
                Some(mux) => engine.bind_paths_muxed(&binding.master, &binding.slave, mux)?,
                None => engine.bind_paths(&binding.master, &binding.slave)?,
            }
        }
        drop(engine);

        tracing::info!(name = %self.config.simulation.name, "system built");
        self.phase = Phase::Opened;
        Ok(())
    }

    /// Declares `port` on the testbench component and binds it to the model
    /// slave `slave`, written as `path->port`.
    pub fn testbench<P>(&mut self, name: &str, slave: &str, port: &P) -> SimResult<()>
    where
        P: MasterEndpoint + ?Sized,
    {
        self.expect_phase(Phase::Opened, "not opened or already started")?;
        let mut engine = self.engine.lock();
        let bench = match engine.get_component(TESTBENCH_PATH) {
            Ok(component) => component,
            Err(_) => engine.new_component(ComponentId::ROOT, TESTBENCH_PATH)?,
        };
        engine.new_master_port(bench, name, port)?;
        engine.bind_paths(&format!("/{TESTBENCH_PATH}->{name}"), slave)
    }

    /// Creates a wire master bound to `slave`.
    pub fn testbench_wire<T>(&mut self, name: &str, slave: &str) -> SimResult<WireMaster<T>>
    where
        T: Clone + Send + 'static,
    {
        let wire = WireMaster::new();
        self.testbench(name, slave, &wire)?;
        Ok(wire)
    }

    /// Creates an io master without response callbacks bound to `slave`.
    pub fn testbench_io(&mut self, name: &str, slave: &str) -> SimResult<IoMaster> {
        let io = IoMaster::new();
        self.testbench(name, slave, &io)?;
        Ok(io)
    }

    /// Finalizes bindings and resets every component.
    pub fn start(&mut self) -> SimResult<()> {
        self.expect_phase(Phase::Opened, "not opened or already started")?;
        {
            let mut engine = self.engine.lock();
            engine.finalize()?;
            engine.reset()?;
        }
        if let Some(collector) = self.collector.as_mut() {
            collector.start();
        }
        self.phase = Phase::Started;
        tracing::info!("simulation started");
        Ok(())
    }

    /// Lets the dispatch thread run freely, spawning it on first use.
    ///
    /// Fails with [`KernelError::DispatchPanicked`] once a model callback
    /// panicked: the dispatch thread is gone and the engine may be half
    /// updated.
    pub fn run(&mut self) -> SimResult<()> {
        self.expect_phase(Phase::Started, "not started")?;
        self.expect_healthy()?;
        self.control.resume();
        if self.worker.is_none() {
            self.worker = Some(self.spawn_dispatch()?);
        }
        Ok(())
    }

    fn spawn_dispatch(&self) -> SimResult<JoinHandle<()>> {
        let engine = Arc::clone(&self.engine);
        let control = Arc::clone(&self.control);
        let failure = Arc::clone(&self.failure);
        let poisoned = Arc::clone(&self.poisoned);
        let limit = self.config.simulation.max_time.unwrap_or(SimTime::MAX);
        let slice = self.config.simulation.dispatch_slice;

        let handle = thread::Builder::new()
            .name("soctime-dispatch".to_string())
            .spawn(move || {
                while control.wait_runnable() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> SimResult<Halt> {
                        let mut engine = engine.lock();
                        let halt = engine.run_slice(limit, slice)?;
                        if halt == Halt::Limit {
                            engine.step_until(limit)?;
                        }
                        Ok(halt)
                    }));
                    match outcome {
                        Ok(Ok(Halt::Budget)) => control.end_slice(None),
                        Ok(Ok(Halt::Stopped)) => control.end_slice(Some(RunState::Stopped)),
                        Ok(Ok(halt)) => {
                            tracing::debug!(?halt, "free run finished");
                            control.end_slice(Some(RunState::Finished));
                        }
                        Ok(Err(err)) => {
                            tracing::error!(error = %err, "dispatch failed");
                            *failure.lock() = Some(err);
                            control.end_slice(Some(RunState::Finished));
                        }
                        Err(_) => {
                            tracing::error!("model callback panicked");
                            poisoned.store(true, Ordering::Release);
                            *failure.lock() = Some(KernelError::DispatchPanicked);
                            control.end_slice(Some(RunState::Finished));
                            return;
                        }
                    }
                }
                tracing::debug!("dispatch thread exiting");
            })?;
        Ok(handle)
    }

    /// Locks the engine for the controlling thread.
    ///
    /// Refused while the dispatch thread runs freely; otherwise waits for any
    /// slice in flight to end.
    fn drive(&self) -> SimResult<MutexGuard<'_, Engine>> {
        self.expect_phase(Phase::Started, "not started")?;
        self.expect_healthy()?;
        if self.control.state() == RunState::Running && self.control.retain_count() == 0 {
            return Err(KernelError::InvalidState("running freely"));
        }
        self.control.wait_stopped();
        Ok(self.engine.lock())
    }

    /// Advances time by `duration` from the calling thread.
    pub fn step(&self, duration: SimTime) -> SimResult<SimTime> {
        self.drive()?.step(duration)
    }

    /// Dispatches up to `end` from the calling thread.
    pub fn step_until(&self, end: SimTime) -> SimResult<SimTime> {
        self.drive()?.step_until(end)
    }

    /// Brings the engine up to `timestamp` on behalf of an external
    /// synchronous driver and returns the next pending time.
    pub fn update(&self, timestamp: SimTime) -> SimResult<SimTime> {
        let mut engine = self.drive()?;
        if timestamp <= engine.time() {
            return Ok(engine.next_event_time());
        }
        engine.step_until(timestamp)
    }

    /// Runs `f` on the engine from the calling thread, e.g. to drive
    /// testbench ports.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> SimResult<R> {
        let mut engine = self.drive()?;
        Ok(f(&mut engine))
    }

    /// Halts a free run and waits until the dispatch thread parked.
    pub fn stop(&self) {
        if self.control.state() != RunState::Running {
            return;
        }
        self.control.stop_exec();
        self.control.wait_halted();
        // The run may have finished before seeing the request.
        self.control.take_stop();
    }

    /// Claims exclusive control of time advancement.
    pub fn retain(&self) -> u32 {
        self.control.retain()
    }

    pub fn release(&self) -> SimResult<u32> {
        self.control.release()
    }

    /// Waits until the free run ends and reports its failure, if any.
    ///
    /// A run ends when nothing is pending, the configured time limit is
    /// reached, a model requests a stop or a callback fails.
    pub fn join(&self) -> SimResult<()> {
        if self.worker.is_none() {
            return Err(KernelError::InvalidState("not running"));
        }
        self.control.wait_halted();
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => self.expect_healthy(),
        }
    }

    /// Resolves a component path.
    pub fn get_component(&self, path: &str) -> SimResult<ComponentId> {
        self.engine.lock().get_component(path)
    }

    /// Current simulation time.
    pub fn time(&self) -> SimTime {
        self.engine.lock().time()
    }

    /// Statistics collected so far, if enabled.
    pub fn stats(&mut self) -> Option<&SimulationStats> {
        let export = self.engine.lock().export_stats();
        let collector = self.collector.as_mut()?;
        collector.update_from_json(&export);
        Some(collector.stats())
    }

    /// Stops the dispatch thread and tears the system down.
    ///
    /// Returns the final statistics when collection is enabled and writes
    /// them to the configured output directory.
    pub fn close(&mut self) -> SimResult<Option<SimulationStats>> {
        if self.phase == Phase::Closed {
            return Err(KernelError::InvalidState("closed"));
        }
        self.shutdown()?;

        let export = self.engine.lock().export_stats();
        let stats = self.collector.take().map(|mut collector| {
            collector.update_from_json(&export);
            collector.stop();
            collector.into_stats()
        });
        if let (Some(stats), Some(dir)) = (&stats, &self.config.simulation.output_dir) {
            write_stats(stats, Path::new(dir))?;
        }

        self.engine.lock().teardown();
        self.control.set_state(RunState::Finished);
        self.phase = Phase::Closed;
        tracing::info!("simulation closed");
        Ok(stats)
    }

    fn shutdown(&mut self) -> SimResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.control.request_quit();
        worker.join().map_err(|_| KernelError::DispatchPanicked)
    }

    fn expect_healthy(&self) -> SimResult<()> {
        if self.poisoned.load(Ordering::Acquire) {
            Err(KernelError::DispatchPanicked)
        } else {
            Ok(())
        }
    }

    fn expect_phase(&self, phase: Phase, otherwise: &'static str) -> SimResult<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(KernelError::InvalidState(otherwise))
        }
    }
}

impl Drop for Launcher {
    fn drop(&mut self) {
        if self.shutdown().is_err() {
            tracing::warn!("dispatch thread panicked during shutdown");
        }
    }
}

fn write_stats(stats: &SimulationStats, dir: &Path) -> SimResult<()> {
    std::fs::create_dir_all(dir)?;
    stats.to_json_file(dir.join("stats.json"))?;
    stats.to_csv_file(dir.join("stats.csv"))?;
    std::fs::write(dir.join("clocks.csv"), stats.clocks_to_csv())?;
    tracing::info!(dir = %dir.display(), "statistics written");
    Ok(())
}
