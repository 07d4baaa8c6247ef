//! Statistics collection and export.
//!
//! The engine keeps a few cheap counters on its dispatch path
//! ([`EngineStats`]); everything else is assembled from
//! [`Engine::export_stats`](crate::Engine::export_stats) into a
//! [`SimulationStats`] with wall-clock timing, exportable as JSON or CSV.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::port::CrossingSnapshot;
use crate::types::{Cycles, SimTime};

/// Counters maintained by the engine itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Successful enqueues of time and clock events
    pub events_enqueued: u64,

    /// Pending events removed before firing
    pub events_cancelled: u64,

    /// Event callbacks run
    pub events_fired: u64,

    /// Block executions by the dispatch loop
    pub block_executions: u64,

    /// Calls into the dispatch loop (step, run, slices)
    pub dispatch_calls: u64,
}

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Simulation metadata
    pub metadata: SimulationMetadata,

    /// Global time at the end of the run
    pub final_time: SimTime,

    /// Engine counters
    pub engine: EngineStats,

    /// Number of blocks
    pub blocks: usize,

    /// Number of components, root included
    pub components: usize,

    /// Per-domain state at the end of the run
    pub clocks: Vec<ClockStats>,

    /// Clock-domain crossings observed on port bindings
    pub crossings: Vec<CrossingSnapshot>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Simulation name/description
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Kernel version
    pub version: String,
}

/// State of one clock domain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockStats {
    pub name: String,
    pub frequency: u64,
    pub cycles: Cycles,
    pub retained: u32,
    pub gated: bool,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated picoseconds per wall-clock second
    pub sim_time_per_second: f64,

    /// Events fired per second
    pub events_per_second: f64,

    /// Block executions per second
    pub blocks_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..SimulationMetadata::default()
            },
            ..Self::default()
        }
    }

    /// Sets the simulation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(wall_clock_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(wall_clock_now());
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = self.final_time as f64 / seconds;
            self.timing.events_per_second = self.engine.events_fired as f64 / seconds;
            self.timing.blocks_per_second = self.engine.block_executions as f64 / seconds;
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");

        csv.push_str(&format!("final_time,{}\n", self.final_time));
        csv.push_str(&format!("events_enqueued,{}\n", self.engine.events_enqueued));
        csv.push_str(&format!("events_cancelled,{}\n", self.engine.events_cancelled));
        csv.push_str(&format!("events_fired,{}\n", self.engine.events_fired));
        csv.push_str(&format!("block_executions,{}\n", self.engine.block_executions));
        csv.push_str(&format!("dispatch_calls,{}\n", self.engine.dispatch_calls));
        csv.push_str(&format!("blocks,{}\n", self.blocks));
        csv.push_str(&format!("components,{}\n", self.components));

        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("sim_time_per_second,{:.2}\n", self.timing.sim_time_per_second));
        csv.push_str(&format!("events_per_second,{:.2}\n", self.timing.events_per_second));

        csv
    }

    /// Exports summary statistics to CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-domain statistics to CSV.
    pub fn clocks_to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("clock,frequency,cycles,retained,gated\n");
        for clock in &self.clocks {
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                clock.name, clock.frequency, clock.cycles, clock.retained, clock.gated
            ));
        }
        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w)?;

        writeln!(w, "--- Engine ---")?;
        writeln!(w, "Final simulation time: {} ps", self.final_time)?;
        writeln!(w, "Events fired: {}", self.engine.events_fired)?;
        writeln!(w, "Events cancelled: {}", self.engine.events_cancelled)?;
        writeln!(w, "Block executions: {}", self.engine.block_executions)?;
        writeln!(w, "Blocks: {}, components: {}", self.blocks, self.components)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Sim time/sec: {:.2}", self.timing.sim_time_per_second)?;
        writeln!(w, "Events/sec: {:.2}", self.timing.events_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Clocks ---")?;
        for clock in &self.clocks {
            writeln!(
                w,
                "{}: {} Hz, {} cycles{}",
                clock.name,
                clock.frequency,
                clock.cycles,
                if clock.gated { " (gated)" } else { "" }
            )?;
        }
        for crossing in &self.crossings {
            writeln!(
                w,
                "Crossing {} -> {}: {} transfers, max skew {} ps",
                crossing.master, crossing.slave, crossing.count, crossing.max_skew
            )?;
        }

        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn wall_clock_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

/// Statistics collector driven by the launcher.
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: SimulationStats,
    timer: Option<Timer>,
}

impl StatsCollector {
    /// Creates a new collector.
    pub fn new() -> Self {
        Self {
            stats: SimulationStats::new(),
            timer: None,
        }
    }

    /// Sets the simulation name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.stats.metadata.name = name.into();
    }

    /// Starts timing.
    pub fn start(&mut self) {
        self.timer = Some(Timer::start());
        self.stats.record_start();
    }

    /// Stops timing and computes final statistics.
    pub fn stop(&mut self) {
        self.stats.record_end();
        if let Some(ref timer) = self.timer {
            self.stats.compute_timing(timer.elapsed_ms());
        }
    }

    /// Updates statistics from an engine export.
    pub fn update_from_json(&mut self, json: &serde_json::Value) {
        if let Some(engine) = json.get("engine") {
            let count = |key: &str| engine[key].as_u64().unwrap_or(0);
            self.stats.final_time = engine["current_time"].as_i64().unwrap_or(0);
            self.stats.engine = EngineStats {
                events_enqueued: count("events_enqueued"),
                events_cancelled: count("events_cancelled"),
                events_fired: count("events_fired"),
                block_executions: count("block_executions"),
                dispatch_calls: count("dispatch_calls"),
            };
            self.stats.blocks = count("blocks") as usize;
            self.stats.components = count("components") as usize;
        }

        if let Some(clocks) = json.get("clocks").and_then(|c| c.as_array()) {
            self.stats.clocks = clocks
                .iter()
                .map(|c| ClockStats {
                    name: c["name"].as_str().unwrap_or_default().to_string(),
                    frequency: c["frequency"].as_u64().unwrap_or(0),
                    cycles: c["cycles"].as_i64().unwrap_or(0),
                    retained: c["retained"].as_u64().unwrap_or(0) as u32,
                    gated: c["gated"].as_bool().unwrap_or(false),
                })
                .collect();
        }

        if let Some(crossings) = json.get("crossings") {
            self.stats.crossings =
                serde_json::from_value(crossings.clone()).unwrap_or_default();
        }
    }

    /// Returns the collected statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Consumes the collector and returns the statistics.
    pub fn into_stats(self) -> SimulationStats {
        self.stats
    }
}
