//! Launcher configuration.
//!
//! This module provides YAML/JSON configuration for the parts of a system
//! the kernel itself owns: run parameters, clock domains and port bindings.
//! Model parameters belong to the models and are not described here.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   name: soc-smoke
//!   max_time: 1000000000
//!   dispatch_slice: 10000
//!   log_level: info
//!
//! clocks:
//!   - name: core
//!     frequency: 100000000
//!     components: [/soc/cpu]
//!   - name: periph
//!     frequency: 25000000
//!     components: [/soc/uart0, /soc/timer]
//!
//! bindings:
//!   - master: /soc/timer->irq
//!     slave: /soc/cpu->irq
//!   - master: /soc/uart0->irq
//!     slave: /soc/cpu->irq
//!     mux: 4
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global run parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Name recorded in statistics
    #[serde(default)]
    pub name: String,

    /// Time at which a free run ends, in picoseconds; unbounded if absent
    #[serde(default)]
    pub max_time: Option<SimTime>,

    /// Block executions per dispatch slice before the launcher re-checks
    /// stop and retain requests
    #[serde(default = "default_dispatch_slice")]
    pub dispatch_slice: u64,

    /// Logging filter handed to [`crate::init_logging`]: a level (trace,
    /// debug, info, warn, error) or `target=level` directives
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect run statistics
    #[serde(default)]
    pub collect_stats: bool,

    /// Output directory for statistics files
    #[serde(default)]
    pub output_dir: Option<String>,
}

fn default_dispatch_slice() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_time: None,
            dispatch_slice: default_dispatch_slice(),
            log_level: default_log_level(),
            collect_stats: false,
            output_dir: None,
        }
    }
}

/// A clock domain created when the launcher opens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClockConfig {
    pub name: String,

    /// Frequency in Hz
    pub frequency: u64,

    /// Component paths bound to this domain once the system is built
    #[serde(default)]
    pub components: Vec<String>,
}

impl ClockConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation("Clock with an empty name".to_string()));
        }
        if self.frequency == 0 {
            return Err(ConfigError::Validation(format!(
                "Clock '{}' has a zero frequency",
                self.name
            )));
        }
        Ok(())
    }
}

/// A port binding written as `path->port` on both sides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub master: String,
    pub slave: String,
    /// Mux id passed to a fan-in slave; binding order when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<u32>,
}

/// Complete launcher configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Global run parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Clock domain definitions
    #[serde(default)]
    pub clocks: Vec<ClockConfig>,

    /// Port bindings added after the build closure ran
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl LauncherConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: LauncherConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: LauncherConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.simulation.dispatch_slice == 0 {
            return Err(ConfigError::Validation(
                "dispatch_slice must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.simulation.max_time {
            if max < 0 {
                return Err(ConfigError::Validation(format!("Negative max_time: {max}")));
            }
        }
        if let Err(err) = tracing_subscriber::EnvFilter::try_new(&self.simulation.log_level) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}': {err}",
                self.simulation.log_level
            )));
        }

        let mut names = HashSet::new();
        for clock in &self.clocks {
            clock.validate()?;
            if !names.insert(clock.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate clock name: {}",
                    clock.name
                )));
            }
        }

        // A component may sit in at most one configured domain
        let mut bound = HashSet::new();
        for path in self.clocks.iter().flat_map(|c| &c.components) {
            if !bound.insert(path.trim_start_matches('/')) {
                return Err(ConfigError::Validation(format!(
                    "Component {} is bound to several clocks",
                    path
                )));
            }
        }

        for binding in &self.bindings {
            for side in [&binding.master, &binding.slave] {
                if !side.contains("->") {
                    return Err(ConfigError::Validation(format!(
                        "Binding endpoint '{}' is not of the form path->port",
                        side
                    )));
                }
            }
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Finds a clock configuration by name.
    pub fn find_clock(&self, name: &str) -> Option<&ClockConfig> {
        self.clocks.iter().find(|c| c.name == name)
    }
}

/// Builder for creating LauncherConfig programmatically.
#[derive(Default)]
pub struct LauncherConfigBuilder {
    config: LauncherConfig,
}

impl LauncherConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.simulation.name = name.into();
        self
    }

    /// Sets the time at which a free run ends.
    pub fn max_time(mut self, time: SimTime) -> Self {
        self.config.simulation.max_time = Some(time);
        self
    }

    /// Sets the number of block executions per dispatch slice.
    pub fn dispatch_slice(mut self, slice: u64) -> Self {
        self.config.simulation.dispatch_slice = slice;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Enables statistics collection.
    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    /// Sets the statistics output directory.
    pub fn output_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.simulation.output_dir = Some(dir.into());
        self
    }

    /// Adds a clock domain.
    pub fn add_clock(mut self, name: impl Into<String>, frequency: u64) -> Self {
        self.config.clocks.push(ClockConfig {
            name: name.into(),
            frequency,
            components: Vec::new(),
        });
        self
    }

    /// Adds a clock domain driving the given component paths.
    pub fn add_clock_for(
        mut self,
        name: impl Into<String>,
        frequency: u64,
        components: &[&str],
    ) -> Self {
        self.config.clocks.push(ClockConfig {
            name: name.into(),
            frequency,
            components: components.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Adds a port binding.
    pub fn bind(mut self, master: impl Into<String>, slave: impl Into<String>) -> Self {
        self.config.bindings.push(BindingConfig {
            master: master.into(),
            slave: slave.into(),
            mux: None,
        });
        self
    }

    /// Adds a port binding with a pinned mux id.
    pub fn bind_muxed(
        mut self,
        master: impl Into<String>,
        slave: impl Into<String>,
        mux: u32,
    ) -> Self {
        self.config.bindings.push(BindingConfig {
            master: master.into(),
            slave: slave.into(),
            mux: Some(mux),
        });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<LauncherConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LauncherConfig::new();
        assert_eq!(config.simulation.max_time, None);
        assert_eq!(config.simulation.dispatch_slice, 10_000);
        assert_eq!(config.simulation.log_level, "info");
        assert!(config.clocks.is_empty());
    }

    #[test]
    fn test_validation_log_level() {
        for level in ["warn", "soctime=trace,info"] {
            let config = LauncherConfigBuilder::new().log_level(level).build().unwrap();
            assert_eq!(config.simulation.log_level, level);
        }
        assert!(matches!(
            LauncherConfigBuilder::new().log_level("soctime=loud").build(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
simulation:
  max_time: 5000000
  log_level: debug

clocks:
  - name: core
    frequency: 100000000
    components: [/soc/cpu]
  - name: periph
    frequency: 25000000

bindings:
  - master: /soc/timer->irq
    slave: /soc/cpu->irq
  - master: /soc/uart->irq
    slave: /soc/cpu->irq
    mux: 4
"#;

        let config = LauncherConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.simulation.max_time, Some(5_000_000));
        assert_eq!(config.simulation.log_level, "debug");
        assert_eq!(config.clocks.len(), 2);
        assert_eq!(config.find_clock("core").unwrap().components, vec!["/soc/cpu"]);
        assert_eq!(config.bindings.len(), 2);
        assert_eq!(config.bindings[0].mux, None);
        assert_eq!(config.bindings[1].mux, Some(4));
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "simulation": { "dispatch_slice": 64 },
            "clocks": [ { "name": "core", "frequency": 1000000000 } ]
        }"#;

        let config = LauncherConfig::from_json(json).unwrap();
        assert_eq!(config.simulation.dispatch_slice, 64);
        assert_eq!(config.find_clock("core").unwrap().frequency, 1_000_000_000);
    }

    #[test]
    fn test_builder() {
        let config = LauncherConfigBuilder::new()
            .name("bring-up")
            .max_time(1_000_000)
            .add_clock("core", 100_000_000)
            .add_clock_for("periph", 50_000_000, &["/soc/uart"])
            .bind("/soc/uart->irq", "/soc/cpu->irq")
            .bind_muxed("/soc/timer->irq", "/soc/cpu->irq", 2)
            .build()
            .unwrap();

        assert_eq!(config.simulation.name, "bring-up");
        assert_eq!(config.clocks.len(), 2);
        assert_eq!(config.bindings[0].slave, "/soc/cpu->irq");
        assert_eq!(config.bindings[1].mux, Some(2));
    }

    #[test]
    fn test_validation_zero_frequency() {
        let yaml = r#"
clocks:
  - name: dead
    frequency: 0
"#;
        assert!(matches!(
            LauncherConfig::from_yaml(yaml),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_duplicate_clock() {
        let result = LauncherConfigBuilder::new()
            .add_clock("core", 1)
            .add_clock("core", 2)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_component_in_two_domains() {
        let result = LauncherConfigBuilder::new()
            .add_clock_for("a", 1, &["/soc/cpu"])
            .add_clock_for("b", 2, &["soc/cpu"])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_malformed_binding() {
        let result = LauncherConfigBuilder::new().bind("/soc/uart", "/cpu->irq").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_extension() {
        assert!(matches!(
            LauncherConfig::from_file("system.toml"),
            Err(ConfigError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = LauncherConfigBuilder::new()
            .max_time(1000)
            .add_clock("core", 100_000_000)
            .build()
            .unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = LauncherConfig::from_yaml(&yaml).unwrap();

        assert_eq!(config.simulation.max_time, restored.simulation.max_time);
        assert_eq!(restored.clocks[0].frequency, 100_000_000);
    }
}
