//! Engine configuration.
//!
//! Loaded from JSON, then optionally overridden from `MEMSCOPE_*`
//! environment variables, then validated before an engine is built.

use crate::error::{Error, Result};
use crate::thread_buffer::MAX_REFS;
use crate::trace_sink::DEFAULT_TRACE_PATH;
use crate::working_set::DEFAULT_WORKING_SET_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SAMPLING: &str = "MEMSCOPE_SAMPLING";
pub const ENV_SAMPLING_INTERVAL: &str = "MEMSCOPE_SAMPLING_INTERVAL";
pub const ENV_TRACE: &str = "MEMSCOPE_TRACE";
pub const ENV_TRACE_PATH: &str = "MEMSCOPE_TRACE_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub enabled: bool,
    /// Keep one of every `interval` references.
    pub interval: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from(DEFAULT_TRACE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub sampling: SamplingConfig,
    pub trace: TraceConfig,
    pub buffer_capacity: usize,
    pub working_set_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            trace: TraceConfig::default(),
            buffer_capacity: MAX_REFS,
            working_set_capacity: DEFAULT_WORKING_SET_CAPACITY,
        }
    }
}

impl ObserverConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Applies `MEMSCOPE_*` variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_SAMPLING) {
            self.sampling.enabled = parse_flag(ENV_SAMPLING, &value)?;
        }
        if let Some(value) = lookup(ENV_SAMPLING_INTERVAL) {
            self.sampling.interval = value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a positive integer, got {:?}",
                    ENV_SAMPLING_INTERVAL, value
                ))
            })?;
        }
        if let Some(value) = lookup(ENV_TRACE) {
            self.trace.enabled = parse_flag(ENV_TRACE, &value)?;
        }
        if let Some(value) = lookup(ENV_TRACE_PATH) {
            self.trace.path = PathBuf::from(value);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampling.interval == 0 {
            return Err(Error::Config("sampling interval must be at least 1".to_string()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Config("buffer capacity must be at least 1".to_string()));
        }
        if self.working_set_capacity == 0 {
            return Err(Error::Config(
                "working set capacity must be at least 1".to_string(),
            ));
        }
        if self.trace.enabled && self.trace.path.as_os_str().is_empty() {
            return Err(Error::Config("trace path is empty".to_string()));
        }
        Ok(())
    }

    pub fn with_sampling(mut self, interval: u64) -> Self {
        self.sampling = SamplingConfig {
            enabled: true,
            interval,
        };
        self
    }

    pub fn with_trace<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.trace = TraceConfig {
            enabled: true,
            path: path.as_ref().to_path_buf(),
        };
        self
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{} must be a boolean, got {:?}", key, value))),
    }
}
