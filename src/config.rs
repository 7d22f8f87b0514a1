use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::state::Role;

pub const VALS_SIZE: usize = 100_000;
pub const READER_ITERS: usize = 50_000;
pub const WRITER_ITERS: usize = 50_000;
pub const CHECK_EACH_ITER: usize = 50;
pub const READER_SLEEPS_EACH_ITER_MICROS: u64 = 1;
pub const WRITER_SLEEPS_EACH_ITER_MICROS: u64 = 3;
pub const READER_CPU: usize = 2;
pub const WRITER_CPU: usize = 3;
pub const PREPARATION_WAIT_MILLIS: u64 = 10;
pub const TEST_ITERS: u32 = 1000;
pub const MAIN_RANDOM_START_SEED: u32 = 65;
pub const READ_RANDOM_START_SEED: u32 = 6565;
pub const WRITE_RANDOM_START_SEED: u32 = 651;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("array_len must be non-zero")]
    EmptyArray,
    #[error("{role} iterations ({iterations}) exceed array_len ({array_len}); sampling without replacement would never finish")]
    IterationBudget {
        role: Role,
        iterations: usize,
        array_len: usize,
    },
    #[error("check_every must be non-zero")]
    ZeroCadence,
    #[error("check_first ({check_first}) exceeds array_len ({array_len})")]
    CheckWindow { check_first: usize, array_len: usize },
    #[error("reader and writer are both assigned to processing unit {0}")]
    SameCpu(usize),
    #[error("unknown {kind} `{value}`")]
    UnknownVariant { kind: &'static str, value: String },
}

/// How strictly the processing-unit assignment is enforced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    /// Abort at startup when a requested unit is unavailable.
    Required,
    /// Log and continue unpinned.
    #[default]
    Preferred,
    Off,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Concurrent,
    /// Writer then reader on the orchestrator thread; a control run.
    Sequential,
}

impl FromStr for PinMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(PinMode::Required),
            "preferred" => Ok(PinMode::Preferred),
            "off" => Ok(PinMode::Off),
            _ => Err(ConfigError::UnknownVariant {
                kind: "pin mode",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "concurrent" => Ok(ExecutionMode::Concurrent),
            "sequential" => Ok(ExecutionMode::Sequential),
            _ => Err(ConfigError::UnknownVariant {
                kind: "execution mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Concurrent => write!(f, "concurrent"),
            ExecutionMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// Base seeds; each trial offsets them by its ordinal number.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Seeds {
    #[serde(default = "default_main_seed")]
    pub main: u32,
    #[serde(default = "default_reader_seed")]
    pub reader: u32,
    #[serde(default = "default_writer_seed")]
    pub writer: u32,
}

impl Default for Seeds {
    fn default() -> Self {
        Self {
            main: default_main_seed(),
            reader: default_reader_seed(),
            writer: default_writer_seed(),
        }
    }
}

impl Seeds {
    pub fn main_for(&self, trial: u32) -> u32 {
        self.main.wrapping_add(trial)
    }

    pub fn reader_for(&self, trial: u32) -> u32 {
        self.reader.wrapping_add(trial)
    }

    pub fn writer_for(&self, trial: u32) -> u32 {
        self.writer.wrapping_add(trial)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HarnessConfig {
    #[serde(default = "default_array_len")]
    pub array_len: usize,
    #[serde(default = "default_reader_iterations")]
    pub reader_iterations: usize,
    #[serde(default = "default_writer_iterations")]
    pub writer_iterations: usize,
    #[serde(default = "default_check_every")]
    pub check_every: usize,
    /// Detector window; `None` scans the whole array.
    #[serde(default)]
    pub check_first: Option<usize>,
    #[serde(default = "default_reader_sleep_micros")]
    pub reader_sleep_micros: u64,
    #[serde(default = "default_writer_sleep_micros")]
    pub writer_sleep_micros: u64,
    #[serde(default = "default_reader_cpu")]
    pub reader_cpu: usize,
    #[serde(default = "default_writer_cpu")]
    pub writer_cpu: usize,
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
    #[serde(default = "default_trials")]
    pub trials: u32,
    #[serde(default)]
    pub seeds: Seeds,
    #[serde(default)]
    pub pin: PinMode,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            array_len: default_array_len(),
            reader_iterations: default_reader_iterations(),
            writer_iterations: default_writer_iterations(),
            check_every: default_check_every(),
            check_first: None,
            reader_sleep_micros: default_reader_sleep_micros(),
            writer_sleep_micros: default_writer_sleep_micros(),
            reader_cpu: default_reader_cpu(),
            writer_cpu: default_writer_cpu(),
            settle_millis: default_settle_millis(),
            trials: default_trials(),
            seeds: Seeds::default(),
            pin: PinMode::default(),
            mode: ExecutionMode::default(),
        }
    }
}

impl HarnessConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: HarnessConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    pub fn check_window(&self) -> usize {
        self.check_first.unwrap_or(self.array_len)
    }

    pub fn reader_sleep(&self) -> Duration {
        Duration::from_micros(self.reader_sleep_micros)
    }

    pub fn writer_sleep(&self) -> Duration {
        Duration::from_micros(self.writer_sleep_micros)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.array_len == 0 {
            return Err(ConfigError::EmptyArray);
        }
        for (role, iterations) in [
            (Role::Reader, self.reader_iterations),
            (Role::Writer, self.writer_iterations),
        ] {
            if iterations > self.array_len {
                return Err(ConfigError::IterationBudget {
                    role,
                    iterations,
                    array_len: self.array_len,
                });
            }
        }
        if self.check_every == 0 {
            return Err(ConfigError::ZeroCadence);
        }
        if self.check_window() > self.array_len {
            return Err(ConfigError::CheckWindow {
                check_first: self.check_window(),
                array_len: self.array_len,
            });
        }
        if self.pin != PinMode::Off && self.reader_cpu == self.writer_cpu {
            return Err(ConfigError::SameCpu(self.reader_cpu));
        }
        Ok(())
    }
}

fn default_array_len() -> usize {
    VALS_SIZE
}

fn default_reader_iterations() -> usize {
    READER_ITERS
}

fn default_writer_iterations() -> usize {
    WRITER_ITERS
}

fn default_check_every() -> usize {
    CHECK_EACH_ITER
}

fn default_reader_sleep_micros() -> u64 {
    READER_SLEEPS_EACH_ITER_MICROS
}

fn default_writer_sleep_micros() -> u64 {
    WRITER_SLEEPS_EACH_ITER_MICROS
}

fn default_reader_cpu() -> usize {
    READER_CPU
}

fn default_writer_cpu() -> usize {
    WRITER_CPU
}

fn default_settle_millis() -> u64 {
    PREPARATION_WAIT_MILLIS
}

fn default_trials() -> u32 {
    TEST_ITERS
}

fn default_main_seed() -> u32 {
    MAIN_RANDOM_START_SEED
}

fn default_reader_seed() -> u32 {
    READ_RANDOM_START_SEED
}

fn default_writer_seed() -> u32 {
    WRITE_RANDOM_START_SEED
}
