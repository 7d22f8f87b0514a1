//! Parsing Options.
//! 选项来自环境变量 `REMAT_FLAGS`，例如 `-t 10 -m sequential -p off`。

use clap::{Arg, Command};
use thiserror::Error;

use crate::config::{ConfigError, ExecutionMode, HarnessConfig, PinMode};

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("mismatched quotes in flags")]
    MismatchedQuotes(#[from] shellwords::MismatchedQuotes),
    #[error(transparent)]
    Clap(#[from] clap::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn make_options_parser() -> clap::Command {
    Command::new("remat-harness")
        .no_binary_name(true)
        .version("v0.1.0")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML file overriding the built-in settings"),
        )
        .arg(
            Arg::new("trials")
                .short('t')
                .long("trials")
                .value_name("N")
                .value_parser(clap::value_parser!(u32))
                .help("Number of trials to run"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_parser(["concurrent", "sequential"]),
        )
        .arg(
            Arg::new("pin")
                .short('p')
                .long("pin")
                .help("How strictly reader and writer are bound to their processing units")
                .value_parser(["required", "preferred", "off"]),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Path to file where the run report will be stored"),
        )
}

/// Flags given on top of the configuration file. Unset flags leave the
/// loaded configuration untouched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Options {
    pub config: Option<String>,
    pub trials: Option<u32>,
    pub mode: Option<ExecutionMode>,
    pub pin: Option<PinMode>,
    pub output: Option<String>,
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, OptionsError> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self, OptionsError> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let mode = matches
            .get_one::<String>("mode")
            .map(|s| s.parse::<ExecutionMode>())
            .transpose()?;
        let pin = matches
            .get_one::<String>("pin")
            .map(|s| s.parse::<PinMode>())
            .transpose()?;

        Ok(Options {
            config: matches.get_one::<String>("config").cloned(),
            trials: matches.get_one::<u32>("trials").copied(),
            mode,
            pin,
            output: matches.get_one::<String>("output").cloned(),
        })
    }

    /// Overrides `config` with every flag that was given.
    pub fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(pin) = self.pin {
            config.pin = pin;
        }
        config
    }

    /// Defaults, then the `--config` file if any, then the flags.
    pub fn load_config(&self) -> anyhow::Result<HarnessConfig> {
        let base = match &self.config {
            Some(path) => HarnessConfig::load_from_file(path)?,
            None => HarnessConfig::default(),
        };
        Ok(self.apply(base))
    }
}
