//! Stress harness that races an unsynchronized reader and writer over a
//! shared array and watches for rematerialized loads.
#![warn(non_snake_case)]

pub mod concurrency;
pub mod config;
pub mod detect;
pub mod harness;
pub mod options;
pub mod raced;
pub mod report;
pub mod rng;
pub mod state;
pub mod util;
