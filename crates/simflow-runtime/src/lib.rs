#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
pub mod job;
pub mod manager;
pub mod process;
pub mod script;
pub mod workflow;

pub use error::{RunError, RunResult};

/// Tracing target for runtime operations.
pub const TRACING_TARGET: &str = "simflow_runtime";
