#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
pub mod files;
pub mod job_kind;
pub mod params;
pub mod tools;
pub mod work_item;

pub use error::{CoreError, CoreResult};
pub use files::{FileInfo, Files, RequiredFile};
pub use job_kind::{FileFormat, JobKind};
pub use params::{JobParam, JobParams};
pub use tools::{ToolInfo, Tools};
pub use work_item::WorkItem;

/// Tracing target for core data-model operations.
pub const TRACING_TARGET: &str = "simflow_core";
