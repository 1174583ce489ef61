//! Process creation boundary.
//!
//! Abstracts "start this tool with these files and arguments" from where it
//! actually runs, so the scheduler stays agnostic to local-vs-remote
//! execution.

use std::path::PathBuf;

use async_trait::async_trait;
use simflow_core::{RequiredFile, ToolInfo};

use crate::error::RunResult;

mod local;

pub use local::LocalProcessCreator;

/// Everything needed to start one tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// The tool to start.
    pub tool: ToolInfo,
    /// Files to make available in the working directory before the tool
    /// runs: (current location, location relative to the working
    /// directory).
    pub required_files: Vec<RequiredFile>,
    /// Command-line parameters.
    pub parameters: Vec<String>,
    /// Working directory for the invocation.
    pub out_dir: PathBuf,
    /// Files the tool is expected to produce.
    pub expected_output_files: Vec<PathBuf>,
    /// Data written to the tool's standard input, if any.
    pub stdin: Option<String>,
    /// Base path relative required-file sources are resolved against.
    pub base_path: PathBuf,
}

impl ProcessRequest {
    /// Creates a request with the given tool and working directory.
    pub fn new(tool: ToolInfo, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            required_files: Vec::new(),
            parameters: Vec::new(),
            out_dir: out_dir.into(),
            expected_output_files: Vec::new(),
            stdin: None,
            base_path: PathBuf::new(),
        }
    }
}

/// Result of one finished tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code; zero means the tool reported success.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Expected output files that actually exist after the run.
    pub output_files: Vec<PathBuf>,
}

impl ProcessOutcome {
    /// Returns whether the tool exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A started tool invocation.
#[async_trait]
pub trait Process: Send {
    /// Waits for the invocation to finish and returns its outcome.
    async fn wait(&mut self) -> RunResult<ProcessOutcome>;
}

/// Creates processes for the scheduler.
///
/// A creator is responsible for making every required file available at its
/// target location before or while the process runs.
#[async_trait]
pub trait ProcessCreator: Send + Sync {
    /// Whether this creator manages remote processes.
    fn is_remote_manager(&self) -> bool;

    /// Starts a tool invocation.
    async fn create_process(&self, request: ProcessRequest) -> RunResult<Box<dyn Process>>;

    /// Re-attaches to a previously started remote process by id.
    ///
    /// Local creators cannot do this and fail with a configuration error.
    async fn restore_process(&self, remote_id: u64) -> RunResult<Box<dyn Process>>;
}
