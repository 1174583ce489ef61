//! The run manager: a bounded scheduler over persisted job trees.
//!
//! The manager owns every enqueued [`JobTree`], dispatches ready nodes to a
//! process creator under a concurrency bound, and mirrors all state changes
//! into a versioned [`JobStore`]. The store is the source of truth: a
//! manager reopened on an existing store picks up pending work where it was
//! left, preserving completed nodes' results, timestamps, and diagnostics.

mod store;

pub use store::{JobStore, STORE_VERSION};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use derive_builder::Builder;
use simflow_core::{FileInfo, Files, JobKind, JobParams, ToolInfo};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::TRACING_TARGET;
use crate::error::{RunError, RunResult};
use crate::job::{
    JobErrors, JobIndex, JobNode, JobState, JobTree, MergedJobResult, optimize_job_tree,
};
use crate::process::{ProcessCreator, ProcessRequest};
use crate::script::RubyJobBuilder;
use crate::workflow::Workflow;

/// Configuration for the run manager.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RunManagerConfig {
    /// Maximum number of concurrently running jobs.
    #[builder(default = "4")]
    pub queue_size: usize,

    /// Whether enqueued trees get their scripted chains merged.
    #[builder(default = "true")]
    pub optimize_jobs: bool,

    /// Whether the manager starts paused.
    #[builder(default = "false")]
    pub start_paused: bool,
}

impl RunManagerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.queue_size {
            if size == 0 {
                return Err("queue_size must be at least 1".into());
            }
        }
        Ok(())
    }
}

impl Default for RunManagerConfig {
    fn default() -> Self {
        Self {
            queue_size: 4,
            optimize_jobs: true,
            start_paused: false,
        }
    }
}

/// Counts of physical nodes per lifecycle state across all trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunManagerStatus {
    pub not_started: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
}

/// The scheduler and execution loop.
pub struct RunManager {
    config: RunManagerConfig,
    store: JobStore,
    creator: Arc<dyn ProcessCreator>,
    semaphore: Arc<Semaphore>,
    trees: Vec<JobTree>,
    paused: bool,
}

impl RunManager {
    /// Creates a manager over an already-open store, rehydrating its
    /// persisted trees. Nodes caught mid-run by a previous shutdown are
    /// requeued.
    pub fn new(
        config: RunManagerConfig,
        store: JobStore,
        creator: Arc<dyn ProcessCreator>,
    ) -> Self {
        let mut trees = store.load_trees();
        for tree in &mut trees {
            tree.reset_interrupted();
        }
        let semaphore = Arc::new(Semaphore::new(config.queue_size));
        let paused = config.start_paused;

        tracing::info!(
            target: TRACING_TARGET,
            store = %store.path().display(),
            queue_size = config.queue_size,
            trees = trees.len(),
            "run manager initialized",
        );

        Self {
            config,
            store,
            creator,
            semaphore,
            trees,
            paused,
        }
    }

    /// Opens (or creates) the store at `path` and builds a manager over it.
    pub fn open(
        config: RunManagerConfig,
        path: impl Into<PathBuf>,
        creator: Arc<dyn ProcessCreator>,
    ) -> RunResult<Self> {
        Ok(Self::new(config, JobStore::open(path)?, creator))
    }

    /// Returns the manager configuration.
    pub fn config(&self) -> &RunManagerConfig {
        &self.config
    }

    /// Returns the enqueued trees.
    pub fn trees(&self) -> &[JobTree] {
        &self.trees
    }

    /// Enqueues a tree for execution and persists it. A paused manager
    /// accepts the tree but will not start it until unpaused.
    pub fn enqueue(&mut self, mut tree: JobTree) -> RunResult<()> {
        if self.config.optimize_jobs {
            optimize_job_tree(&mut tree);
        }
        tracing::debug!(
            target: TRACING_TARGET,
            jobs = tree.job_count(),
            out_dir = %tree.out_dir().display(),
            "tree enqueued",
        );
        self.trees.push(tree);
        self.store.save_trees(&self.trees)
    }

    /// Stops dispatching. Already-running jobs finish; nothing new starts.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes dispatching; all currently-ready nodes become eligible at
    /// once on the next wait.
    pub fn unpause(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Removes every tree, pending or not. Bulk removal swaps the list out
    /// rather than deleting nodes one at a time.
    pub fn clear_jobs(&mut self) -> RunResult<()> {
        let dropped = std::mem::take(&mut self.trees);
        tracing::debug!(
            target: TRACING_TARGET,
            trees = dropped.len(),
            "cleared all trees",
        );
        self.store.clear_trees()
    }

    /// Counts nodes per state across all trees.
    pub fn status(&self) -> RunManagerStatus {
        let mut status = RunManagerStatus::default();
        for tree in &self.trees {
            for (_, node) in tree.iter() {
                match node.state {
                    JobState::NotStarted => status.not_started += 1,
                    JobState::Running => status.running += 1,
                    JobState::Finished => status.finished += 1,
                    JobState::Failed => status.failed += 1,
                }
            }
        }
        status
    }

    /// Persists a workflow definition under its structural key.
    pub fn persist_workflow(&mut self, workflow: &Workflow) -> RunResult<String> {
        self.store.persist_workflow(workflow)
    }

    /// Loads the workflow persisted under `key`.
    pub fn load_workflow(&self, key: &str) -> RunResult<Workflow> {
        self.store.load_workflow(key)
    }

    /// Runs until no ready-or-running work remains.
    ///
    /// Safe to call repeatedly from a single coordinator; a call on a
    /// paused or drained manager returns immediately. Failed prerequisites
    /// do not abort sibling branches, they only leave their dependents
    /// blocked.
    pub async fn wait_for_finished(&mut self) -> RunResult<()> {
        loop {
            if self.paused {
                break;
            }

            let mut batch = Vec::new();
            for (slot, tree) in self.trees.iter_mut().enumerate() {
                for index in tree.ready_jobs() {
                    tree.node_mut(index).state = JobState::Running;
                    batch.push((slot, index, tree.node(index).clone(), tree.out_dir().to_path_buf()));
                }
            }
            if batch.is_empty() {
                break;
            }

            let mut workers: JoinSet<(usize, JobIndex, JobRun)> = JoinSet::new();
            for (slot, index, node, out_dir) in batch {
                let creator = Arc::clone(&self.creator);
                let semaphore = Arc::clone(&self.semaphore);
                workers.spawn(async move {
                    let run = match semaphore.acquire_owned().await {
                        Ok(_permit) => execute_job(creator.as_ref(), &node, &out_dir).await,
                        Err(_) => JobRun::failed("worker pool closed"),
                    };
                    (slot, index, run)
                });
            }

            while let Some(joined) = workers.join_next().await {
                let (slot, index, run) = joined
                    .map_err(|e| RunError::Internal(format!("worker task failed: {e}")))?;
                let node = self.trees[slot].node_mut(index);
                node.state = if run.errors.succeeded() {
                    JobState::Finished
                } else {
                    JobState::Failed
                };
                node.errors = run.errors;
                node.output_files = run.output_files;
                node.merged_results = run.merged_results;
                node.last_run = Some(jiff::Timestamp::now());
                tracing::debug!(
                    target: TRACING_TARGET,
                    job = %node.id,
                    kind = %node.kind,
                    state = %node.state,
                    "job completed",
                );
            }

            self.store.save_trees(&self.trees)?;
        }

        self.store.save_trees(&self.trees)?;
        Ok(())
    }
}

struct JobRun {
    errors: JobErrors,
    output_files: Files,
    merged_results: Vec<MergedJobResult>,
}

impl JobRun {
    fn failed(message: &str) -> Self {
        let mut errors = JobErrors::new();
        errors.add_error(message);
        Self {
            errors,
            output_files: Files::new(),
            merged_results: Vec::new(),
        }
    }
}

/// Runs one node to completion and captures its results.
async fn execute_job(creator: &dyn ProcessCreator, node: &JobNode, out_dir: &Path) -> JobRun {
    if node.is_merged() {
        return execute_merged(creator, node, out_dir).await;
    }

    let mut errors = JobErrors::new();
    let mut output_files = Files::new();

    if let Some(tool_name) = node.kind.tool_name() {
        match node.tools.get(tool_name) {
            Err(_) => {
                errors.add_error(format!("tool {tool_name} is not registered"));
            }
            Ok(tool) => {
                let request = build_request(tool.clone(), node, node.kind, &node.params, out_dir);
                run_process(creator, request, &mut errors, &mut output_files).await;
            }
        }
    }

    JobRun {
        errors,
        output_files,
        merged_results: Vec::new(),
    }
}

/// Runs every folded logical step of a merged node in execution order, one
/// invocation per step, all sharing the node's run directory.
///
/// Results stay attributed per step, so merging never changes what a caller
/// observes per original job. A failed step stops the remaining ones.
async fn execute_merged(creator: &dyn ProcessCreator, node: &JobNode, out_dir: &Path) -> JobRun {
    let mut errors = JobErrors::new();
    let mut output_files = Files::new();
    let mut merged_results = Vec::with_capacity(node.merged_steps.len());

    for step in &node.merged_steps {
        let mut step_errors = JobErrors::new();
        let mut step_outputs = Files::new();

        if let Some(tool_name) = step.kind.tool_name() {
            match node.tools.get(tool_name) {
                Err(_) => {
                    step_errors.add_error(format!("tool {tool_name} is not registered"));
                }
                Ok(tool) => {
                    let request =
                        build_request(tool.clone(), node, step.kind, &step.params, out_dir);
                    run_process(creator, request, &mut step_errors, &mut step_outputs).await;
                }
            }
        }

        let failed = !step_errors.succeeded();
        errors.extend(&step_errors);
        output_files.append_all(step_outputs.clone());
        merged_results.push(MergedJobResult {
            id: step.id,
            errors: step_errors,
            output_files: step_outputs,
        });
        if failed {
            break;
        }
    }

    JobRun {
        errors,
        output_files,
        merged_results,
    }
}

fn build_request(
    tool: ToolInfo,
    node: &JobNode,
    kind: JobKind,
    params: &JobParams,
    out_dir: &Path,
) -> ProcessRequest {
    let mut request = ProcessRequest::new(tool, out_dir.join(node.id.to_string()));
    request.base_path = out_dir.to_path_buf();
    request.required_files = node
        .files
        .iter()
        .flat_map(|f| f.required_files.iter().cloned())
        .collect();
    request.parameters = invocation_parameters(kind, params);
    if let Some(extension) = kind.output_file_format().extension() {
        request
            .expected_output_files
            .push(PathBuf::from(format!("out.{extension}")));
    }
    request
}

/// Command-line parameters for one invocation. Scripted jobs interleave the
/// tool's own flags, the script path, and the script's arguments; other
/// kinds take whatever inputs their tool conventionally discovers in the
/// working directory.
fn invocation_parameters(kind: JobKind, params: &JobParams) -> Vec<String> {
    if !kind.is_scripted() {
        return Vec::new();
    }
    let Ok(builder) = RubyJobBuilder::from_params(params) else {
        return Vec::new();
    };
    let mut parameters: Vec<String> =
        builder.tool_parameters().iter().cloned().collect();
    if let Some(script) = builder.script() {
        parameters.push(script.display().to_string());
    }
    parameters.extend(builder.script_parameters().iter().cloned());
    parameters
}

async fn run_process(
    creator: &dyn ProcessCreator,
    request: ProcessRequest,
    errors: &mut JobErrors,
    output_files: &mut Files,
) {
    let expected = request.expected_output_files.clone();
    let run_dir = request.out_dir.clone();
    let tool_name = request.tool.name.clone();

    let mut process = match creator.create_process(request).await {
        Ok(process) => process,
        Err(e) => {
            errors.add_error(format!("failed to start {tool_name}: {e}"));
            return;
        }
    };
    let outcome = match process.wait().await {
        Ok(outcome) => outcome,
        Err(e) => {
            errors.add_error(format!("{tool_name} did not finish: {e}"));
            return;
        }
    };

    if !outcome.success() {
        errors.add_error(format!(
            "{tool_name} exited with status {}",
            outcome.exit_code
        ));
        if !outcome.stderr.trim().is_empty() {
            errors.add_error(outcome.stderr.trim().to_string());
        }
    }
    for expected in &expected {
        let produced = outcome
            .output_files
            .iter()
            .any(|p| p == expected || p == &run_dir.join(expected));
        if !produced {
            errors.add_warning(format!(
                "expected output {} was not produced",
                expected.display()
            ));
        }
    }
    for path in outcome.output_files {
        let key = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "out".to_string());
        output_files.append(FileInfo::with_exists(key, path, true));
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use simflow_core::{JobKind, ToolInfo, Tools};

    use super::*;
    use crate::process::{Process, ProcessOutcome};
    use crate::workflow::CreateOptions;

    /// A creator whose processes succeed instantly without spawning
    /// anything.
    struct InstantCreator;

    struct InstantProcess;

    #[async_trait]
    impl Process for InstantProcess {
        async fn wait(&mut self) -> RunResult<ProcessOutcome> {
            Ok(ProcessOutcome {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                output_files: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl ProcessCreator for InstantCreator {
        fn is_remote_manager(&self) -> bool {
            false
        }

        async fn create_process(
            &self,
            _request: ProcessRequest,
        ) -> RunResult<Box<dyn Process>> {
            Ok(Box::new(InstantProcess))
        }

        async fn restore_process(&self, _remote_id: u64) -> RunResult<Box<dyn Process>> {
            Err(RunError::Configuration("not a remote manager".into()))
        }
    }

    /// A creator that records the parameters of every invocation it starts.
    #[derive(Default)]
    struct RecordingCreator {
        calls: std::sync::Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ProcessCreator for RecordingCreator {
        fn is_remote_manager(&self) -> bool {
            false
        }

        async fn create_process(
            &self,
            request: ProcessRequest,
        ) -> RunResult<Box<dyn Process>> {
            self.calls.lock().unwrap().push(request.parameters);
            Ok(Box::new(InstantProcess))
        }

        async fn restore_process(&self, _remote_id: u64) -> RunResult<Box<dyn Process>> {
            Err(RunError::Configuration("not a remote manager".into()))
        }
    }

    fn manager_at(dir: &Path) -> RunManager {
        RunManager::open(
            RunManagerConfig::default(),
            dir.join("jobs.json"),
            Arc::new(InstantCreator),
        )
        .unwrap()
    }

    fn null_tree(dir: &Path, jobs: usize) -> JobTree {
        let mut workflow = Workflow::new();
        for _ in 0..jobs {
            workflow.add_job_kind(JobKind::Null);
        }
        workflow
            .create(CreateOptions::new(dir.join("out")))
            .unwrap()
    }

    #[test]
    fn test_config_rejects_zero_queue() {
        assert!(
            RunManagerConfigBuilder::default()
                .queue_size(0usize)
                .build()
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_null_chain_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_at(dir.path());
        manager.enqueue(null_tree(dir.path(), 3)).unwrap();

        manager.wait_for_finished().await.unwrap();

        let status = manager.status();
        assert_eq!(status.finished, 3);
        assert_eq!(status.failed, 0);
        let tree = &manager.trees()[0];
        assert_eq!(tree.depth(), 3);
        assert!(tree.tree_errors(tree.root()).is_empty());
    }

    #[tokio::test]
    async fn test_paused_manager_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_at(dir.path());
        manager.pause();
        manager.enqueue(null_tree(dir.path(), 2)).unwrap();

        manager.wait_for_finished().await.unwrap();
        assert_eq!(manager.status().not_started, 2);

        manager.unpause();
        manager.wait_for_finished().await.unwrap();
        assert_eq!(manager.status().finished, 2);
    }

    #[tokio::test]
    async fn test_missing_tool_fails_job_without_aborting_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_at(dir.path());

        // EnergyPlus needs a tool that was never registered; the Null
        // prerequisite still runs.
        let mut workflow = Workflow::new();
        workflow.add_job_kind(JobKind::EnergyPlus);
        workflow.add_job_kind(JobKind::Null);
        let tree = workflow
            .create(CreateOptions::new(dir.path().join("out")))
            .unwrap();
        manager.enqueue(tree).unwrap();

        manager.wait_for_finished().await.unwrap();
        let status = manager.status();
        assert_eq!(status.finished, 1);
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn test_clear_jobs_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_at(dir.path());
        manager.enqueue(null_tree(dir.path(), 2)).unwrap();
        manager.clear_jobs().unwrap();
        assert!(manager.trees().is_empty());

        let reopened = manager_at(dir.path());
        assert!(reopened.trees().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_chain_executes_merged_with_per_step_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_at(dir.path());

        let mut tools = Tools::new();
        tools.append(ToolInfo::new("ruby", "/usr/bin/ruby"));
        let mut workflow = Workflow::new();
        for i in 0..3 {
            let mut builder = RubyJobBuilder::new();
            builder.set_script_file(format!("step_{i}.rb"));
            let mut item = builder.to_work_item();
            item.tools = tools.clone();
            workflow.add_job(item);
        }
        let mut translate = simflow_core::WorkItem::new(JobKind::ModelToIdf);
        translate
            .tools
            .append(ToolInfo::new("modeltoidf", "/usr/bin/modeltoidf"));
        workflow.add_job(translate);

        let tree = workflow
            .create(CreateOptions::new(dir.path().join("out")))
            .unwrap();
        assert_eq!(tree.job_count(), 4);

        manager.enqueue(tree).unwrap();
        let tree = &manager.trees()[0];
        // Three scripted steps fold into one physical node.
        assert_eq!(tree.job_count(), 2);

        let step_ids: Vec<_> = manager.trees()[0]
            .node(manager.trees()[0].root())
            .merged_steps
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(step_ids.len(), 3);

        manager.wait_for_finished().await.unwrap();
        assert_eq!(manager.status().failed, 0);
        let results = manager.trees()[0].merged_job_results();
        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(step_ids.contains(&result.id));
            assert!(result.errors.succeeded());
        }
    }

    #[tokio::test]
    async fn test_merged_node_invokes_every_step_script() {
        let dir = tempfile::tempdir().unwrap();
        let creator = Arc::new(RecordingCreator::default());
        let mut manager = RunManager::open(
            RunManagerConfig::default(),
            dir.path().join("jobs.json"),
            creator.clone(),
        )
        .unwrap();

        let mut tools = Tools::new();
        tools.append(ToolInfo::new("ruby", "/usr/bin/ruby"));
        let mut workflow = Workflow::new();
        for i in 0..3 {
            let mut builder = RubyJobBuilder::new();
            builder.set_script_file(format!("step_{i}.rb"));
            let mut item = builder.to_work_item();
            item.tools = tools.clone();
            workflow.add_job(item);
        }
        let tree = workflow
            .create(CreateOptions::new(dir.path().join("out")))
            .unwrap();
        manager.enqueue(tree).unwrap();
        assert_eq!(manager.trees()[0].job_count(), 1);

        manager.wait_for_finished().await.unwrap();
        assert_eq!(manager.status().failed, 0);

        // One invocation per folded step, deepest step first.
        let calls = creator.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].iter().any(|p| p.ends_with("step_2.rb")));
        assert!(calls[1].iter().any(|p| p.ends_with("step_1.rb")));
        assert!(calls[2].iter().any(|p| p.ends_with("step_0.rb")));
    }

    #[tokio::test]
    async fn test_restart_preserves_results_and_pending_work() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut manager = manager_at(dir.path());
            manager.enqueue(null_tree(dir.path(), 2)).unwrap();
            manager.wait_for_finished().await.unwrap();
            manager.pause();
            manager.enqueue(null_tree(dir.path(), 1)).unwrap();
            manager.wait_for_finished().await.unwrap();
        }

        let mut manager = manager_at(dir.path());
        let status = manager.status();
        assert_eq!(status.finished, 2);
        assert_eq!(status.not_started, 1);
        for (_, node) in manager.trees()[0].iter() {
            assert!(node.last_run.is_some());
        }

        manager.wait_for_finished().await.unwrap();
        assert_eq!(manager.status().finished, 3);
    }
}
