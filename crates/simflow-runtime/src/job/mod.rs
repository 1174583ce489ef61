//! Runtime job trees.
//!
//! A [`JobTree`] is the executable counterpart of a workflow: an arena of
//! [`JobNode`]s carrying per-node state, error records, timestamps and
//! produced output files on top of the structural fields. Trees are built
//! by [`factory`], optionally compacted by [`optimizer`], and driven by the
//! run manager.

pub(crate) mod factory;
mod optimizer;

pub use self::factory::create_job;
pub use self::optimizer::optimize_job_tree;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use simflow_core::{Files, JobKind, JobParams, Tools};

/// Stable identity of a single job node.
///
/// Identities survive persistence and restarts; they are what merged-step
/// result records and error logs refer back to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of a node within a [`JobTree`] arena.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
pub struct JobIndex(pub(crate) usize);

/// Lifecycle state of a job node.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    NotStarted,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

/// Severity of a recorded diagnostic.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
}

/// A single diagnostic produced while running a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub severity: ErrorSeverity,
    pub message: String,
}

/// Ordered diagnostics for one job run.
///
/// A run succeeded when no [`ErrorSeverity::Error`] record is present;
/// warnings alone do not fail a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobErrors {
    records: Vec<ErrorRecord>,
}

impl JobErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.records.push(ErrorRecord {
            severity: ErrorSeverity::Error,
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.records.push(ErrorRecord {
            severity: ErrorSeverity::Warning,
            message: message.into(),
        });
    }

    /// Appends all of `other`'s records, preserving their order.
    pub fn extend(&mut self, other: &JobErrors) {
        self.records.extend(other.records.iter().cloned());
    }

    pub fn succeeded(&self) -> bool {
        !self
            .records
            .iter()
            .any(|r| r.severity == ErrorSeverity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }
}

/// One logical step folded into a merged physical node, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedStep {
    pub id: JobId,
    pub kind: JobKind,
    pub params: JobParams,
}

/// Per-logical-step result of a merged node run.
///
/// Merged execution collapses several tree nodes into one process, but
/// reporting stays per original node: one record per folded step, keyed by
/// the step's original identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedJobResult {
    pub id: JobId,
    pub errors: JobErrors,
    pub output_files: Files,
}

/// A single node of a runtime job tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNode {
    pub id: JobId,
    pub kind: JobKind,
    pub tools: Tools,
    pub params: JobParams,
    pub files: Files,
    pub children: Vec<JobIndex>,
    pub finished_job: Option<JobIndex>,
    pub state: JobState,
    pub errors: JobErrors,
    pub last_run: Option<jiff::Timestamp>,
    pub output_files: Files,
    /// Logical steps folded into this node by the optimizer, execution order.
    pub merged_steps: Vec<MergedStep>,
    /// One result per folded step, filled in when the node runs.
    pub merged_results: Vec<MergedJobResult>,
}

impl JobNode {
    pub(crate) fn new(kind: JobKind, tools: Tools, params: JobParams, files: Files) -> Self {
        Self {
            id: JobId::new(),
            kind,
            tools,
            params,
            files,
            children: Vec::new(),
            finished_job: None,
            state: JobState::NotStarted,
            errors: JobErrors::new(),
            last_run: None,
            output_files: Files::new(),
            merged_steps: Vec::new(),
            merged_results: Vec::new(),
        }
    }

    /// Whether this node stands for more than one logical step.
    pub fn is_merged(&self) -> bool {
        !self.merged_steps.is_empty()
    }
}

/// An executable tree of jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTree {
    nodes: Vec<JobNode>,
    root: JobIndex,
    out_dir: PathBuf,
}

impl JobTree {
    pub(crate) fn new(nodes: Vec<JobNode>, root: JobIndex, out_dir: PathBuf) -> Self {
        Self {
            nodes,
            root,
            out_dir,
        }
    }

    pub fn root(&self) -> JobIndex {
        self.root
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Number of physical nodes in the tree.
    pub fn job_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of logical steps, counting each folded step of a merged node.
    pub fn logical_job_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| if n.is_merged() { n.merged_steps.len() } else { 1 })
            .sum()
    }

    pub fn node(&self, index: JobIndex) -> &JobNode {
        &self.nodes[index.0]
    }

    pub fn node_mut(&mut self, index: JobIndex) -> &mut JobNode {
        &mut self.nodes[index.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobIndex, &JobNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (JobIndex(i), n))
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<JobNode> {
        &mut self.nodes
    }

    pub(crate) fn set_root(&mut self, root: JobIndex) {
        self.root = root;
    }

    /// Longest prerequisite chain length, counted in nodes from the root.
    pub fn depth(&self) -> usize {
        self.depth_from(self.root)
    }

    fn depth_from(&self, index: JobIndex) -> usize {
        let node = self.node(index);
        let below = node
            .children
            .iter()
            .chain(node.finished_job.iter())
            .map(|&c| self.depth_from(c))
            .max()
            .unwrap_or(0);
        1 + below
    }

    /// The node that holds `index` as its finished-job continuation, if any.
    pub fn finished_job_owner(&self, index: JobIndex) -> Option<JobIndex> {
        self.iter()
            .find(|(_, n)| n.finished_job == Some(index))
            .map(|(i, _)| i)
    }

    /// Whether every node of the subtree rooted at `index` finished
    /// successfully. Finished-job continuations are not part of the subtree
    /// they gate on and are excluded.
    pub fn subtree_finished(&self, index: JobIndex) -> bool {
        let node = self.node(index);
        node.state == JobState::Finished
            && node.children.iter().all(|&c| self.subtree_finished(c))
    }

    /// Whether `index` may be started: not yet run, every prerequisite child
    /// finished successfully, and, for a finished-job continuation, the
    /// owner's entire subtree done.
    pub fn is_ready(&self, index: JobIndex) -> bool {
        let node = self.node(index);
        if node.state != JobState::NotStarted {
            return false;
        }
        if !node
            .children
            .iter()
            .all(|&c| self.node(c).state == JobState::Finished)
        {
            return false;
        }
        if let Some(owner) = self.finished_job_owner(index) {
            if !self.subtree_finished(owner) {
                return false;
            }
        }
        true
    }

    /// All nodes currently eligible to start.
    pub fn ready_jobs(&self) -> Vec<JobIndex> {
        self.iter()
            .filter(|(i, _)| self.is_ready(*i))
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether no runnable or running work remains anywhere in the tree.
    /// Failed prerequisites leave their dependents permanently blocked; a
    /// tree with such nodes still counts as finished.
    pub fn is_finished(&self) -> bool {
        !self.nodes.iter().any(|n| n.state == JobState::Running)
            && self.ready_jobs().is_empty()
    }

    /// Aggregate state of the whole tree.
    pub fn tree_state(&self) -> JobState {
        if self.nodes.iter().any(|n| n.state == JobState::Running) {
            return JobState::Running;
        }
        if self.nodes.iter().any(|n| n.state == JobState::Failed) {
            return JobState::Failed;
        }
        if self.nodes.iter().all(|n| n.state == JobState::Finished) {
            return JobState::Finished;
        }
        JobState::NotStarted
    }

    /// Every diagnostic recorded in the subtree rooted at `index`, parents
    /// before children. Merged nodes contribute their per-step records.
    pub fn tree_errors(&self, index: JobIndex) -> JobErrors {
        let mut errors = JobErrors::new();
        self.collect_errors(index, &mut errors);
        errors
    }

    fn collect_errors(&self, index: JobIndex, errors: &mut JobErrors) {
        let node = self.node(index);
        if node.is_merged() && !node.merged_results.is_empty() {
            for result in &node.merged_results {
                errors.extend(&result.errors);
            }
        } else {
            errors.extend(&node.errors);
        }
        for &child in node.children.iter().chain(node.finished_job.iter()) {
            self.collect_errors(child, errors);
        }
    }

    /// Every output file produced in the subtree rooted at `index`.
    pub fn tree_output_files(&self, index: JobIndex) -> Files {
        let mut files = Files::new();
        self.collect_output_files(index, &mut files);
        files
    }

    fn collect_output_files(&self, index: JobIndex, files: &mut Files) {
        let node = self.node(index);
        files.append_all(node.output_files.clone());
        for result in &node.merged_results {
            files.append_all(result.output_files.clone());
        }
        for &child in node.children.iter().chain(node.finished_job.iter()) {
            self.collect_output_files(child, files);
        }
    }

    /// Per-logical-step results across the whole tree, one record per
    /// original node folded into a merged physical node.
    pub fn merged_job_results(&self) -> Vec<MergedJobResult> {
        self.nodes
            .iter()
            .flat_map(|n| n.merged_results.iter().cloned())
            .collect()
    }

    /// Whether `index` needs to run again: never run at all, or any of its
    /// prerequisites ran more recently than it did.
    pub fn is_out_of_date(&self, index: JobIndex) -> bool {
        let node = self.node(index);
        let Some(last_run) = node.last_run else {
            return true;
        };
        node.children.iter().any(|&c| {
            self.is_out_of_date(c)
                || self.node(c).last_run.is_some_and(|child| child > last_run)
        })
    }

    /// Resets transient run state after rehydration from storage. Nodes
    /// caught mid-run when the process went away are requeued; completed
    /// results, diagnostics, and timestamps are kept exactly.
    pub(crate) fn reset_interrupted(&mut self) {
        for node in &mut self.nodes {
            if node.state == JobState::Running {
                tracing::debug!(
                    target: crate::TRACING_TARGET,
                    job = %node.id,
                    "requeueing job interrupted mid-run",
                );
                node.state = JobState::NotStarted;
            }
        }
    }
}
