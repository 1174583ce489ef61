//! Builder-time tree nodes, stored in a flat arena.

use derive_more::{Debug, Display, From, Into};
use serde::{Deserialize, Serialize};
use simflow_core::{Files, JobKind, JobParams, Tools, WorkItem};

/// Parameter name a job's placeholder key is stamped under.
pub const JOB_KEY_PARAM: &str = "workflowjobkey";

/// Index of a node within one workflow's arena.
///
/// Indices are only meaningful inside the arena that produced them; they are
/// never shared between workflows. Deep copies re-intern nodes and hand out
/// fresh indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Debug, Display, From, Into)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Returns the raw arena offset.
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// A builder-time workflow tree node.
///
/// `children` are prerequisites that must complete before this node starts;
/// `finished_job` is a sequential continuation that runs strictly after the
/// entire subtree rooted here has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// What this node does.
    pub kind: JobKind,
    /// Tools the node requires.
    pub tools: Tools,
    /// Configuration parameters.
    pub params: JobParams,
    /// Input files.
    pub files: Files,
    /// Prerequisite subtrees, run in parallel.
    pub children: Vec<NodeIndex>,
    /// Sequential continuation, gated on the whole subtree.
    pub finished_job: Option<NodeIndex>,
}

impl WorkflowNode {
    /// Creates a node from the component parts, stamping the placeholder
    /// key parameter when a key name is given.
    pub fn from_parts(
        kind: JobKind,
        tools: Tools,
        mut params: JobParams,
        files: Files,
        job_key_name: &str,
    ) -> Self {
        if !job_key_name.is_empty() {
            params.set(JOB_KEY_PARAM, job_key_name);
        }
        Self {
            kind,
            tools,
            params,
            files,
            children: Vec::new(),
            finished_job: None,
        }
    }

    /// Returns the placeholder key stamped on this node, if any.
    pub fn job_key_name(&self) -> Option<&str> {
        self.params.get_value(JOB_KEY_PARAM).ok()
    }

    /// Converts the node back into an immutable work item, stripping the
    /// private placeholder-key parameter into the item's key name field.
    pub fn to_work_item(&self) -> WorkItem {
        let job_key_name = self.job_key_name().unwrap_or_default().to_string();
        let mut params = self.params.clone();
        params.remove(JOB_KEY_PARAM);
        WorkItem::with_parts(
            self.kind,
            self.tools.clone(),
            params,
            self.files.clone(),
            job_key_name,
        )
    }
}

impl From<WorkItem> for WorkflowNode {
    fn from(item: WorkItem) -> Self {
        WorkflowNode::from_parts(
            item.kind,
            item.tools,
            item.params,
            item.files,
            &item.job_key_name,
        )
    }
}
