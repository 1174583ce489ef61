//! Workflow builder: assembles a tree of job descriptions and materializes
//! it into a runnable job tree.
//!
//! The builder exclusively owns its tree. Nodes live in a flat arena and are
//! addressed by [`NodeIndex`]; nothing is shared between two workflows, and
//! copying a workflow into another re-interns every node.

use std::path::{Path, PathBuf};

use simflow_core::{FileInfo, Files, JobKind, JobParams, Tools, WorkItem};
use uuid::Uuid;

use crate::TRACING_TARGET;
use crate::error::{RunError, RunResult};
use crate::job::JobTree;
use crate::job::factory;

mod key;
mod node;
mod standard;

pub use node::{JOB_KEY_PARAM, NodeIndex, WorkflowNode};
pub use standard::{NUM_SPLITS_PARAM, SPLIT_INDEX_PARAM};

/// Parameter name the structural key is stamped under at `create()` time.
pub const WORKFLOW_KEY_PARAM: &str = "workflowkey";
/// Parameter name the workflow's display name is stamped under.
pub const WORKFLOW_NAME_PARAM: &str = "workflowname";

/// Options for materializing a workflow into a runnable job tree.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Directory the job tree runs in.
    pub out_dir: PathBuf,
    /// Seed input file attached to the root job.
    pub input_file: Option<PathBuf>,
    /// Weather file or directory. A directory becomes a search-path hint; a
    /// concrete file becomes a required file on the root job.
    pub weather: Option<PathBuf>,
    /// Directories used to localize URL or relative file references.
    pub search_paths: Vec<PathBuf>,
}

impl CreateOptions {
    /// Creates options with just an output directory.
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            input_file: None,
            weather: None,
            search_paths: Vec::new(),
        }
    }

    /// Sets the seed input file.
    pub fn with_input_file(mut self, input_file: impl Into<PathBuf>) -> Self {
        self.input_file = Some(input_file.into());
        self
    }

    /// Sets the weather file or directory.
    pub fn with_weather(mut self, weather: impl Into<PathBuf>) -> Self {
        self.weather = Some(weather.into());
        self
    }

    /// Adds a search path for reference localization.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }
}

/// Mutable tree-construction API for workflows.
///
/// Accumulates [`WorkflowNode`]s, supports named-placeholder substitution,
/// computes a structural content hash, and is consumed exactly once by
/// [`Workflow::create`].
#[derive(Debug, Clone)]
pub struct Workflow {
    uuid: Uuid,
    name: Option<String>,
    nodes: Vec<WorkflowNode>,
    root: Option<NodeIndex>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: None,
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Creates a workflow with a display name, stamped into the root's
    /// parameters at `create()` time.
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut workflow = Self::new();
        workflow.name = Some(name.into());
        workflow
    }

    /// Builds a linear workflow from an ordered list of work items.
    pub fn from_work_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let mut workflow = Self::new();
        for item in items {
            workflow.add_job(item);
        }
        workflow
    }

    /// Returns the workflow's unique id.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the workflow's display name, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns whether the workflow holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the number of jobs in the tree.
    pub fn job_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the root node index, if the workflow is non-empty.
    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    /// Returns a node by index.
    pub fn node(&self, index: NodeIndex) -> &WorkflowNode {
        &self.nodes[index.index()]
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut WorkflowNode {
        &mut self.nodes[index.index()]
    }

    /// Appends a work item as the single child of the current last leaf.
    /// An empty workflow makes it the root.
    pub fn add_job(&mut self, item: WorkItem) -> NodeIndex {
        self.attach_at_last_leaf(WorkflowNode::from(item))
    }

    /// Appends a job built from component parts.
    pub fn add_job_parts(
        &mut self,
        kind: JobKind,
        tools: Tools,
        params: JobParams,
        files: Files,
        job_key_name: &str,
    ) -> NodeIndex {
        self.attach_at_last_leaf(WorkflowNode::from_parts(
            kind,
            tools,
            params,
            files,
            job_key_name,
        ))
    }

    /// Appends a bare job of the given kind.
    pub fn add_job_kind(&mut self, kind: JobKind) -> NodeIndex {
        self.add_job(WorkItem::new(kind))
    }

    /// Appends several work items in order.
    pub fn add_jobs(&mut self, items: impl IntoIterator<Item = WorkItem>) {
        for item in items {
            self.add_job(item);
        }
    }

    /// Deep-copies another workflow's tree and appends it as a continuation
    /// at the current last leaf.
    pub fn add_workflow(&mut self, other: &Workflow) {
        let Some(other_root) = other.root else {
            return;
        };
        let copied = self.intern_subtree(other, other_root);
        match self.last_leaf() {
            Some(leaf) => self.nodes[leaf.index()].children.push(copied),
            None => self.root = Some(copied),
        }
    }

    /// Substitutes every node whose placeholder key equals `name` with a
    /// copy of `replacement`'s root node.
    ///
    /// The substitution splices: the original node's children and finished
    /// continuation are retained, and tools/files/params are merged giving
    /// the replacement precedence on conflicts. No match is a no-op.
    pub fn replace_jobs(&mut self, name: &str, replacement: &Workflow) {
        let Some(replacement_root) = replacement.root else {
            return;
        };
        let template = replacement.node(replacement_root).clone();

        let mut replaced = 0usize;
        for index in 0..self.nodes.len() {
            if self.nodes[index].job_key_name() != Some(name) {
                continue;
            }

            let original = &self.nodes[index];

            // Tools and files dedupe/lookup favor the latest entry, so
            // appending the replacement's records after the original's
            // gives the replacement precedence. Params lookups favor the
            // first entry, so the replacement's params go in front.
            let mut tools = original.tools.clone();
            tools.append_all(template.tools.clone());

            let mut files = original.files.clone();
            files.append_all(template.files.clone());

            let mut params = template.params.clone();
            params.append_params(original.params.clone());

            self.nodes[index] = WorkflowNode {
                kind: template.kind,
                tools,
                params,
                files,
                children: original.children.clone(),
                finished_job: original.finished_job,
            };
            replaced += 1;
        }

        tracing::debug!(
            target: TRACING_TARGET,
            name,
            replaced,
            "placeholder substitution finished"
        );
    }

    /// Computes the structural content hash of the tree.
    ///
    /// Structurally identical trees yield identical keys regardless of the
    /// call sequence that built them; the `workflowkey`/`workflowname`
    /// bookkeeping parameters are excluded.
    pub fn key(&self) -> RunResult<String> {
        let root = self
            .root
            .ok_or_else(|| RunError::Configuration("workflow contains no jobs".into()))?;
        Ok(key::structural_key(&self.nodes, root))
    }

    /// Flattens a strictly linear tree into an ordered list of work items.
    ///
    /// Fails with a configuration error if any node branches: a tree with
    /// parallel children or a finished continuation cannot be represented
    /// as a flat list.
    pub fn to_work_items(&self) -> RunResult<Vec<WorkItem>> {
        let mut items = Vec::with_capacity(self.nodes.len());
        let mut current = self.root;
        while let Some(index) = current {
            let node = self.node(index);
            if node.children.len() > 1 || node.finished_job.is_some() {
                return Err(RunError::Configuration(
                    "workflow branches and cannot be flattened to work items".into(),
                ));
            }
            items.push(node.to_work_item());
            current = node.children.first().copied();
        }
        Ok(items)
    }

    /// Materializes the workflow into a runnable job tree, consuming the
    /// builder.
    ///
    /// Stamps the structural key (and name, if set) into the root's
    /// parameters, attaches the seed input and weather references, and
    /// delegates to the job factory.
    pub fn create(mut self, options: CreateOptions) -> RunResult<JobTree> {
        let key = self.key()?;
        let root = self
            .root
            .ok_or_else(|| RunError::Configuration("workflow contains no jobs".into()))?;

        let name = self.name.clone();
        {
            let node = self.node_mut(root);
            node.params.set(WORKFLOW_KEY_PARAM, &key);
            if let Some(name) = name {
                node.params.set(WORKFLOW_NAME_PARAM, name);
            }
        }

        let mut search_paths = options.search_paths.clone();

        if let Some(input) = &options.input_file {
            let key_name = input
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "input".to_string());
            let mut seed = FileInfo::new(key_name, input.clone());

            if let Some(weather) = &options.weather {
                if weather.is_dir() {
                    search_paths.push(weather.clone());
                } else if let Some(filename) = weather.file_name() {
                    seed.add_required_file(weather.to_string_lossy(), filename);
                }
            }

            self.node_mut(root).files.append(seed);
        } else if let Some(weather) = &options.weather {
            if weather.is_dir() {
                search_paths.push(weather.clone());
            } else {
                // No seed to hang the weather file on, so it becomes a root
                // file in its own right.
                let key = weather
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_else(|| "epw".to_string());
                self.node_mut(root).files.append(FileInfo::new(key, weather.clone()));
            }
        }

        tracing::info!(
            target: TRACING_TARGET,
            uuid = %self.uuid,
            key = %key,
            jobs = self.nodes.len(),
            out_dir = %options.out_dir.display(),
            "materializing workflow"
        );

        factory::create_tree(&self, root, &options.out_dir, &search_paths)
    }

    /// Appends a node at the current last leaf, or roots an empty tree.
    fn attach_at_last_leaf(&mut self, node: WorkflowNode) -> NodeIndex {
        let index = self.intern(node);
        match self.last_leaf() {
            Some(leaf) => self.nodes[leaf.index()].children.push(index),
            None => self.root = Some(index),
        }
        index
    }

    /// The last leaf is found by repeatedly following the most recently
    /// added child.
    fn last_leaf(&self) -> Option<NodeIndex> {
        let mut current = self.root?;
        loop {
            match self.nodes[current.index()].children.last() {
                Some(&child) => current = child,
                None => return Some(current),
            }
        }
    }

    fn intern(&mut self, node: WorkflowNode) -> NodeIndex {
        let index = NodeIndex::from(self.nodes.len());
        self.nodes.push(node);
        index
    }

    /// Recursively copies a subtree from another workflow into this arena,
    /// returning the index of the copied root.
    fn intern_subtree(&mut self, other: &Workflow, other_index: NodeIndex) -> NodeIndex {
        let mut memo = std::collections::HashMap::new();
        self.intern_subtree_memo(other, other_index, &mut memo)
    }

    // Shared prerequisites (a parallel split's fan-in) are copied once and
    // stay shared in the copy.
    fn intern_subtree_memo(
        &mut self,
        other: &Workflow,
        other_index: NodeIndex,
        memo: &mut std::collections::HashMap<NodeIndex, NodeIndex>,
    ) -> NodeIndex {
        if let Some(&existing) = memo.get(&other_index) {
            return existing;
        }
        let source = other.node(other_index);
        let mut copy = source.clone();
        copy.children = Vec::with_capacity(source.children.len());
        copy.finished_job = None;

        let index = self.intern(copy);
        memo.insert(other_index, index);
        for &child in &source.children {
            let copied_child = self.intern_subtree_memo(other, child, memo);
            self.nodes[index.index()].children.push(copied_child);
        }
        if let Some(finished) = source.finished_job {
            let copied_finished = self.intern_subtree_memo(other, finished, memo);
            self.nodes[index.index()].finished_job = Some(copied_finished);
        }
        index
    }

    /// Attaches `child` as a prerequisite of `parent`. Used by the standard
    /// workflow assembly where the shape is built explicitly.
    pub(crate) fn attach_child(&mut self, parent: NodeIndex, child: WorkflowNode) -> NodeIndex {
        let index = self.intern(child);
        self.nodes[parent.index()].children.push(index);
        index
    }

    /// Sets `item` as the sequential continuation of `owner`: it runs
    /// strictly after the entire subtree rooted at `owner` has finished,
    /// unlike a child, which is a prerequisite.
    pub fn add_finished_job(&mut self, owner: NodeIndex, item: WorkItem) -> NodeIndex {
        let index = self.intern(WorkflowNode::from(item));
        self.nodes[owner.index()].finished_job = Some(index);
        index
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use simflow_core::{JobKind, ToolInfo, WorkItem};

    use super::*;

    fn named_item(name: &str) -> WorkItem {
        let mut item = WorkItem::new(JobKind::Null);
        item.job_key_name = name.to_string();
        item
    }

    #[test]
    fn test_add_job_builds_linear_chain() {
        let mut workflow = Workflow::new();
        workflow.add_jobs([
            WorkItem::new(JobKind::Null),
            WorkItem::new(JobKind::Null),
            WorkItem::new(JobKind::Null),
        ]);

        assert_eq!(workflow.job_count(), 3);
        let root = workflow.root().expect("non-empty");
        let child = workflow.node(root).children[0];
        let leaf = workflow.node(child).children[0];
        assert!(workflow.node(leaf).children.is_empty());
    }

    #[test]
    fn test_key_deterministic_across_call_sequences() {
        let mut a = Workflow::new();
        a.add_jobs([WorkItem::new(JobKind::Null), WorkItem::new(JobKind::ModelToIdf)]);

        let mut b = Workflow::new();
        b.add_job(WorkItem::new(JobKind::Null));
        b.add_job(WorkItem::new(JobKind::ModelToIdf));

        assert_eq!(a.key().expect("key"), b.key().expect("key"));
    }

    #[test]
    fn test_key_sensitive_to_content() {
        let mut a = Workflow::new();
        a.add_job(WorkItem::new(JobKind::Null));

        let mut b = Workflow::new();
        let mut item = WorkItem::new(JobKind::Null);
        item.params.append("extra", "1");
        b.add_job(item);

        assert_ne!(a.key().expect("key"), b.key().expect("key"));
    }

    #[test]
    fn test_key_ignores_bookkeeping_params() {
        let mut a = Workflow::new();
        a.add_job(WorkItem::new(JobKind::Null));

        let mut b = Workflow::new();
        let mut item = WorkItem::new(JobKind::Null);
        item.params.append(WORKFLOW_KEY_PARAM, "stale");
        item.params.append(WORKFLOW_NAME_PARAM, "named");
        b.add_job(item);

        assert_eq!(a.key().expect("key"), b.key().expect("key"));
    }

    #[test]
    fn test_key_sensitive_to_tools_and_ordering() {
        let mut a = Workflow::new();
        let mut item = WorkItem::new(JobKind::Ruby);
        item.tools.append(ToolInfo::new("ruby", "/usr/bin/ruby"));
        a.add_job(item);

        let mut b = Workflow::new();
        b.add_job(WorkItem::new(JobKind::Ruby));

        assert_ne!(a.key().expect("key"), b.key().expect("key"));
    }

    #[test]
    fn test_empty_workflow_key_fails() {
        let workflow = Workflow::new();
        assert!(matches!(workflow.key(), Err(RunError::Configuration(_))));
    }

    #[test]
    fn test_add_workflow_deep_copies() {
        let mut inner = Workflow::new();
        inner.add_jobs([WorkItem::new(JobKind::Null), WorkItem::new(JobKind::Null)]);

        let mut outer = Workflow::new();
        outer.add_job(WorkItem::new(JobKind::Null));
        outer.add_workflow(&inner);

        assert_eq!(outer.job_count(), 3);
        // Mutating the source afterwards must not affect the copy.
        inner.add_job(WorkItem::new(JobKind::ModelToIdf));
        assert_eq!(outer.job_count(), 3);
    }

    #[test]
    fn test_replace_jobs_preserves_structure() {
        let mut workflow = Workflow::new();
        workflow.add_job(named_item("a"));
        workflow.add_job(named_item("placeholder"));
        workflow.add_job(named_item("b"));

        let mut replacement = Workflow::new();
        let mut x = WorkItem::new(JobKind::ModelToIdf);
        x.job_key_name = "x".to_string();
        replacement.add_job(x);
        // The replacement's own continuation is discarded by the splice.
        replacement.add_job(named_item("discarded"));

        workflow.replace_jobs("placeholder", &replacement);

        let items = workflow.to_work_items().expect("still linear");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].job_key_name, "a");
        assert_eq!(items[1].kind, JobKind::ModelToIdf);
        assert_eq!(items[2].job_key_name, "b");
    }

    #[test]
    fn test_replace_jobs_no_match_is_noop() {
        let mut workflow = Workflow::new();
        workflow.add_job(named_item("a"));
        let before = workflow.key().expect("key");

        let mut replacement = Workflow::new();
        replacement.add_job(WorkItem::new(JobKind::ModelToIdf));
        workflow.replace_jobs("absent", &replacement);

        assert_eq!(workflow.key().expect("key"), before);
    }

    #[test]
    fn test_to_work_items_rejects_branching() {
        let mut workflow = Workflow::new();
        let root = workflow.add_job(WorkItem::new(JobKind::Null));
        workflow.attach_child(root, WorkflowNode::from(WorkItem::new(JobKind::Null)));
        workflow.attach_child(root, WorkflowNode::from(WorkItem::new(JobKind::Null)));

        assert!(matches!(
            workflow.to_work_items(),
            Err(RunError::Configuration(_))
        ));
    }

    #[test]
    fn test_to_work_items_rejects_continuation() {
        let mut workflow = Workflow::new();
        let root = workflow.add_job(WorkItem::new(JobKind::Null));
        workflow.add_finished_job(root, WorkItem::new(JobKind::Null));

        assert!(matches!(
            workflow.to_work_items(),
            Err(RunError::Configuration(_))
        ));
    }

    #[test]
    fn test_linear_flatten_idempotent() {
        let mut workflow = Workflow::new();
        workflow.add_job(named_item("first"));
        let mut second = WorkItem::new(JobKind::ModelToIdf);
        second.params.append("setting", "on");
        workflow.add_job(second);

        let items = workflow.to_work_items().expect("linear");
        let rebuilt = Workflow::from_work_items(items.clone());
        assert_eq!(rebuilt.to_work_items().expect("linear"), items);
    }

    #[test]
    fn test_create_attaches_seed_and_weather() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.osm");
        std::fs::write(&model, "OS:Version;").unwrap();
        let weather = dir.path().join("chicago.epw");
        std::fs::write(&weather, "LOCATION").unwrap();

        let mut workflow = Workflow::with_name("seeded");
        workflow.add_job_kind(JobKind::ModelToIdf);

        let tree = workflow
            .create(
                CreateOptions::new(dir.path().join("out"))
                    .with_input_file(&model)
                    .with_weather(&weather),
            )
            .unwrap();

        let root = tree.node(tree.root());
        assert!(root.params.has(WORKFLOW_KEY_PARAM));
        assert_eq!(
            root.params.get_value(WORKFLOW_NAME_PARAM).unwrap(),
            "seeded"
        );
        let seed = root.files.get_last_by_key("osm").unwrap();
        assert_eq!(seed.full_path, model);
        assert_eq!(seed.required_files.len(), 1);
        assert_eq!(
            seed.required_files[0].destination,
            PathBuf::from("chicago.epw")
        );
    }

    #[test]
    fn test_create_weather_without_seed_still_attached() {
        let dir = tempfile::tempdir().unwrap();
        let weather = dir.path().join("chicago.epw");
        std::fs::write(&weather, "LOCATION").unwrap();

        let mut workflow = Workflow::new();
        workflow.add_job_kind(JobKind::EnergyPlus);
        let tree = workflow
            .create(CreateOptions::new(dir.path().join("out")).with_weather(&weather))
            .unwrap();

        let root = tree.node(tree.root());
        assert_eq!(
            root.files.get_last_by_key("epw").unwrap().full_path,
            weather
        );
    }

    #[test]
    fn test_create_empty_fails() {
        let workflow = Workflow::new();
        let err = workflow.create(CreateOptions::new("/tmp/out")).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }
}
